//! Stuck-test detector
//!
//! A watchdog independent of the per-test deadline. The main loop announces
//! which queue index it is working on; if the same index is still current
//! after `threshold`, the detector fires for that index and the main loop
//! force-skips the test.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct StuckDetector {
    current: watch::Sender<Option<usize>>,
    stuck: watch::Receiver<Option<usize>>,
    threshold: Duration,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl StuckDetector {
    pub fn spawn(threshold: Duration) -> Self {
        let (current, current_rx) = watch::channel(None);
        let (stuck_tx, stuck) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { watch_loop(current_rx, stuck_tx, threshold, token).await });
        Self {
            current,
            stuck,
            threshold,
            cancel,
            handle,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// The main loop started working on `index`
    pub fn enter(&self, index: usize) {
        self.current.send_replace(Some(index));
    }

    /// The main loop finished the current index
    pub fn leave(&self) {
        self.current.send_replace(None);
    }

    /// Resolves once the detector declares `index` stuck; never otherwise
    pub async fn stuck_on(&self, index: usize) {
        let mut rx = self.stuck.clone();
        if rx.wait_for(|v| *v == Some(index)).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Stuck detector task failed: {}", e);
        }
    }
}

async fn watch_loop(
    mut current: watch::Receiver<Option<usize>>,
    stuck: watch::Sender<Option<usize>>,
    threshold: Duration,
    cancel: CancellationToken,
) {
    let mut index: Option<usize> = None;
    let mut since = Instant::now();
    let mut fired = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            changed = current.changed() => {
                if changed.is_err() {
                    break;
                }
                index = *current.borrow_and_update();
                since = Instant::now();
                fired = false;
            }
            _ = tokio::time::sleep_until(since + threshold), if index.is_some() && !fired => {
                warn!(index = ?index, threshold_secs = threshold.as_secs(), "Test is stuck; forcing skip");
                stuck.send_replace(index);
                fired = true;
            }
        }
    }
    debug!("Stuck detector stopped");
}
