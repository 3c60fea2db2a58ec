//! Background popup monitor
//!
//! Sweeps popups and stray tabs on a fixed interval for the whole run,
//! independent of the test being executed. It yields whenever the main loop
//! holds the guard.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::browser::PageDriver;
use crate::guard::InterstitialGuard;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub sweeps: usize,
    /// Sweeps that found something to dismiss
    pub interventions: usize,
    /// Ticks skipped because the guard was busy
    pub yielded: usize,
}

pub struct PopupMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<MonitorStats>,
}

impl PopupMonitor {
    pub fn spawn(page: Arc<dyn PageDriver>, guard: Arc<InterstitialGuard>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { run(page, guard, interval, token).await });
        Self { cancel, handle }
    }

    /// Cancel the monitor and wait for it to finish
    pub async fn stop(self) -> MonitorStats {
        self.cancel.cancel();
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Popup monitor task failed: {}", e);
                MonitorStats::default()
            }
        }
    }
}

async fn run(
    page: Arc<dyn PageDriver>,
    guard: Arc<InterstitialGuard>,
    interval: Duration,
    cancel: CancellationToken,
) -> MonitorStats {
    let mut stats = MonitorStats::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    debug!(interval_ms = interval.as_millis() as u64, "Popup monitor started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = guard.try_sweep(page.as_ref()) => outcome,
        };

        match outcome {
            Ok(Some(report)) => {
                stats.sweeps += 1;
                if !report.clear || report.escapes > 0 || report.tabs_closed > 0 || report.iframes_removed > 0 {
                    stats.interventions += 1;
                    info!(
                        escapes = report.escapes,
                        tabs_closed = report.tabs_closed,
                        iframes_removed = report.iframes_removed,
                        "Monitor dismissed interstitials"
                    );
                }
            }
            Ok(None) => stats.yielded += 1,
            Err(e) => {
                error!("Popup monitor stopping: {}", e);
                break;
            }
        }
    }

    debug!(sweeps = stats.sweeps, interventions = stats.interventions, "Popup monitor stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{ClickEffect, MockElement, MockPage};
    use crate::guard::KeywordClassifier;

    fn guard() -> Arc<InterstitialGuard> {
        let classifier = Arc::new(KeywordClassifier::with_defaults(&[]).unwrap());
        Arc::new(InterstitialGuard::new("https://app.example.com", classifier, &[]).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_closes_popups_between_tests() {
        let page = MockPage::new("https://app.example.com").with_element(
            "#promo",
            MockElement::button("Promo").on_click(ClickEffect::OpenTab("https://promo.example.org".into())),
        );
        let monitor = PopupMonitor::spawn(Arc::new(page.clone()), guard(), Duration::from_millis(1500));

        page.click("#promo").await.unwrap();
        assert_eq!(page.open_tabs(), 2);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(page.open_tabs(), 1);

        let stats = monitor.stop().await;
        assert!(stats.interventions >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_yields_while_guard_is_held() {
        let guard = guard();
        let page = MockPage::new("https://app.example.com").with_modal(&["Tab"], &[]);
        let monitor = PopupMonitor::spawn(Arc::new(page.clone()), guard.clone(), Duration::from_millis(100));

        let held = guard.hold().await;
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(page.modal_count(), 1);
        drop(held);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(page.modal_count(), 0);

        let stats = monitor.stop().await;
        assert!(stats.yielded >= 2);
    }
}
