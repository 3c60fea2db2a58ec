//! Waiting for a page to settle before interacting with it
//!
//! A wait is a sequence of best-effort phases. A phase that fails or runs out
//! of budget is logged and skipped; the overall wait never returns an error
//! and never exceeds its hard cap.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::browser::PageDriver;

/// Per-image load cap
pub const IMAGE_CAP: Duration = Duration::from_secs(2);
/// Fixed delay for CSS transitions
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
/// Upper bound on the network-idle phase
pub const NETWORK_IDLE_CAP: Duration = Duration::from_secs(5);
/// Final short pause after the network went quiet
pub const TAIL_DELAY: Duration = Duration::from_millis(300);

/// How one phase of a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Ready,
    Failed,
    TimedOut,
    /// Not attempted because the hard cap was spent
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StabilityReport {
    pub fonts: PhaseOutcome,
    pub images: PhaseOutcome,
    pub network: PhaseOutcome,
    pub elapsed: Duration,
}

impl StabilityReport {
    pub fn settled(&self) -> bool {
        [self.fonts, self.images, self.network]
            .iter()
            .all(|p| *p == PhaseOutcome::Ready)
    }
}

#[derive(Debug, Clone)]
pub struct StabilityWaiter {
    timeout: Duration,
}

impl StabilityWaiter {
    /// `timeout` is the soft budget; the hard cap is twice that
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn wait(&self, page: &dyn PageDriver) -> StabilityReport {
        self.wait_for(page, self.timeout).await
    }

    /// Wait with a custom soft budget
    pub async fn wait_for(&self, page: &dyn PageDriver, timeout: Duration) -> StabilityReport {
        let start = Instant::now();
        let hard_cap = start + timeout * 2;

        let fonts = phase("fonts", hard_cap, timeout, page.fonts_ready()).await;
        let images = phase("images", hard_cap, timeout, page.images_ready(IMAGE_CAP)).await;

        sleep_capped(SETTLE_DELAY, hard_cap).await;

        let network_budget = timeout.min(NETWORK_IDLE_CAP);
        let network = phase("network", hard_cap, network_budget, page.network_idle(network_budget)).await;

        sleep_capped(TAIL_DELAY, hard_cap).await;

        let report = StabilityReport {
            fonts,
            images,
            network,
            elapsed: start.elapsed(),
        };
        debug!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            settled = report.settled(),
            "Stability wait finished"
        );
        report
    }
}

async fn phase<F>(name: &str, hard_cap: Instant, budget: Duration, fut: F) -> PhaseOutcome
where
    F: std::future::Future<Output = crate::error::EngineResult<()>>,
{
    let now = Instant::now();
    if now >= hard_cap {
        return PhaseOutcome::Skipped;
    }
    let limit = budget.min(hard_cap - now);
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(())) => PhaseOutcome::Ready,
        Ok(Err(e)) => {
            debug!("Stability phase '{}' failed: {}", name, e);
            PhaseOutcome::Failed
        }
        Err(_) => {
            debug!("Stability phase '{}' timed out after {:?}", name, limit);
            PhaseOutcome::TimedOut
        }
    }
}

async fn sleep_capped(delay: Duration, hard_cap: Instant) {
    let until = (Instant::now() + delay).min(hard_cap);
    tokio::time::sleep_until(until).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::MockPage;

    #[tokio::test(start_paused = true)]
    async fn test_quiet_page_settles() {
        let page = MockPage::new("https://app.example.com");
        let waiter = StabilityWaiter::new(Duration::from_secs(5));

        let report = waiter.wait(&page).await;
        assert!(report.settled());
        assert!(report.elapsed >= SETTLE_DELAY + TAIL_DELAY);
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_page_never_errors() {
        let page = MockPage::new("https://app.example.com");
        page.kill();
        let report = StabilityWaiter::new(Duration::from_secs(1)).wait(&page).await;
        assert_eq!(report.fonts, PhaseOutcome::Failed);
        assert!(!report.settled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_cap_bounds_short_budgets() {
        let page = MockPage::new("https://app.example.com");
        let report = StabilityWaiter::new(Duration::from_millis(100)).wait(&page).await;
        assert!(report.elapsed <= Duration::from_millis(200));
    }
}
