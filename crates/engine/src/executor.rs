//! Action executor
//!
//! Runs one [`TestSpec`] against the page and reduces every outcome to an
//! [`ActionResult`]. Only a session failure escapes as an error.

use std::time::Duration;
use tracing::{debug, info, warn};

use autoqa_common::{ActionKind, ActionResult, TestSpec};

use crate::browser::PageDriver;
use crate::error::{tolerate, EngineError, EngineResult};
use crate::explore::Explorer;
use crate::guard::InterstitialGuard;
use crate::observer::RunObserver;
use crate::stability::StabilityWaiter;

/// How long a selector may take to attach
pub const ELEMENT_WAIT: Duration = Duration::from_secs(5);
/// Guard passes after a click; one more runs before it
const GUARD_PASSES: u32 = 3;
const GUARD_BACKOFF: Duration = Duration::from_millis(200);
/// Settle budget after a click before popups are compared
const CLICK_SETTLE: Duration = Duration::from_millis(1000);
const SCROLL_STEP: i64 = 800;
const HEADER_CANDIDATES: &str = "th, [role=\"columnheader\"]";

pub struct ActionExecutor<'a> {
    guard: &'a InterstitialGuard,
    stability: &'a StabilityWaiter,
    observer: &'a dyn RunObserver,
    capture_steps: bool,
    authenticated: bool,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(guard: &'a InterstitialGuard, stability: &'a StabilityWaiter, observer: &'a dyn RunObserver) -> Self {
        Self {
            guard,
            stability,
            observer,
            capture_steps: false,
            authenticated: false,
        }
    }

    /// Attach viewport screenshots to exploration step events
    pub fn capture_steps(mut self, capture: bool) -> Self {
        self.capture_steps = capture;
        self
    }

    /// Whether the session's authentication step succeeded
    pub fn authenticated(mut self, authenticated: bool) -> Self {
        self.authenticated = authenticated;
        self
    }

    fn explorer(&self) -> Explorer<'_> {
        Explorer::new(self.stability, self.observer, self.capture_steps)
    }

    /// Execute `spec`. Action failures become failed results; only
    /// [`EngineError::SessionFailure`] is returned as an error.
    pub async fn execute(&self, spec: &TestSpec, page: &dyn PageDriver) -> EngineResult<ActionResult> {
        debug!(name = %spec.name, action = %spec.action, selector = %spec.selector, "Executing");
        let outcome = match spec.action {
            ActionKind::VerifyRows => self.verify_rows(page, &spec.selector).await,
            ActionKind::Sort => self.sort(page, spec).await,
            ActionKind::Input => self.input(page, spec).await,
            ActionKind::Click => self.click(page, spec).await,
            ActionKind::Authenticate => Ok(self.authentication_result()),
        };

        match outcome {
            Ok(result) => Ok(result),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(ActionResult::fail(e.to_string())),
        }
    }

    fn authentication_result(&self) -> ActionResult {
        if self.authenticated {
            ActionResult::pass("Covered by session authentication")
        } else {
            ActionResult::fail("Session authentication did not succeed")
        }
    }

    async fn require(&self, page: &dyn PageDriver, selector: &str) -> EngineResult<()> {
        if page.wait_for_selector(selector, ELEMENT_WAIT).await? {
            Ok(())
        } else {
            Err(EngineError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn verify_rows(&self, page: &dyn PageDriver, selector: &str) -> EngineResult<ActionResult> {
        self.require(page, selector).await?;
        let rows = page.table_rows(selector).await?;

        if rows.total > 1 {
            Ok(ActionResult::pass(format!("Found {} rows", rows.data_rows())))
        } else if rows.grid > 0 {
            Ok(ActionResult::pass(format!("Found {} grid rows", rows.grid)))
        } else {
            Ok(ActionResult::fail("Table/Grid is empty"))
        }
    }

    async fn sort(&self, page: &dyn PageDriver, spec: &TestSpec) -> EngineResult<ActionResult> {
        let header = spec.header.as_deref().unwrap_or_default();
        self.require(page, &spec.selector).await?;

        let cell = page
            .find_by_text(&spec.selector, HEADER_CANDIDATES, header)
            .await?
            .ok_or_else(|| EngineError::ElementNotFound {
                selector: format!("{} header '{}'", spec.selector, header),
            })?;

        page.click(&cell).await?;
        self.stability.wait_for(page, CLICK_SETTLE).await;

        let tabs = self.guard.reconcile_tabs(page).await?;
        let mut message = format!("Sorted by '{}'", header);
        if tabs.tabs_closed > 0 {
            message.push_str(&format!(" (closed {} new tab(s))", tabs.tabs_closed));
        }
        Ok(ActionResult::pass(message))
    }

    async fn input(&self, page: &dyn PageDriver, spec: &TestSpec) -> EngineResult<ActionResult> {
        self.require(page, &spec.selector).await?;
        let info = page
            .element_info(&spec.selector)
            .await?
            .ok_or_else(|| EngineError::ElementNotFound {
                selector: spec.selector.clone(),
            })?;

        if info.is_native_select() {
            let _hold = self.guard.hold().await;
            let exploration = self.explorer().explore_dropdown(page, &spec.selector).await?;
            return Ok(ActionResult::pass(format!(
                "Explored {} option(s), {} changed the page",
                exploration.records.len(),
                exploration.implications()
            )));
        }

        let input_type = spec
            .input_type
            .clone()
            .or(info.input_type)
            .unwrap_or_else(|| "text".to_string())
            .to_lowercase();

        let message = match input_type.as_str() {
            "checkbox" | "radio" => {
                page.click(&spec.selector).await?;
                format!("Toggled {} input", input_type)
            }
            other => {
                let value = sample_value(other);
                page.fill(&spec.selector, value).await?;
                format!("Filled input with '{}'", value)
            }
        };
        self.stability.wait_for(page, CLICK_SETTLE).await;
        Ok(ActionResult::pass(message))
    }

    async fn click(&self, page: &dyn PageDriver, spec: &TestSpec) -> EngineResult<ActionResult> {
        let selector = spec.selector.as_str();
        if spec.block {
            return Ok(ActionResult::fail(format!("BLOCKED: '{}' is flagged to skip", spec.name)));
        }
        self.guard.screen_selector(selector)?;

        self.require(page, selector).await?;
        let info = page
            .element_info(selector)
            .await?
            .ok_or_else(|| EngineError::ElementNotFound {
                selector: selector.to_string(),
            })?;
        self.guard.screen_element(selector, &info)?;

        self.stability.wait(page).await;

        // The monitor must not dismiss what this click opens until it is explored
        let hold = self.guard.hold().await;
        let cleared = self.guard.sweep_unlocked(page).await?;
        if cleared.escapes > 0 || cleared.closed_via_button || cleared.iframes_removed > 0 {
            debug!(selector, escapes = cleared.escapes, "Dismissed popup covering the target");
        }

        if info.is_dropdown_like() {
            let exploration = self.explorer().explore_dropdown(page, selector).await?;
            if !exploration.records.is_empty() || info.is_native_select() {
                return Ok(ActionResult::pass(format!(
                    "Explored {} dropdown option(s), {} changed the page",
                    exploration.records.len(),
                    exploration.implications()
                )));
            }
        }

        let mut message = self.intelligent_click(page, selector).await?;

        for attempt in 1..=GUARD_PASSES {
            let report = self.guard.sweep_unlocked(page).await?;
            if report.clear {
                break;
            }
            debug!(attempt, "Popup still visible after sweep");
            tokio::time::sleep(GUARD_BACKOFF * attempt).await;
        }
        drop(hold);

        let tabs = self.guard.reconcile_tabs(page).await?;
        if tabs.tabs_closed > 0 {
            message.push_str(&format!("; closed {} new tab(s)", tabs.tabs_closed));
        }
        if let Some(url) = tabs.drifted_from {
            message.push_str(&format!("; returned from {}", url));
        }

        if let Some(loaded) = self.scroll_check(page).await? {
            message.push_str(&format!("; scrolling loaded {} more row(s)", loaded));
        }

        Ok(ActionResult::pass(message))
    }

    /// Click and, if a popup appeared, explore it before dismissing it.
    /// The caller holds the guard.
    async fn intelligent_click(&self, page: &dyn PageDriver, selector: &str) -> EngineResult<String> {
        let before = tolerate("popup state", page.popup_state().await)?.unwrap_or_default();
        page.click(selector).await?;
        self.stability.wait_for(page, CLICK_SETTLE).await;
        let after = tolerate("popup state", page.popup_state().await)?.unwrap_or_default();

        if !after.appeared_since(&before) {
            return Ok(format!("Clicked {}", selector));
        }

        info!(selector, "Popup appeared after click; exploring");
        let records = self.explorer().explore_popup(page).await?;
        let report = self.guard.sweep_unlocked(page).await?;
        if !report.clear {
            warn!(selector, "Popup still visible after exploration");
        }
        Ok(format!("Clicked {} and explored popup ({} step(s))", selector, records.len()))
    }

    /// Rows that appeared after scrolling down, if any
    async fn scroll_check(&self, page: &dyn PageDriver) -> EngineResult<Option<usize>> {
        let Some(before) = tolerate("page signature", page.page_signature().await)? else {
            return Ok(None);
        };
        if tolerate("scroll", page.scroll_by(SCROLL_STEP).await)?.is_none() {
            return Ok(None);
        }
        self.stability.wait_for(page, CLICK_SETTLE).await;
        let after = tolerate("page signature", page.page_signature().await)?;
        tolerate("scroll back", page.scroll_by(-SCROLL_STEP).await)?;

        Ok(after
            .filter(|a| a.row_count > before.row_count)
            .map(|a| a.row_count - before.row_count))
    }
}

/// Plausible value for a text-like input type
fn sample_value(input_type: &str) -> &'static str {
    match input_type {
        "email" => "test@example.com",
        "password" => "Password123!",
        "number" | "range" => "42",
        "tel" => "5550100",
        "url" => "https://example.com",
        "date" => "2024-01-01",
        "search" => "test",
        _ => "Test input",
    }
}
