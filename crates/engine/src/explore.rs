//! Dropdown and popup exploration
//!
//! Both explorations follow the same pattern: enumerate sub-states, visit
//! each one, record what it changed, then restore the baseline. A failing
//! step is recorded and the next candidate is tried.

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::browser::{PageDriver, PopupContent, SignatureDelta, TabKind};
use crate::error::{tolerate, EngineResult};
use crate::observer::{ExplorationStep, RunObserver, StepKind};
use crate::stability::StabilityWaiter;

/// Options visited per dropdown
pub const MAX_DROPDOWN_OPTIONS: usize = 10;
/// Buttons clicked when a popup has no tabs
pub const MAX_POPUP_BUTTONS: usize = 5;
/// Soft stability budget between exploration steps
const STEP_SETTLE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorationRecord {
    /// Option or tab label
    pub label: String,
    pub kind: StepKind,
    /// What was done, e.g. `select` or `click`
    pub action: String,
    #[serde(default)]
    pub has_implication: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<SignatureDelta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<PopupContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExplorationRecord {
    fn new(label: &str, kind: StepKind, action: &str) -> Self {
        Self {
            label: label.to_string(),
            kind,
            action: action.to_string(),
            has_implication: false,
            delta: None,
            content: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DropdownExploration {
    pub records: Vec<ExplorationRecord>,
    /// The originally selected option was selected again afterwards
    pub restored: bool,
}

impl DropdownExploration {
    pub fn implications(&self) -> usize {
        self.records.iter().filter(|r| r.has_implication).count()
    }
}

pub struct Explorer<'a> {
    stability: &'a StabilityWaiter,
    observer: &'a dyn RunObserver,
    /// Attach a viewport screenshot to each step event
    capture_steps: bool,
}

impl<'a> Explorer<'a> {
    pub fn new(stability: &'a StabilityWaiter, observer: &'a dyn RunObserver, capture_steps: bool) -> Self {
        Self {
            stability,
            observer,
            capture_steps,
        }
    }

    async fn settle(&self, page: &dyn PageDriver) {
        let budget = self.stability.timeout().min(STEP_SETTLE);
        self.stability.wait_for(page, budget).await;
    }

    pub async fn explore_dropdown(&self, page: &dyn PageDriver, selector: &str) -> EngineResult<DropdownExploration> {
        let options = tolerate("list options", page.dropdown_options(selector).await)?.unwrap_or_default();
        let mut exploration = DropdownExploration::default();
        if options.is_empty() {
            return Ok(exploration);
        }

        let original = options
            .iter()
            .find(|o| o.selected)
            .or_else(|| options.first())
            .map(|o| o.value.clone());
        let baseline = tolerate("page signature", page.page_signature().await)?;

        let candidates: Vec<_> = options
            .iter()
            .filter(|o| !o.disabled)
            .take(MAX_DROPDOWN_OPTIONS)
            .filter(|o| !o.selected && !(o.value.trim().is_empty() && o.text.trim().is_empty()))
            .collect();
        debug!(selector, candidates = candidates.len(), "Exploring dropdown");

        for option in candidates {
            let mut record = ExplorationRecord::new(&option.text, StepKind::DropdownOption, "select");
            let value = if option.value.is_empty() { &option.text } else { &option.value };

            match page.select_option(selector, value).await {
                Ok(()) => {
                    self.settle(page).await;
                    let after = tolerate("page signature", page.page_signature().await)?;
                    if let (Some(before), Some(after)) = (&baseline, &after) {
                        let delta = before.delta(after);
                        record.has_implication = delta.has_implication();
                        record.delta = Some(delta);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(selector, option = %option.text, "Option selection failed: {}", e);
                    record.error = Some(e.to_string());
                }
            }

            let description = format!(
                "Selected '{}' in {}{}",
                option.text,
                selector,
                if record.has_implication { " (page changed)" } else { "" }
            );
            self.emit(page, StepKind::DropdownOption, description).await?;
            exploration.records.push(record);
        }

        if let Some(original) = original {
            exploration.restored = tolerate("restore selection", page.select_option(selector, &original).await)?.is_some();
        }
        Ok(exploration)
    }

    /// Visit every inactive tab of the visible popup, or a few of its buttons
    /// when it has no tabs
    pub async fn explore_popup(&self, page: &dyn PageDriver) -> EngineResult<Vec<ExplorationRecord>> {
        let tabs = tolerate("list popup tabs", page.popup_tabs().await)?.unwrap_or_default();
        let mut records = Vec::new();

        if tabs.is_empty() {
            let buttons = tolerate("list popup buttons", page.popup_buttons(MAX_POPUP_BUTTONS).await)?.unwrap_or_default();
            debug!(buttons = buttons.len(), "Exploring popup buttons");
            for button in buttons {
                let mut record = ExplorationRecord::new(&button.text, StepKind::PopupButton, "click");
                self.visit(page, &mut record, page.click(&button.selector).await).await?;
                self.emit(page, StepKind::PopupButton, format!("Clicked popup button '{}'", button.text))
                    .await?;
                records.push(record);
            }
            return Ok(records);
        }

        debug!(tabs = tabs.len(), "Exploring popup tabs");
        for tab in tabs.iter().filter(|t| !t.active) {
            let (action, result) = match (tab.kind, &tab.parent_selector) {
                (TabKind::Option, Some(parent)) => ("select", page.select_option(parent, &tab.text).await),
                _ => ("click", page.click(&tab.selector).await),
            };
            let mut record = ExplorationRecord::new(&tab.text, StepKind::PopupTab, action);
            self.visit(page, &mut record, result).await?;
            self.emit(page, StepKind::PopupTab, format!("Opened popup tab '{}'", tab.text))
                .await?;
            records.push(record);
        }
        Ok(records)
    }

    async fn visit(
        &self,
        page: &dyn PageDriver,
        record: &mut ExplorationRecord,
        result: EngineResult<()>,
    ) -> EngineResult<()> {
        match result {
            Ok(()) => {
                self.settle(page).await;
                record.content = tolerate("popup content", page.popup_content().await)?.flatten();
                record.has_implication = record.content.is_some();
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(label = %record.label, "Popup step failed: {}", e);
                record.error = Some(e.to_string());
            }
        }
        Ok(())
    }

    async fn emit(&self, page: &dyn PageDriver, kind: StepKind, description: String) -> EngineResult<()> {
        let screenshot = if self.capture_steps {
            tolerate("step screenshot", page.screenshot(false).await)?.map(|bytes| {
                format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                )
            })
        } else {
            None
        };
        self.observer.on_step(&ExplorationStep {
            kind,
            description,
            screenshot,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{MockElement, MockPage};
    use crate::observer::{ChannelObserver, NoopObserver, RunEvent};

    fn waiter() -> StabilityWaiter {
        StabilityWaiter::new(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropdown_round_trip() {
        let page = MockPage::new("https://app.example.com")
            .with_element("#region", MockElement::select(&["All", "North", "South", "East"]));
        let stability = waiter();
        let explorer = Explorer::new(&stability, &NoopObserver, false);

        let result = explorer.explore_dropdown(&page, "#region").await.unwrap();
        assert_eq!(result.records.len(), 3);
        assert!(result.records.iter().all(|r| r.has_implication));
        assert!(result.restored);
        assert_eq!(page.selected_value("#region").as_deref(), Some("all"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropdown_skips_disabled_and_caps_options() {
        let labels: Vec<String> = (0..14).map(|i| format!("Option {i}")).collect();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let page = MockPage::new("https://app.example.com")
            .with_element("#many", MockElement::select(&refs).disable_option(3));
        let stability = waiter();
        let explorer = Explorer::new(&stability, &NoopObserver, false);

        let result = explorer.explore_dropdown(&page, "#many").await.unwrap();
        // ten enabled options, the first of which is already selected
        assert_eq!(result.records.len(), 9);
        assert!(result.records.iter().all(|r| r.label != "Option 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_tabs_are_visited_with_screenshots() {
        let page = MockPage::new("https://app.example.com").with_modal(&["Overview", "Details", "History"], &["Save"]);
        let stability = waiter();
        let (observer, mut rx) = ChannelObserver::new();
        let explorer = Explorer::new(&stability, &observer, true);

        let records = explorer.explore_popup(&page).await.unwrap();
        let labels: Vec<_> = records.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Details", "History"]);
        assert!(records.iter().all(|r| r.content.is_some()));

        match rx.try_recv().unwrap() {
            RunEvent::Step(step) => {
                assert_eq!(step.kind, StepKind::PopupTab);
                assert!(step.screenshot.unwrap().starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_popup_without_tabs_clicks_buttons() {
        let page = MockPage::new("https://app.example.com").with_modal(&[], &["Accept", "Preferences"]);
        let stability = waiter();
        let explorer = Explorer::new(&stability, &NoopObserver, false);

        let records = explorer.explore_popup(&page).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.kind == StepKind::PopupButton && r.error.is_none()));
    }
}
