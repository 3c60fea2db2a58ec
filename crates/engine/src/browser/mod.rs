//! Browser driver seam
//!
//! The engine never talks to a browser directly. Everything it needs from a
//! page is expressed by [`PageDriver`]; [`Launcher`] creates one page per run.
//! [`chromium`] drives Chrome over CDP, [`mock`] is a scripted in-memory page.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autoqa_common::BrowserSettings;

use crate::error::EngineResult;

pub mod chromium;
pub mod mock;
mod scripts;

pub use chromium::{ChromiumLauncher, ChromiumPage};
pub use mock::{ClickEffect, MockElement, MockLauncher, MockPage};

/// Structural facts about one element, used for classification and dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub aria_label: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub data_toggle: Option<String>,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl ElementInfo {
    pub fn is_native_select(&self) -> bool {
        self.tag.eq_ignore_ascii_case("select")
    }

    /// Select elements, listboxes and toggles that open option lists
    pub fn is_dropdown_like(&self) -> bool {
        self.is_native_select()
            || self.role.as_deref() == Some("listbox")
            || self.classes.split_whitespace().any(|c| c == "dropdown")
            || self.data_toggle.as_deref() == Some("dropdown")
    }

    /// Text and attribute values an external-login classifier should look at
    pub fn classification_subjects(&self) -> Vec<&str> {
        let mut subjects = vec![self.text.as_str(), self.classes.as_str()];
        subjects.extend(
            [&self.id, &self.aria_label, &self.href, &self.title]
                .into_iter()
                .filter_map(|v| v.as_deref()),
        );
        subjects.retain(|s| !s.trim().is_empty());
        subjects
    }
}

/// Row counts inside a table-like container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRows {
    /// All `tr` descendants
    pub total: usize,
    /// Rows made only of `th` cells or living in `thead`
    pub header: usize,
    /// ARIA `role=row` descendants
    pub grid: usize,
}

impl TableRows {
    pub fn data_rows(&self) -> usize {
        self.total.saturating_sub(self.header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub text: String,
    pub value: String,
    pub index: usize,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub selected: bool,
}

/// Coarse page state compared before and after a dropdown selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignature {
    pub url: String,
    pub has_table: bool,
    pub has_form: bool,
    pub row_count: usize,
    pub visible_element_count: usize,
}

impl PageSignature {
    pub fn delta(&self, after: &PageSignature) -> SignatureDelta {
        SignatureDelta {
            url_changed: self.url != after.url,
            structure_changed: self.has_table != after.has_table || self.has_form != after.has_form,
            data_changed: self.row_count != after.row_count,
            elements_changed: self.visible_element_count != after.visible_element_count,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDelta {
    pub url_changed: bool,
    pub structure_changed: bool,
    pub data_changed: bool,
    pub elements_changed: bool,
}

impl SignatureDelta {
    pub fn has_implication(&self) -> bool {
        self.url_changed || self.structure_changed || self.data_changed || self.elements_changed
    }
}

/// Snapshot of interstitial surfaces on the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupState {
    pub visible_modal_count: usize,
    pub visible_iframe_count: usize,
    pub overlay_count: usize,
}

impl PopupState {
    pub fn any_visible(&self) -> bool {
        self.visible_modal_count > 0 || self.visible_iframe_count > 0
    }

    /// Whether a popup appeared between `before` and `self`
    pub fn appeared_since(&self, before: &PopupState) -> bool {
        self.visible_modal_count > before.visible_modal_count
            || self.visible_iframe_count > before.visible_iframe_count
            || self.overlay_count > before.overlay_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TabKind {
    Tab,
    /// An option of a select embedded in the popup
    Option,
}

/// A tab-like control inside the first visible popup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupTab {
    pub text: String,
    pub selector: String,
    pub kind: TabKind,
    #[serde(default)]
    pub active: bool,
    /// Owning select for [`TabKind::Option`]
    #[serde(default)]
    pub parent_selector: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupButton {
    pub text: String,
    pub selector: String,
}

/// Lightweight fingerprint of the visible popup's content
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopupContent {
    pub has_table: bool,
    pub has_form: bool,
    pub has_list: bool,
    pub button_count: usize,
    pub input_count: usize,
}

/// One browsing page, exclusively owned by a run.
///
/// Implementations bound every suspension point with their own timeout and
/// must tolerate concurrent callers (the main loop and the popup monitor).
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> EngineResult<()>;

    async fn current_url(&self) -> EngineResult<String>;

    /// Wait for `selector` to attach; `Ok(false)` when it never did
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> EngineResult<bool>;

    async fn element_info(&self, selector: &str) -> EngineResult<Option<ElementInfo>>;

    async fn table_rows(&self, selector: &str) -> EngineResult<TableRows>;

    /// Resolve the first element matching `candidates` inside `scope` whose
    /// text contains `text`, returning a selector that addresses it
    async fn find_by_text(&self, scope: &str, candidates: &str, text: &str) -> EngineResult<Option<String>>;

    async fn click(&self, selector: &str) -> EngineResult<()>;

    async fn click_at(&self, x: f64, y: f64) -> EngineResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> EngineResult<()>;

    async fn select_option(&self, selector: &str, value: &str) -> EngineResult<()>;

    async fn press_key(&self, key: &str) -> EngineResult<()>;

    async fn scroll_by(&self, dy: i64) -> EngineResult<()>;

    async fn dropdown_options(&self, selector: &str) -> EngineResult<Vec<DropdownOption>>;

    async fn page_signature(&self) -> EngineResult<PageSignature>;

    async fn popup_state(&self) -> EngineResult<PopupState>;

    async fn popup_tabs(&self) -> EngineResult<Vec<PopupTab>>;

    /// Buttons inside the visible popup, excluding close/cancel controls
    async fn popup_buttons(&self, limit: usize) -> EngineResult<Vec<PopupButton>>;

    async fn popup_content(&self) -> EngineResult<Option<PopupContent>>;

    /// A visible close/dismiss control of an open popup, if any
    async fn close_button(&self) -> EngineResult<Option<String>>;

    async fn iframe_sources(&self) -> EngineResult<Vec<String>>;

    /// Remove iframes whose source host matches one of `hosts`; all iframes when empty
    async fn remove_iframes(&self, hosts: &[String]) -> EngineResult<usize>;

    /// Hide modal, overlay and backdrop containers directly
    async fn hide_overlays(&self) -> EngineResult<usize>;

    async fn fonts_ready(&self) -> EngineResult<()>;

    async fn images_ready(&self, per_image: Duration) -> EngineResult<()>;

    async fn network_idle(&self, timeout: Duration) -> EngineResult<()>;

    async fn screenshot(&self, full_page: bool) -> EngineResult<Vec<u8>>;

    async fn tab_count(&self) -> EngineResult<usize>;

    /// Close every tab except the original and return focus to it
    async fn close_extra_tabs(&self) -> EngineResult<usize>;

    /// Release the browser. Called exactly once at the end of a run.
    async fn shutdown(&self) -> EngineResult<()>;

    /// Recorded video of the session, when the driver produces one
    fn video_path(&self) -> Option<PathBuf> {
        None
    }
}

/// Creates the single browser session of a run
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, settings: &BrowserSettings) -> EngineResult<Arc<dyn PageDriver>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropdown_like_detection() {
        let select = ElementInfo {
            tag: "SELECT".into(),
            ..Default::default()
        };
        let toggle = ElementInfo {
            tag: "button".into(),
            data_toggle: Some("dropdown".into()),
            ..Default::default()
        };
        let styled = ElementInfo {
            tag: "div".into(),
            classes: "nav-item dropdown open".into(),
            ..Default::default()
        };
        let plain = ElementInfo {
            tag: "button".into(),
            classes: "dropdown-item".into(),
            ..Default::default()
        };

        assert!(select.is_dropdown_like());
        assert!(toggle.is_dropdown_like());
        assert!(styled.is_dropdown_like());
        assert!(!plain.is_dropdown_like());
    }

    #[test]
    fn test_signature_delta() {
        let before = PageSignature {
            url: "https://app.example.com/sales".into(),
            has_table: true,
            has_form: false,
            row_count: 10,
            visible_element_count: 40,
        };
        let same = before.clone();
        let filtered = PageSignature {
            row_count: 4,
            ..before.clone()
        };

        assert!(!before.delta(&same).has_implication());
        let delta = before.delta(&filtered);
        assert!(delta.data_changed);
        assert!(!delta.url_changed);
        assert!(delta.has_implication());
    }

    #[test]
    fn test_popup_appearance() {
        let before = PopupState::default();
        let after = PopupState {
            visible_iframe_count: 1,
            ..Default::default()
        };
        assert!(after.appeared_since(&before));
        assert!(!before.appeared_since(&after));
        assert!(after.any_visible());
    }

    #[test]
    fn test_table_rows_exclude_header() {
        let rows = TableRows {
            total: 6,
            header: 1,
            grid: 0,
        };
        assert_eq!(rows.data_rows(), 5);
    }
}
