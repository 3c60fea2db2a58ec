//! Scripted in-memory page
//!
//! `MockPage` models just enough of a web page for the engine to run against:
//! elements with optional tables and options, popups with tabs and buttons,
//! iframes, extra tabs and click side effects. Every interaction is logged so
//! tests can assert on what the engine did (and did not) do to the page.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use autoqa_common::BrowserSettings;

use super::{
    DropdownOption, ElementInfo, Launcher, PageDriver, PageSignature, PopupButton, PopupContent,
    PopupState, PopupTab, TabKind, TableRows,
};
use crate::error::{EngineError, EngineResult};

/// What clicking an element does to the page
#[derive(Debug, Clone)]
pub enum ClickEffect {
    /// Show a modal with the given tab labels and button labels
    OpenModal { tabs: Vec<String>, buttons: Vec<String> },
    /// Inject an iframe with the given source
    OpenIframe(String),
    /// Open a new browser tab
    OpenTab(String),
    /// Navigate the page
    Navigate(String),
    /// Add rows to the page's main table
    LoadRows(usize),
    /// Kill the browser connection
    Crash,
}

/// An element addressable by its selector
#[derive(Debug, Clone, Default)]
pub struct MockElement {
    pub info: ElementInfo,
    pub rows: TableRows,
    pub headers: Vec<String>,
    pub options: Vec<DropdownOption>,
    pub effect: Option<ClickEffect>,
    pub hang: bool,
    pub failure: Option<String>,
}

impl MockElement {
    pub fn new(tag: &str) -> Self {
        Self {
            info: ElementInfo {
                tag: tag.to_string(),
                visible: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn button(text: &str) -> Self {
        Self::new("button").text(text)
    }

    /// A table with one header row and `data_rows` body rows
    pub fn table(headers: &[&str], data_rows: usize) -> Self {
        let mut element = Self::new("table");
        element.headers = headers.iter().map(|h| h.to_string()).collect();
        element.rows = TableRows {
            total: data_rows + 1,
            header: 1,
            grid: 0,
        };
        element
    }

    /// An ARIA grid with `rows` rows and no `tr` elements
    pub fn grid(rows: usize) -> Self {
        let mut element = Self::new("div").role("grid");
        element.rows = TableRows {
            total: 0,
            header: 0,
            grid: rows,
        };
        element
    }

    /// A native select; the first option is selected
    pub fn select(options: &[&str]) -> Self {
        let mut element = Self::new("select");
        element.options = options
            .iter()
            .enumerate()
            .map(|(index, text)| DropdownOption {
                text: text.to_string(),
                value: text.to_lowercase().replace(' ', "-"),
                index,
                disabled: false,
                selected: index == 0,
            })
            .collect();
        element
    }

    pub fn input(input_type: &str) -> Self {
        let mut element = Self::new("input");
        element.info.input_type = Some(input_type.to_string());
        element
    }

    pub fn text(mut self, text: &str) -> Self {
        self.info.text = text.to_string();
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.info.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, classes: &str) -> Self {
        self.info.classes = classes.to_string();
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.info.role = Some(role.to_string());
        self
    }

    pub fn href(mut self, href: &str) -> Self {
        self.info.href = Some(href.to_string());
        self
    }

    pub fn disable_option(mut self, index: usize) -> Self {
        if let Some(option) = self.options.get_mut(index) {
            option.disabled = true;
        }
        self
    }

    pub fn on_click(mut self, effect: ClickEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    /// Interactions with this element never complete
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Interactions with this element return a browser error
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }
}

#[derive(Debug, Clone)]
struct MockModal {
    tabs: Vec<PopupTab>,
    buttons: Vec<PopupButton>,
    close_selector: String,
}

#[derive(Debug, Default)]
struct MockState {
    url: String,
    elements: HashMap<String, MockElement>,
    /// Selectors handed out by `find_by_text` that address table headers
    header_refs: HashSet<String>,
    modals: Vec<MockModal>,
    iframes: Vec<String>,
    overlays: usize,
    extra_tabs: Vec<String>,
    loaded_rows: usize,
    escape_closes: bool,
    screenshots_fail: bool,
    stall_iframe_removal: bool,
    dead: bool,
    modal_seq: usize,
    clicks: Vec<String>,
    points: Vec<(f64, f64)>,
    keys: Vec<String>,
    fills: Vec<(String, String)>,
    navigations: Vec<String>,
    shut_down: bool,
}

enum Outcome<T> {
    Done(EngineResult<T>),
    Hang,
}

/// In-memory page. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    state: Arc<Mutex<MockState>>,
}

impl MockPage {
    pub fn new(url: &str) -> Self {
        let page = Self::default();
        {
            let mut state = page.state.lock();
            state.url = url.to_string();
            state.escape_closes = true;
        }
        page
    }

    pub fn with_element(self, selector: &str, element: MockElement) -> Self {
        self.state.lock().elements.insert(selector.to_string(), element);
        self
    }

    pub fn with_iframe(self, src: &str) -> Self {
        self.state.lock().iframes.push(src.to_string());
        self
    }

    pub fn with_overlay(self) -> Self {
        self.state.lock().overlays += 1;
        self
    }

    pub fn with_modal(self, tabs: &[&str], buttons: &[&str]) -> Self {
        {
            let mut state = self.state.lock();
            let tabs = tabs.iter().map(|t| t.to_string()).collect();
            let buttons = buttons.iter().map(|b| b.to_string()).collect();
            open_modal(&mut state, tabs, buttons);
        }
        self
    }

    /// Whether an Escape press dismisses the topmost modal (default true)
    pub fn escape_closes_modals(self, closes: bool) -> Self {
        self.state.lock().escape_closes = closes;
        self
    }

    pub fn failing_screenshots(self) -> Self {
        self.state.lock().screenshots_fail = true;
        self
    }

    /// Iframe removal never returns
    pub fn stalled_iframe_removal(self) -> Self {
        self.state.lock().stall_iframe_removal = true;
        self
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().clicks.clone()
    }

    pub fn clicked(&self, selector: &str) -> bool {
        self.state.lock().clicks.iter().any(|c| c == selector)
    }

    pub fn point_clicks(&self) -> usize {
        self.state.lock().points.len()
    }

    pub fn key_presses(&self, key: &str) -> usize {
        self.state.lock().keys.iter().filter(|k| *k == key).count()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.state.lock().fills.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    pub fn iframe_count(&self) -> usize {
        self.state.lock().iframes.len()
    }

    pub fn modal_count(&self) -> usize {
        self.state.lock().modals.len()
    }

    pub fn open_tabs(&self) -> usize {
        self.state.lock().extra_tabs.len() + 1
    }

    /// Value of the selected option of a select element
    pub fn selected_value(&self, selector: &str) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(selector)?
            .options
            .iter()
            .find(|o| o.selected)
            .map(|o| o.value.clone())
    }

    pub fn was_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    pub fn kill(&self) {
        self.state.lock().dead = true;
    }

    /// Run `f` against the state unless the session is dead
    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> EngineResult<T>) -> EngineResult<T> {
        let mut state = self.state.lock();
        if state.dead {
            return Err(EngineError::SessionFailure("browser connection closed".into()));
        }
        f(&mut state)
    }

    /// Like `with_state`, but honours hanging elements. The lock is released
    /// before the caller suspends.
    fn interact<T>(
        &self,
        selector: &str,
        f: impl FnOnce(&mut MockState) -> EngineResult<T>,
    ) -> Outcome<T> {
        let result = self.with_state(|state| {
            match state.elements.get(selector) {
                Some(element) if element.hang => return Ok(None),
                Some(element) => {
                    if let Some(message) = &element.failure {
                        return Err(EngineError::Browser(message.clone()));
                    }
                }
                None => {}
            }
            f(state).map(Some)
        });
        match result {
            Ok(Some(value)) => Outcome::Done(Ok(value)),
            Ok(None) => Outcome::Hang,
            Err(e) => Outcome::Done(Err(e)),
        }
    }

    async fn settle<T>(outcome: Outcome<T>) -> EngineResult<T> {
        match outcome {
            Outcome::Done(result) => result,
            Outcome::Hang => std::future::pending().await,
        }
    }
}

fn open_modal(state: &mut MockState, tabs: Vec<String>, buttons: Vec<String>) {
    state.modal_seq += 1;
    let seq = state.modal_seq;
    let tabs = tabs
        .into_iter()
        .enumerate()
        .map(|(i, text)| PopupTab {
            text,
            selector: format!("#modal-{seq}-tab-{i}"),
            kind: TabKind::Tab,
            active: i == 0,
            parent_selector: None,
        })
        .collect();
    let buttons = buttons
        .into_iter()
        .enumerate()
        .map(|(i, text)| PopupButton {
            text,
            selector: format!("#modal-{seq}-button-{i}"),
        })
        .collect();
    state.modals.push(MockModal {
        tabs,
        buttons,
        close_selector: format!("#modal-{seq}-close"),
    });
}

fn not_found(selector: &str) -> EngineError {
    EngineError::ElementNotFound {
        selector: selector.to_string(),
    }
}

fn click_in_state(state: &mut MockState, selector: &str) -> EngineResult<()> {
    if let Some(pos) = state.modals.iter().position(|m| m.close_selector == selector) {
        state.modals.remove(pos);
        state.clicks.push(selector.to_string());
        return Ok(());
    }

    for modal in state.modals.iter_mut() {
        if modal.tabs.iter().any(|t| t.selector == selector) {
            for tab in modal.tabs.iter_mut() {
                tab.active = tab.selector == selector;
            }
            state.clicks.push(selector.to_string());
            return Ok(());
        }
        if modal.buttons.iter().any(|b| b.selector == selector) {
            state.clicks.push(selector.to_string());
            return Ok(());
        }
    }

    if state.header_refs.contains(selector) {
        state.clicks.push(selector.to_string());
        return Ok(());
    }

    let effect = state
        .elements
        .get(selector)
        .ok_or_else(|| not_found(selector))?
        .effect
        .clone();
    state.clicks.push(selector.to_string());

    match effect {
        Some(ClickEffect::OpenModal { tabs, buttons }) => open_modal(state, tabs, buttons),
        Some(ClickEffect::OpenIframe(src)) => state.iframes.push(src),
        Some(ClickEffect::OpenTab(url)) => state.extra_tabs.push(url),
        Some(ClickEffect::Navigate(url)) => state.url = url,
        Some(ClickEffect::LoadRows(n)) => state.loaded_rows += n,
        Some(ClickEffect::Crash) => {
            state.dead = true;
            return Err(EngineError::SessionFailure("browser crashed".into()));
        }
        None => {}
    }
    Ok(())
}

fn host_of(src: &str) -> String {
    url::Url::parse(src)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| src.to_lowercase())
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str) -> EngineResult<()> {
        self.with_state(|state| {
            state.url = url.to_string();
            state.navigations.push(url.to_string());
            Ok(())
        })
    }

    async fn current_url(&self) -> EngineResult<String> {
        self.with_state(|state| Ok(state.url.clone()))
    }

    async fn wait_for_selector(&self, selector: &str, _timeout: Duration) -> EngineResult<bool> {
        self.with_state(|state| Ok(state.elements.contains_key(selector)))
    }

    async fn element_info(&self, selector: &str) -> EngineResult<Option<ElementInfo>> {
        self.with_state(|state| Ok(state.elements.get(selector).map(|e| e.info.clone())))
    }

    async fn table_rows(&self, selector: &str) -> EngineResult<TableRows> {
        self.with_state(|state| {
            Ok(state
                .elements
                .get(selector)
                .map(|e| e.rows)
                .unwrap_or_default())
        })
    }

    async fn find_by_text(&self, scope: &str, _candidates: &str, text: &str) -> EngineResult<Option<String>> {
        self.with_state(|state| {
            let wanted = text.trim().to_lowercase();
            let position = state.elements.get(scope).and_then(|e| {
                e.headers
                    .iter()
                    .position(|h| h.to_lowercase().contains(&wanted))
            });
            Ok(position.map(|i| {
                let reference = format!("{scope} th:nth-child({})", i + 1);
                state.header_refs.insert(reference.clone());
                reference
            }))
        })
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        Self::settle(self.interact(selector, |state| click_in_state(state, selector))).await
    }

    async fn click_at(&self, x: f64, y: f64) -> EngineResult<()> {
        self.with_state(|state| {
            state.points.push((x, y));
            Ok(())
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> EngineResult<()> {
        Self::settle(self.interact(selector, |state| {
            if !state.elements.contains_key(selector) {
                return Err(not_found(selector));
            }
            state.fills.push((selector.to_string(), value.to_string()));
            Ok(())
        }))
        .await
    }

    async fn select_option(&self, selector: &str, value: &str) -> EngineResult<()> {
        Self::settle(self.interact(selector, |state| {
            let element = state.elements.get_mut(selector).ok_or_else(|| not_found(selector))?;
            if !element.options.iter().any(|o| o.value == value || o.text == value) {
                return Err(not_found(&format!("{selector} option '{value}'")));
            }
            for option in element.options.iter_mut() {
                option.selected = option.value == value || option.text == value;
            }
            Ok(())
        }))
        .await
    }

    async fn press_key(&self, key: &str) -> EngineResult<()> {
        self.with_state(|state| {
            state.keys.push(key.to_string());
            if key == "Escape" && state.escape_closes {
                state.modals.pop();
            }
            Ok(())
        })
    }

    async fn scroll_by(&self, _dy: i64) -> EngineResult<()> {
        self.with_state(|_| Ok(()))
    }

    async fn dropdown_options(&self, selector: &str) -> EngineResult<Vec<DropdownOption>> {
        self.with_state(|state| {
            Ok(state
                .elements
                .get(selector)
                .map(|e| e.options.clone())
                .unwrap_or_default())
        })
    }

    async fn page_signature(&self) -> EngineResult<PageSignature> {
        self.with_state(|state| {
            let table_rows: usize = state.elements.values().map(|e| e.rows.data_rows()).sum();
            // Each select filters the table by its selected index
            let filter: usize = state
                .elements
                .values()
                .filter_map(|e| e.options.iter().position(|o| o.selected))
                .sum();
            Ok(PageSignature {
                url: state.url.clone(),
                has_table: state.elements.values().any(|e| e.info.tag == "table"),
                has_form: state.elements.values().any(|e| e.info.tag == "form"),
                row_count: table_rows + state.loaded_rows + filter,
                visible_element_count: state.elements.values().filter(|e| e.info.visible).count(),
            })
        })
    }

    async fn popup_state(&self) -> EngineResult<PopupState> {
        self.with_state(|state| {
            Ok(PopupState {
                visible_modal_count: state.modals.len(),
                visible_iframe_count: state.iframes.len(),
                overlay_count: state.overlays,
            })
        })
    }

    async fn popup_tabs(&self) -> EngineResult<Vec<PopupTab>> {
        self.with_state(|state| Ok(state.modals.first().map(|m| m.tabs.clone()).unwrap_or_default()))
    }

    async fn popup_buttons(&self, limit: usize) -> EngineResult<Vec<PopupButton>> {
        self.with_state(|state| {
            Ok(state
                .modals
                .first()
                .map(|m| m.buttons.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    async fn popup_content(&self) -> EngineResult<Option<PopupContent>> {
        self.with_state(|state| {
            Ok(state.modals.first().map(|m| PopupContent {
                has_table: false,
                has_form: false,
                has_list: !m.tabs.is_empty(),
                button_count: m.buttons.len(),
                input_count: 0,
            }))
        })
    }

    async fn close_button(&self) -> EngineResult<Option<String>> {
        self.with_state(|state| Ok(state.modals.last().map(|m| m.close_selector.clone())))
    }

    async fn iframe_sources(&self) -> EngineResult<Vec<String>> {
        self.with_state(|state| Ok(state.iframes.clone()))
    }

    async fn remove_iframes(&self, hosts: &[String]) -> EngineResult<usize> {
        if self.with_state(|state| Ok(state.stall_iframe_removal))? {
            return std::future::pending().await;
        }
        self.with_state(|state| {
            let before = state.iframes.len();
            if hosts.is_empty() {
                state.iframes.clear();
            } else {
                state.iframes.retain(|src| {
                    let host = host_of(src);
                    !hosts.iter().any(|h| host.contains(&h.to_lowercase()))
                });
            }
            Ok(before - state.iframes.len())
        })
    }

    async fn hide_overlays(&self) -> EngineResult<usize> {
        self.with_state(|state| {
            let hidden = state.modals.len() + state.overlays;
            state.modals.clear();
            state.overlays = 0;
            Ok(hidden)
        })
    }

    async fn fonts_ready(&self) -> EngineResult<()> {
        self.with_state(|_| Ok(()))
    }

    async fn images_ready(&self, _per_image: Duration) -> EngineResult<()> {
        self.with_state(|_| Ok(()))
    }

    async fn network_idle(&self, _timeout: Duration) -> EngineResult<()> {
        self.with_state(|_| Ok(()))
    }

    async fn screenshot(&self, full_page: bool) -> EngineResult<Vec<u8>> {
        self.with_state(|state| {
            if state.screenshots_fail {
                return Err(EngineError::Browser("screenshot unavailable".into()));
            }
            let tag: &[u8] = if full_page { b"full" } else { b"viewport" };
            let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
            bytes.extend_from_slice(tag);
            Ok(bytes)
        })
    }

    async fn tab_count(&self) -> EngineResult<usize> {
        self.with_state(|state| Ok(state.extra_tabs.len() + 1))
    }

    async fn close_extra_tabs(&self) -> EngineResult<usize> {
        self.with_state(|state| {
            let closed = state.extra_tabs.len();
            state.extra_tabs.clear();
            Ok(closed)
        })
    }

    async fn shutdown(&self) -> EngineResult<()> {
        self.state.lock().shut_down = true;
        Ok(())
    }
}

/// Hands out one pre-built [`MockPage`], or fails like a browser that will not start
#[derive(Debug, Clone)]
pub struct MockLauncher {
    page: Option<MockPage>,
}

impl MockLauncher {
    pub fn new(page: MockPage) -> Self {
        Self { page: Some(page) }
    }

    pub fn failing() -> Self {
        Self { page: None }
    }
}

#[async_trait]
impl Launcher for MockLauncher {
    async fn launch(&self, _settings: &BrowserSettings) -> EngineResult<Arc<dyn PageDriver>> {
        match &self.page {
            Some(page) => Ok(Arc::new(page.clone())),
            None => Err(EngineError::SessionFailure("failed to launch browser".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_select_option_updates_selection() {
        let page = MockPage::new("https://app.example.com")
            .with_element("#region", MockElement::select(&["All", "North", "South"]));

        page.select_option("#region", "north").await.unwrap();
        assert_eq!(page.selected_value("#region").as_deref(), Some("north"));
        assert!(page.select_option("#region", "west").await.is_err());
    }

    #[tokio::test]
    async fn test_click_effects() {
        let page = MockPage::new("https://app.example.com")
            .with_element("#help", MockElement::button("Help").on_click(ClickEffect::OpenTab("https://docs.example.com".into())))
            .with_element(
                "#share",
                MockElement::button("Share").on_click(ClickEffect::OpenModal {
                    tabs: vec!["Link".into(), "Email".into()],
                    buttons: vec![],
                }),
            );

        page.click("#help").await.unwrap();
        assert_eq!(page.tab_count().await.unwrap(), 2);

        page.click("#share").await.unwrap();
        let tabs = page.popup_tabs().await.unwrap();
        assert_eq!(tabs.len(), 2);
        assert!(tabs[0].active);

        page.click(&tabs[1].selector).await.unwrap();
        assert!(page.popup_tabs().await.unwrap()[1].active);

        page.press_key("Escape").await.unwrap();
        assert_eq!(page.modal_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_element_is_not_found() {
        let page = MockPage::new("https://app.example.com");
        let err = page.click("#nope").await.unwrap_err();
        assert!(matches!(err, EngineError::ElementNotFound { .. }));
    }

    #[tokio::test]
    async fn test_remove_iframes_by_host() {
        let page = MockPage::new("https://app.example.com")
            .with_iframe("https://accounts.google.com/o/oauth2")
            .with_iframe("https://cdn.example.com/widget");

        let removed = page.remove_iframes(&["accounts.google.com".into()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(page.iframe_count(), 1);

        page.remove_iframes(&[]).await.unwrap();
        assert_eq!(page.iframe_count(), 0);
    }

    #[tokio::test]
    async fn test_dead_session_fails_every_call() {
        let page = MockPage::new("https://app.example.com");
        page.kill();
        assert!(page.current_url().await.unwrap_err().is_fatal());
    }
}
