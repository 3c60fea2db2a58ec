//! Chrome driver over the DevTools protocol

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::layout::Point;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use autoqa_common::BrowserSettings;

use super::scripts;
use super::{
    DropdownOption, ElementInfo, Launcher, PageDriver, PageSignature, PopupButton, PopupContent,
    PopupState, PopupTab, TableRows,
};
use crate::error::{EngineError, EngineResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(250);
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);
const OPTION_CANDIDATES: &str = "[role=\"option\"], .dropdown-item, .option, li";

/// Launches a local Chrome/Chromium for one run
#[derive(Debug, Default, Clone)]
pub struct ChromiumLauncher;

impl ChromiumLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, settings: &BrowserSettings) -> EngineResult<Arc<dyn PageDriver>> {
        let page = ChromiumPage::launch(settings).await?;
        Ok(Arc::new(page))
    }
}

/// The single page of a run, plus the browser that owns it
pub struct ChromiumPage {
    browser: Mutex<Option<Browser>>,
    handler: parking_lot::Mutex<Option<JoinHandle<()>>>,
    page: Page,
    target_id: TargetId,
    /// Serializes page interaction between the main loop and the popup monitor
    op_lock: Mutex<()>,
    operation_timeout: Duration,
    navigation_timeout: Duration,
}

impl std::fmt::Debug for ChromiumPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromiumPage")
            .field("target_id", &self.target_id)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

#[derive(Deserialize)]
struct ResourceSnapshot {
    ready: bool,
    resources: usize,
}

#[derive(Serialize)]
struct FindByText<'a> {
    scope: &'a str,
    candidates: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct SetValue<'a> {
    selector: &'a str,
    value: &'a str,
}

impl ChromiumPage {
    pub async fn launch(settings: &BrowserSettings) -> EngineResult<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(settings.viewport_width, settings.viewport_height)
            .request_timeout(settings.operation_timeout());

        if !settings.headless {
            builder = builder.with_head();
        }

        if let Some(path) = &settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .build()
            .map_err(|e| EngineError::SessionFailure(format!("invalid browser config: {e}")))?;

        info!(
            headless = settings.headless,
            executable = ?settings.chrome_executable,
            "Launching Chrome"
        );

        let (browser, mut handler) = tokio::time::timeout(settings.navigation_timeout(), Browser::launch(config))
            .await
            .map_err(|_| EngineError::SessionFailure("browser launch timed out".into()))?
            .map_err(|e| EngineError::SessionFailure(format!("failed to launch browser: {e}")))?;

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = tokio::time::timeout(settings.navigation_timeout(), browser.new_page("about:blank"))
            .await
            .map_err(|_| EngineError::SessionFailure("page creation timed out".into()))?
            .map_err(|e| EngineError::SessionFailure(format!("failed to create page: {e}")))?;

        let target_id = page.target_id().clone();
        debug!(target = ?target_id, "Browser session ready");

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: parking_lot::Mutex::new(Some(handler_task)),
            page,
            target_id,
            op_lock: Mutex::new(()),
            operation_timeout: settings.operation_timeout(),
            navigation_timeout: settings.navigation_timeout(),
        })
    }

    fn connection_lost(&self) -> bool {
        self.handler
            .lock()
            .as_ref()
            .map_or(true, |handle| handle.is_finished())
    }

    fn map_cdp(&self, what: &str, err: CdpError) -> EngineError {
        match err {
            CdpError::Ws(_) | CdpError::ChannelSendError(_) => {
                EngineError::SessionFailure(format!("{what}: connection lost: {err}"))
            }
            _ if self.connection_lost() => EngineError::SessionFailure(format!("{what}: {err}")),
            _ => EngineError::Browser(format!("{what}: {err}")),
        }
    }

    /// Run one CDP call under the page lock and a deadline
    async fn bounded_for<T, F>(&self, what: &str, limit: Duration, fut: F) -> EngineResult<T>
    where
        F: Future<Output = Result<T, CdpError>>,
    {
        let _guard = self.op_lock.lock().await;
        match tokio::time::timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.map_cdp(what, e)),
            Err(_) => Err(EngineError::Timeout(what.to_string())),
        }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> EngineResult<T>
    where
        F: Future<Output = Result<T, CdpError>>,
    {
        self.bounded_for(what, self.operation_timeout, fut).await
    }

    async fn eval<T: DeserializeOwned>(&self, what: &str, script: &str, arg: &impl Serialize) -> EngineResult<T> {
        let params = EvaluateParams::builder()
            .expression(scripts::invoke(script, arg))
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(EngineError::Browser)?;
        let result = self.bounded(what, self.page.evaluate_expression(params)).await?;
        let value = result.value().cloned().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    async fn exists(&self, selector: &str) -> EngineResult<bool> {
        self.eval("query selector", scripts::ELEMENT_EXISTS, &selector).await
    }

    async fn require(&self, selector: &str) -> EngineResult<()> {
        if self.exists(selector).await? {
            Ok(())
        } else {
            Err(EngineError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: &str) -> EngineResult<()> {
        let params = DispatchKeyEventParams::builder()
            .r#type(kind)
            .key(key)
            .build()
            .map_err(EngineError::Browser)?;
        self.bounded("dispatch key", self.page.execute(params)).await?;
        Ok(())
    }

    async fn extra_pages(&self) -> EngineResult<Vec<Page>> {
        let browser = self.browser.lock().await;
        let browser = browser
            .as_ref()
            .ok_or_else(|| EngineError::SessionFailure("browser already closed".into()))?;
        let pages = self.bounded("list tabs", browser.pages()).await?;
        Ok(pages
            .into_iter()
            .filter(|p| p.target_id() != &self.target_id)
            .collect())
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    async fn goto(&self, url: &str) -> EngineResult<()> {
        debug!(url, "Navigating");
        self.bounded_for("navigate", self.navigation_timeout, async {
            self.page.goto(url).await.map(|_| ())
        })
        .await
    }

    async fn current_url(&self) -> EngineResult<String> {
        Ok(self.bounded("read url", self.page.url()).await?.unwrap_or_default())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> EngineResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.exists(selector).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn element_info(&self, selector: &str) -> EngineResult<Option<ElementInfo>> {
        self.eval("element info", scripts::ELEMENT_INFO, &selector).await
    }

    async fn table_rows(&self, selector: &str) -> EngineResult<TableRows> {
        self.eval("count rows", scripts::TABLE_ROWS, &selector).await
    }

    async fn find_by_text(&self, scope: &str, candidates: &str, text: &str) -> EngineResult<Option<String>> {
        let args = FindByText { scope, candidates, text };
        self.eval("find by text", scripts::FIND_BY_TEXT, &args).await
    }

    async fn click(&self, selector: &str) -> EngineResult<()> {
        self.require(selector).await?;
        self.bounded("click", async {
            let element = self.page.find_element(selector).await?;
            element.scroll_into_view().await?;
            element.click().await.map(|_| ())
        })
        .await
    }

    async fn click_at(&self, x: f64, y: f64) -> EngineResult<()> {
        self.bounded("click at point", self.page.click(Point { x, y }))
            .await
            .map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> EngineResult<()> {
        let filled: bool = self
            .eval("fill", scripts::SET_VALUE, &SetValue { selector, value })
            .await?;
        if filled {
            Ok(())
        } else {
            Err(EngineError::ElementNotFound {
                selector: selector.to_string(),
            })
        }
    }

    async fn select_option(&self, selector: &str, value: &str) -> EngineResult<()> {
        let selected: bool = self
            .eval("select option", scripts::SELECT_OPTION, &SetValue { selector, value })
            .await?;
        if selected {
            return Ok(());
        }

        // Custom dropdowns: open the control, then click the option by text
        self.click(selector).await?;
        match self.find_by_text(selector, OPTION_CANDIDATES, value).await? {
            Some(option) => self.click(&option).await,
            None => Err(EngineError::ElementNotFound {
                selector: format!("{selector} option '{value}'"),
            }),
        }
    }

    async fn press_key(&self, key: &str) -> EngineResult<()> {
        self.dispatch_key(DispatchKeyEventType::KeyDown, key).await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, key).await
    }

    async fn scroll_by(&self, dy: i64) -> EngineResult<()> {
        let _: serde_json::Value = self.eval("scroll", scripts::SCROLL_BY, &dy).await?;
        Ok(())
    }

    async fn dropdown_options(&self, selector: &str) -> EngineResult<Vec<DropdownOption>> {
        self.eval("dropdown options", scripts::DROPDOWN_OPTIONS, &selector).await
    }

    async fn page_signature(&self) -> EngineResult<PageSignature> {
        self.eval("page signature", scripts::PAGE_SIGNATURE, &()).await
    }

    async fn popup_state(&self) -> EngineResult<PopupState> {
        self.eval("popup state", scripts::POPUP_STATE, &()).await
    }

    async fn popup_tabs(&self) -> EngineResult<Vec<PopupTab>> {
        self.eval("popup tabs", scripts::POPUP_TABS, &()).await
    }

    async fn popup_buttons(&self, limit: usize) -> EngineResult<Vec<PopupButton>> {
        self.eval("popup buttons", scripts::POPUP_BUTTONS, &limit).await
    }

    async fn popup_content(&self) -> EngineResult<Option<PopupContent>> {
        self.eval("popup content", scripts::POPUP_CONTENT, &()).await
    }

    async fn close_button(&self) -> EngineResult<Option<String>> {
        self.eval("close button", scripts::CLOSE_BUTTON, &()).await
    }

    async fn iframe_sources(&self) -> EngineResult<Vec<String>> {
        self.eval("iframe sources", scripts::IFRAME_SOURCES, &()).await
    }

    async fn remove_iframes(&self, hosts: &[String]) -> EngineResult<usize> {
        let hosts: Vec<String> = hosts.iter().map(|h| h.to_lowercase()).collect();
        self.eval("remove iframes", scripts::REMOVE_IFRAMES, &hosts).await
    }

    async fn hide_overlays(&self) -> EngineResult<usize> {
        self.eval("hide overlays", scripts::HIDE_OVERLAYS, &()).await
    }

    async fn fonts_ready(&self) -> EngineResult<()> {
        let _: serde_json::Value = self.eval("fonts", scripts::FONTS_READY, &()).await?;
        Ok(())
    }

    async fn images_ready(&self, per_image: Duration) -> EngineResult<()> {
        let cap_ms = per_image.as_millis() as u64;
        let _: serde_json::Value = self.eval("images", scripts::IMAGES_READY, &cap_ms).await?;
        Ok(())
    }

    async fn network_idle(&self, timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        while Instant::now() < deadline {
            let snapshot: ResourceSnapshot = self.eval("network idle", scripts::RESOURCE_COUNT, &()).await?;
            if last_count != Some(snapshot.resources) {
                last_count = Some(snapshot.resources);
                quiet_since = Instant::now();
            } else if snapshot.ready && quiet_since.elapsed() >= NETWORK_QUIET_WINDOW {
                return Ok(());
            }
            tokio::time::sleep(NETWORK_POLL_INTERVAL).await;
        }
        Err(EngineError::Timeout("network idle".into()))
    }

    async fn screenshot(&self, full_page: bool) -> EngineResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.bounded("screenshot", self.page.screenshot(params)).await
    }

    async fn tab_count(&self) -> EngineResult<usize> {
        Ok(self.extra_pages().await?.len() + 1)
    }

    async fn close_extra_tabs(&self) -> EngineResult<usize> {
        let extras = self.extra_pages().await?;
        let mut closed = 0;
        for page in extras {
            let target = page.target_id().clone();
            match self.bounded("close tab", page.close()).await {
                Ok(()) => closed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(target = ?target, "Failed to close tab: {}", e),
            }
        }
        if closed > 0 {
            self.bounded("focus original tab", self.page.bring_to_front()).await?;
        }
        Ok(closed)
    }

    async fn shutdown(&self) -> EngineResult<()> {
        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            match tokio::time::timeout(self.operation_timeout, browser.close()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!("Browser close returned error: {}", e),
                Err(_) => warn!("Browser close timed out"),
            }
            if tokio::time::timeout(self.operation_timeout, browser.wait()).await.is_err() {
                warn!("Browser process did not exit in time");
            }
        }
        if let Some(handle) = self.handler.lock().take() {
            handle.abort();
        }
        info!("Browser closed");
        Ok(())
    }
}
