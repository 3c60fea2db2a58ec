//! Interstitial guard
//!
//! Keeps the page usable between and around actions:
//!
//! - screens elements whose click would likely start an external login flow
//! - dismisses popups, modals and login iframes after clicks
//! - closes stray tabs and pulls the page back onto the target host
//!
//! Popup sweeps are serialized by an internal lock so the background monitor
//! and the main loop never dismiss popups at the same time.

use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{ElementInfo, PageDriver};
use crate::error::{tolerate, EngineError, EngineResult};

/// Keywords that mark an element as an entry to an external login surface
pub const DEFAULT_BLOCKED_KEYWORDS: &[&str] = &[
    "analytics",
    "oauth",
    "login",
    "signin",
    "sign-in",
    "sso",
    "gmail",
    "google",
    "facebook",
    "microsoft",
    "apple",
    "github",
    "twitter",
    "linkedin",
    "okta",
    "auth0",
    "saml",
];

/// Iframe hosts that are removed when they refuse to close
pub const DEFAULT_LOGIN_HOSTS: &[&str] = &[
    "accounts.google.com",
    "login.microsoftonline.com",
    "facebook.com",
    "appleid.apple.com",
    "github.com",
    "okta.com",
    "auth0.com",
    "googletagmanager.com",
    "google-analytics.com",
    "doubleclick.net",
];

const ESCAPE_PRESSES: usize = 3;
const SAFE_POINTS: &[(f64, f64)] = &[(5.0, 5.0), (10.0, 300.0)];

/// Decides whether text belongs to an external login surface
pub trait LoginClassifier: Send + Sync {
    /// The keyword that matched, if any
    fn classify(&self, subject: &str) -> Option<String>;
}

/// Case-insensitive keyword matcher
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    pattern: Regex,
}

impl KeywordClassifier {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> EngineResult<Self> {
        let alternation = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        // An empty alternation would match everything
        let source = if alternation.is_empty() {
            "[^\\s\\S]".to_string()
        } else {
            format!("({alternation})")
        };
        let pattern = RegexBuilder::new(&source).case_insensitive(true).build()?;
        Ok(Self { pattern })
    }

    /// Built-in keywords plus `extra`
    pub fn with_defaults(extra: &[String]) -> EngineResult<Self> {
        let keywords: Vec<&str> = DEFAULT_BLOCKED_KEYWORDS
            .iter()
            .copied()
            .chain(extra.iter().map(String::as_str))
            .collect();
        Self::new(&keywords)
    }
}

impl LoginClassifier for KeywordClassifier {
    fn classify(&self, subject: &str) -> Option<String> {
        self.pattern
            .find(subject)
            .map(|m| m.as_str().to_lowercase())
    }
}

/// What a sweep did to the page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub escapes: usize,
    pub point_clicks: usize,
    pub closed_via_button: bool,
    pub iframes_removed: usize,
    pub overlays_hidden: usize,
    pub tabs_closed: usize,
    /// No popup was visible when the sweep finished
    pub clear: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabReport {
    pub tabs_closed: usize,
    /// URL the page had drifted to before it was sent back
    pub drifted_from: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub iframes_removed: usize,
    pub overlays_hidden: usize,
    pub escapes: usize,
}

pub struct InterstitialGuard {
    classifier: Arc<dyn LoginClassifier>,
    login_hosts: Vec<String>,
    original_url: String,
    target_host: Option<String>,
    sweep_lock: Mutex<()>,
}

impl std::fmt::Debug for InterstitialGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterstitialGuard")
            .field("original_url", &self.original_url)
            .field("login_hosts", &self.login_hosts.len())
            .finish()
    }
}

impl InterstitialGuard {
    pub fn new(
        original_url: &str,
        classifier: Arc<dyn LoginClassifier>,
        extra_login_hosts: &[String],
    ) -> EngineResult<Self> {
        let target_host = Url::parse(original_url)?.host_str().map(str::to_lowercase);
        let login_hosts = DEFAULT_LOGIN_HOSTS
            .iter()
            .map(|h| h.to_string())
            .chain(extra_login_hosts.iter().map(|h| h.to_lowercase()))
            .collect();
        Ok(Self {
            classifier,
            login_hosts,
            original_url: original_url.to_string(),
            target_host,
            sweep_lock: Mutex::new(()),
        })
    }

    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    pub fn classifier(&self) -> &Arc<dyn LoginClassifier> {
        &self.classifier
    }

    /// Reject a selector that names an external login surface
    pub fn screen_selector(&self, selector: &str) -> EngineResult<()> {
        self.screen(selector)
    }

    /// Reject an element whose selector, text or attributes name an external login surface
    pub fn screen_element(&self, selector: &str, info: &ElementInfo) -> EngineResult<()> {
        self.screen(selector)?;
        info.classification_subjects()
            .into_iter()
            .try_for_each(|subject| self.screen(subject))
    }

    fn screen(&self, subject: &str) -> EngineResult<()> {
        match self.classifier.classify(subject) {
            Some(keyword) => Err(EngineError::BlockedExternalLogin {
                subject: subject.chars().take(80).collect(),
                keyword,
            }),
            None => Ok(()),
        }
    }

    /// Block background sweeps while the caller works with an open popup
    pub async fn hold(&self) -> MutexGuard<'_, ()> {
        self.sweep_lock.lock().await
    }

    /// Dismiss whatever popups are visible
    pub async fn sweep(&self, page: &dyn PageDriver) -> EngineResult<SweepReport> {
        let _guard = self.sweep_lock.lock().await;
        self.sweep_unlocked(page).await
    }

    /// Sweep and close stray tabs, unless a sweep is already running or the
    /// main loop holds the guard. Used by the background monitor.
    pub async fn try_sweep(&self, page: &dyn PageDriver) -> EngineResult<Option<SweepReport>> {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            return Ok(None);
        };
        let mut report = self.sweep_unlocked(page).await?;
        if let Some(tabs) = tolerate("count tabs", page.tab_count().await)? {
            if tabs > 1 {
                report.tabs_closed = tolerate("close tabs", page.close_extra_tabs().await)?.unwrap_or(0);
            }
        }
        Ok(Some(report))
    }

    /// Sweep without taking the lock. The caller must hold it via [`hold`](Self::hold).
    pub(crate) async fn sweep_unlocked(&self, page: &dyn PageDriver) -> EngineResult<SweepReport> {
        let mut report = SweepReport::default();

        if !self.popup_visible(page).await? {
            report.clear = true;
            return Ok(report);
        }

        for _ in 0..ESCAPE_PRESSES {
            tolerate("escape", page.press_key("Escape").await)?;
            report.escapes += 1;
            if !self.popup_visible(page).await? {
                report.clear = true;
                return Ok(report);
            }
        }

        for &(x, y) in SAFE_POINTS {
            tolerate("click outside", page.click_at(x, y).await)?;
            report.point_clicks += 1;
            if !self.popup_visible(page).await? {
                report.clear = true;
                return Ok(report);
            }
        }

        if let Some(Some(close)) = tolerate("find close button", page.close_button().await)? {
            debug!(selector = %close, "Clicking popup close button");
            if tolerate("click close button", page.click(&close).await)?.is_some() {
                report.closed_via_button = true;
            }
            if !self.popup_visible(page).await? {
                report.clear = true;
                return Ok(report);
            }
        }

        // Login iframes that survived everything above are torn out
        let sources = tolerate("list iframes", page.iframe_sources().await)?.unwrap_or_default();
        if sources.iter().any(|src| self.is_login_frame(src)) {
            report.iframes_removed = tolerate("remove iframes", page.remove_iframes(&self.login_hosts).await)?.unwrap_or(0);
            report.overlays_hidden = tolerate("hide overlays", page.hide_overlays().await)?.unwrap_or(0);
            info!(
                iframes = report.iframes_removed,
                overlays = report.overlays_hidden,
                "Removed external login surfaces"
            );
        }

        report.clear = !self.popup_visible(page).await?;
        Ok(report)
    }

    async fn popup_visible(&self, page: &dyn PageDriver) -> EngineResult<bool> {
        Ok(tolerate("popup state", page.popup_state().await)?
            .map_or(false, |s| s.any_visible() || s.overlay_count > 0))
    }

    pub fn is_login_frame(&self, src: &str) -> bool {
        let host = match Url::parse(src) {
            Ok(url) => url.host_str().map(str::to_lowercase),
            Err(_) => None,
        };
        let Some(host) = host else {
            return false;
        };
        self.login_hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }

    /// Close every tab but the original and return the page to the target host
    pub async fn reconcile_tabs(&self, page: &dyn PageDriver) -> EngineResult<TabReport> {
        let mut report = TabReport::default();

        if tolerate("count tabs", page.tab_count().await)?.unwrap_or(1) > 1 {
            report.tabs_closed = tolerate("close tabs", page.close_extra_tabs().await)?.unwrap_or(0);
            debug!(closed = report.tabs_closed, "Closed extra tabs");
        }

        if let Some(current) = tolerate("read url", page.current_url().await)? {
            if self.has_drifted(&current) {
                let drift = EngineError::NavigationDrift {
                    expected: self.original_url.clone(),
                    actual: current.clone(),
                };
                warn!("{}; navigating back", drift);
                tolerate("navigate back", page.goto(&self.original_url).await)?;
                report.drifted_from = Some(current);
            }
        }
        Ok(report)
    }

    pub fn has_drifted(&self, current: &str) -> bool {
        let host = Url::parse(current)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase));
        host != self.target_host
    }

    /// Escalating cleanup after a deadline: remove every iframe, hide every
    /// overlay, then press Escape. Each step gets `budget`.
    pub async fn force_cleanup(&self, page: &dyn PageDriver, budget: Duration) -> EngineResult<CleanupReport> {
        let mut report = CleanupReport::default();

        if let Some(Some(n)) = tolerate("force remove iframes", bounded(budget, page.remove_iframes(&[])).await)? {
            report.iframes_removed = n;
        }
        if let Some(Some(n)) = tolerate("force hide overlays", bounded(budget, page.hide_overlays()).await)? {
            report.overlays_hidden = n;
        }
        for _ in 0..ESCAPE_PRESSES {
            if tolerate("force escape", bounded(budget, page.press_key("Escape")).await)?.flatten().is_some() {
                report.escapes += 1;
            }
        }

        info!(
            iframes = report.iframes_removed,
            overlays = report.overlays_hidden,
            escapes = report.escapes,
            "Force cleanup finished"
        );
        Ok(report)
    }
}

/// `None` when `fut` did not finish within `budget`
async fn bounded<T, F>(budget: Duration, fut: F) -> EngineResult<Option<T>>
where
    F: std::future::Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}
