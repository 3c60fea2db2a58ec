//! Session authentication collaborators
//!
//! A run authenticates once, before the first test. Site-specific flows
//! implement [`AuthFlow`]; [`FormLogin`] handles the common
//! username/password(/OTP) form.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

use autoqa_common::Credentials;

use crate::browser::PageDriver;
use crate::error::EngineResult;
use crate::stability::StabilityWaiter;

#[async_trait]
pub trait AuthFlow: Send + Sync {
    /// Log in on `page`. `Ok(false)` means the attempt completed but did not
    /// authenticate; errors are reserved for the browser failing underneath.
    async fn authenticate(&self, page: &dyn PageDriver, credentials: &Credentials) -> EngineResult<bool>;
}

const USERNAME_SELECTORS: &[&str] = &[
    "input[type=\"email\"]",
    "input[name=\"email\"]",
    "input[name=\"username\"]",
    "input[autocomplete=\"username\"]",
    "#username",
    "#email",
];

const PASSWORD_SELECTORS: &[&str] = &["input[type=\"password\"]", "input[name=\"password\"]", "#password"];

const OTP_SELECTORS: &[&str] = &[
    "input[autocomplete=\"one-time-code\"]",
    "input[name=\"otp\"]",
    "input[name=\"code\"]",
    "#otp",
];

const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "#login-button",
    "form button",
];

/// Generic login form filler
#[derive(Debug, Clone)]
pub struct FormLogin {
    stability: StabilityWaiter,
}

impl Default for FormLogin {
    fn default() -> Self {
        Self::new(StabilityWaiter::new(Duration::from_secs(5)))
    }
}

impl FormLogin {
    pub fn new(stability: StabilityWaiter) -> Self {
        Self { stability }
    }

    async fn first_present(&self, page: &dyn PageDriver, selectors: &[&str]) -> EngineResult<Option<String>> {
        for selector in selectors {
            if let Some(info) = page.element_info(selector).await? {
                if info.visible && !info.disabled {
                    return Ok(Some(selector.to_string()));
                }
            }
        }
        Ok(None)
    }

    async fn submit(&self, page: &dyn PageDriver) -> EngineResult<()> {
        match self.first_present(page, SUBMIT_SELECTORS).await? {
            Some(button) => page.click(&button).await,
            None => page.press_key("Enter").await,
        }
    }
}

#[async_trait]
impl AuthFlow for FormLogin {
    async fn authenticate(&self, page: &dyn PageDriver, credentials: &Credentials) -> EngineResult<bool> {
        let Some(password_field) = self.first_present(page, PASSWORD_SELECTORS).await? else {
            warn!("No password field found; skipping form login");
            return Ok(false);
        };
        let Some(username_field) = self.first_present(page, USERNAME_SELECTORS).await? else {
            warn!("No username field found; skipping form login");
            return Ok(false);
        };

        debug!(username = %credentials.username, "Submitting login form");
        page.fill(&username_field, &credentials.username).await?;
        page.fill(&password_field, &credentials.password).await?;
        self.submit(page).await?;
        self.stability.wait(page).await;

        if let Some(otp) = &credentials.otp {
            match self.first_present(page, OTP_SELECTORS).await? {
                Some(field) => {
                    page.fill(&field, otp).await?;
                    self.submit(page).await?;
                    self.stability.wait(page).await;
                }
                None => debug!("No OTP field after submit"),
            }
        }

        let still_on_form = self.first_present(page, PASSWORD_SELECTORS).await?.is_some();
        if still_on_form {
            warn!("Login form is still visible after submit");
        } else {
            info!("Authenticated as {}", credentials.username);
        }
        Ok(!still_on_form)
    }
}
