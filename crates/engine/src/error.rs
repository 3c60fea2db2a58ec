//! Error types for the execution engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Browser or context could not be created, or the connection died.
    /// The only error that aborts a run.
    #[error("Session failure: {0}")]
    SessionFailure(String),

    #[error("BLOCKED: '{subject}' matches external-login keyword '{keyword}'")]
    BlockedExternalLogin { subject: String, keyword: String },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Test timed out after {seconds}s")]
    ActionTimeout { seconds: u64 },

    #[error("Test stuck for {seconds}s, force-skipped")]
    StuckTest { seconds: u64 },

    #[error("Navigation drift: page left {expected} for {actual}")]
    NavigationDrift { expected: String, actual: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Invalid keyword pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid target URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(#[from] autoqa_common::Error),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::SessionFailure(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Swallow a non-fatal error with a warning; session failures still propagate.
pub(crate) fn tolerate<T>(what: &str, result: EngineResult<T>) -> EngineResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            tracing::warn!("{} failed: {}", what, e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_session_failure_is_fatal() {
        assert!(EngineError::SessionFailure("crashed".into()).is_fatal());
        assert!(!EngineError::Browser("detached".into()).is_fatal());
        assert!(!EngineError::ActionTimeout { seconds: 30 }.is_fatal());
    }

    #[test]
    fn test_tolerate_keeps_fatal_errors() {
        let soft: EngineResult<()> = Err(EngineError::Timeout("fonts".into()));
        assert!(matches!(tolerate("fonts", soft), Ok(None)));

        let fatal: EngineResult<()> = Err(EngineError::SessionFailure("gone".into()));
        assert!(tolerate("fonts", fatal).is_err());
    }

    #[test]
    fn test_blocked_message_is_marked() {
        let err = EngineError::BlockedExternalLogin {
            subject: "#analytics-tab".into(),
            keyword: "analytics".into(),
        };
        assert!(err.to_string().starts_with("BLOCKED"));
    }
}
