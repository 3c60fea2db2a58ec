//! Core types for AutoQA

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Kind of action a test performs against its selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Require a table or ARIA grid to contain rows
    VerifyRows,
    /// Click a column header inside a table
    Sort,
    /// Fill, toggle or explore a form control
    Input,
    /// Click an element and explore whatever it opens
    Click,
    /// Covered by the session's one-time authentication step
    Authenticate,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::VerifyRows => write!(f, "verify_rows"),
            ActionKind::Sort => write!(f, "sort"),
            ActionKind::Input => write!(f, "input"),
            ActionKind::Click => write!(f, "click"),
            ActionKind::Authenticate => write!(f, "authenticate"),
        }
    }
}

/// A single queued test. Immutable once queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,

    pub action: ActionKind,

    /// CSS selector of the element under test
    #[serde(default)]
    pub selector: String,

    /// Column header text (sort)
    #[serde(default)]
    pub header: Option<String>,

    /// Input subtype such as `text`, `checkbox` or `radio` (input)
    #[serde(default, alias = "inputType")]
    pub input_type: Option<String>,

    /// Explicit skip flag set by the generator
    #[serde(default)]
    pub block: bool,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub severity: Option<String>,

    #[serde(default)]
    pub expected_result: Option<String>,

    /// Test category reported by the generator (`functional`, `data_sort`, ...)
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, action: ActionKind, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            action,
            selector: selector.into(),
            header: None,
            input_type: None,
            block: false,
            description: String::new(),
            severity: None,
            expected_result: None,
            kind: None,
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = Some(header.into());
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    pub fn blocked(mut self) -> Self {
        self.block = true;
        self
    }

    /// Identity of the element this spec exercises.
    ///
    /// Sort specs share their table selector with the row check, so the
    /// header is part of their identity.
    pub fn element_key(&self) -> String {
        match (&self.action, &self.header) {
            (ActionKind::Sort, Some(header)) => format!("{}::{}", self.selector, header),
            _ => self.selector.clone(),
        }
    }

    /// Check the fields each action requires
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |reason: &str| crate::Error::InvalidSpec {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }

        match self.action {
            ActionKind::Authenticate => Ok(()),
            _ if self.selector.trim().is_empty() => Err(invalid("selector is required")),
            ActionKind::Sort if self.header.as_deref().map_or(true, |h| h.trim().is_empty()) => {
                Err(invalid("sort requires a header"))
            }
            _ => Ok(()),
        }
    }
}

/// Final status of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    Skipped,
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestStatus::Passed => write!(f, "passed"),
            TestStatus::Failed => write!(f, "failed"),
            TestStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one leaf action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub passed: bool,
    pub message: String,
}

impl ActionResult {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

/// One record per queued spec, in queue order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRecord {
    pub id: String,
    pub name: String,
    pub status: TestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Message of a passing action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub execution_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
}

impl TestRecord {
    pub fn from_result(id: String, name: String, result: &ActionResult, execution_time_ms: u64) -> Self {
        let (status, error_message, detail) = if result.passed {
            (TestStatus::Passed, None, Some(result.message.clone()))
        } else {
            (TestStatus::Failed, Some(result.message.clone()), None)
        };
        Self {
            id,
            name,
            status,
            error_message,
            detail,
            execution_time_ms,
            screenshot: None,
        }
    }

    pub fn skipped(id: String, name: String, reason: impl Into<String>) -> Self {
        Self {
            id,
            name,
            status: TestStatus::Skipped,
            error_message: Some(reason.into()),
            detail: None,
            execution_time_ms: 0,
            screenshot: None,
        }
    }
}

/// Credentials handed to the authentication collaborator
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub otp: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("otp", &self.otp.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Incremental progress reported after every test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    pub pending: usize,
    pub current_test_name: String,
}

/// Result of a complete run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub target_url: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub records: Vec<TestRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    /// Set when a session failure ended the run early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_key_includes_sort_header() {
        let verify = TestSpec::new("Verify Table", ActionKind::VerifyRows, "#orders");
        let sort = TestSpec::new("Sort by Date", ActionKind::Sort, "#orders").with_header("Date");

        assert_eq!(verify.element_key(), "#orders");
        assert_eq!(sort.element_key(), "#orders::Date");
    }

    #[test]
    fn test_validate_requires_selector_and_header() {
        assert!(TestSpec::new("Click", ActionKind::Click, "").validate().is_err());
        assert!(TestSpec::new("Sort", ActionKind::Sort, "#t").validate().is_err());
        assert!(TestSpec::new("Login", ActionKind::Authenticate, "").validate().is_ok());
        assert!(TestSpec::new("Sort", ActionKind::Sort, "#t")
            .with_header("Name")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_record_from_failed_result() {
        let record = TestRecord::from_result(
            "run-t-0".into(),
            "Verify".into(),
            &ActionResult::fail("Table/Grid is empty"),
            42,
        );
        assert_eq!(record.status, TestStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("Table/Grid is empty"));
        assert!(record.detail.is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            username: "qa@example.com".into(),
            password: "hunter2".into(),
            otp: Some("123456".into()),
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("qa@example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("123456"));
    }
}
