//! Run configuration
//!
//! Timeouts form one hierarchy:
//!
//! | Setting | Default | Bounds |
//! |---------|---------|--------|
//! | `operation_timeout_ms` | 10s | a single browser call (click, evaluate, screenshot) |
//! | `stability_timeout_ms` | 5s | one stability wait |
//! | `test_deadline_ms` | 30s | a whole test; on expiry the result is discarded and the page is force-cleaned |
//! | `stuck_threshold_ms` | 60s | wall-clock on one queue index; watchdog that force-skips if the deadline never fires |
//! | `cleanup_budget_ms` | 5s | each force-cleanup step after a deadline or stuck test |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub browser: BrowserSettings,
    pub timeouts: TimeoutSettings,
    pub policy: PolicySettings,
    /// Directory for screenshots and result files
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            browser: BrowserSettings::default(),
            timeouts: TimeoutSettings::default(),
            policy: PolicySettings::default(),
            output_dir: crate::default_output_dir(),
        }
    }
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Chrome/Chromium binary (auto-detected when unset)
    pub chrome_executable: Option<PathBuf>,
    pub operation_timeout_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            chrome_executable: None,
            operation_timeout_ms: 10_000,
            navigation_timeout_ms: 30_000,
        }
    }
}

impl BrowserSettings {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }
}

/// Deadlines applied by the run orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub test_deadline_ms: u64,
    pub stuck_threshold_ms: u64,
    pub cleanup_budget_ms: u64,
    pub stability_timeout_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            test_deadline_ms: 30_000,
            stuck_threshold_ms: 60_000,
            cleanup_budget_ms: 5_000,
            stability_timeout_ms: 5_000,
        }
    }
}

impl TimeoutSettings {
    pub fn test_deadline(&self) -> Duration {
        Duration::from_millis(self.test_deadline_ms)
    }

    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_millis(self.stuck_threshold_ms)
    }

    pub fn cleanup_budget(&self) -> Duration {
        Duration::from_millis(self.cleanup_budget_ms)
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_millis(self.stability_timeout_ms)
    }
}

/// Skip, circuit-breaking and monitoring policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    /// Consecutive failures after which a selector is skipped for the rest of the run
    pub failure_threshold: u32,
    pub monitor_interval_ms: u64,
    /// Added to the built-in external-login keyword list
    pub extra_blocked_keywords: Vec<String>,
    /// Added to the built-in external-login iframe host list
    pub extra_login_hosts: Vec<String>,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            monitor_interval_ms: 1_500,
            extra_blocked_keywords: Vec::new(),
            extra_login_hosts: Vec::new(),
        }
    }
}

impl PolicySettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

impl RunConfig {
    /// Load configuration from file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would break the deadline hierarchy
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        if t.test_deadline_ms == 0 {
            return Err(Error::InvalidConfig("test_deadline_ms must be positive".into()));
        }
        if t.stuck_threshold_ms <= t.test_deadline_ms {
            return Err(Error::InvalidConfig(format!(
                "stuck_threshold_ms ({}) must exceed test_deadline_ms ({})",
                t.stuck_threshold_ms, t.test_deadline_ms
            )));
        }
        if self.policy.failure_threshold == 0 {
            return Err(Error::InvalidConfig("failure_threshold must be at least 1".into()));
        }
        if self.policy.monitor_interval_ms == 0 {
            return Err(Error::InvalidConfig("monitor_interval_ms must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_follow_hierarchy() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeouts.test_deadline(), Duration::from_secs(30));
        assert_eq!(config.timeouts.stuck_threshold(), Duration::from_secs(60));
        assert_eq!(config.policy.failure_threshold, 3);
        assert_eq!(config.policy.monitor_interval(), Duration::from_millis(1500));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = RunConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert!(config.browser.headless);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("autoqa.toml");
        std::fs::write(
            &path,
            "[timeouts]\ntest_deadline_ms = 10000\n\n[policy]\nextra_blocked_keywords = [\"partner-portal\"]\n",
        )
        .unwrap();

        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.timeouts.test_deadline_ms, 10_000);
        assert_eq!(config.timeouts.stuck_threshold_ms, 60_000);
        assert_eq!(config.policy.extra_blocked_keywords, vec!["partner-portal"]);
    }

    #[test]
    fn test_stuck_threshold_must_exceed_deadline() {
        let mut config = RunConfig::default();
        config.timeouts.stuck_threshold_ms = config.timeouts.test_deadline_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("autoqa.toml");
        let mut config = RunConfig::default();
        config.browser.headless = false;
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert!(!loaded.browser.headless);
    }
}
