//! AutoQA Common Library
//!
//! Shared data model, spec-file loading and run configuration for the
//! AutoQA execution engine and its command-line front end.

pub mod config;
pub mod error;
pub mod spec;
pub mod types;

// Re-export commonly used types
pub use config::{BrowserSettings, PolicySettings, RunConfig, TimeoutSettings};
pub use error::{Error, Result};
pub use spec::{load_specs, parse_specs};
pub use types::*;

/// AutoQA version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default directory for screenshots and result files
pub fn default_output_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("test-results")
}
