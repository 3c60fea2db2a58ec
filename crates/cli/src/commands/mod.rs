//! CLI Commands

pub mod check;
pub mod run;

use anyhow::{Context, Result};
use std::path::Path;
use tracing::debug;

use autoqa_common::{RunConfig, TestSpec};

/// Load the run configuration, falling back to defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<RunConfig> {
    match path {
        Some(path) => {
            let config = RunConfig::load(path).with_context(|| format!("loading config {}", path.display()))?;
            debug!(path = %path.display(), "Loaded configuration");
            Ok(config)
        }
        None => Ok(RunConfig::default()),
    }
}

/// Load a non-empty spec queue from a file or directory
pub fn load_queue(path: &Path) -> Result<Vec<TestSpec>> {
    let specs = autoqa_common::load_specs(path).with_context(|| format!("loading specs from {}", path.display()))?;
    autoqa_common::spec::ensure_not_empty(&specs)?;
    Ok(specs)
}
