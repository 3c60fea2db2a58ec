//! Check Command
//!
//! Loads a spec queue and reports which tests the run would pre-filter,
//! without starting a browser.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use autoqa_common::{RunConfig, TestSpec};
use autoqa_engine::TestRunner;

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Spec file or directory of spec files
    #[arg(short, long, env = "AUTOQA_SPECS")]
    pub specs: PathBuf,
}

/// Queue entry with its pre-filter verdict
#[derive(Debug, Serialize)]
pub struct SpecVerdict {
    pub index: usize,
    pub name: String,
    pub action: String,
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl TableDisplay for SpecVerdict {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Test", "Action", "Selector", "Verdict"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.name.clone(),
            self.action.clone(),
            self.selector.clone(),
            self.skip_reason.clone().unwrap_or_else(|| "run".to_string()),
        ]
    }
}

pub fn verdicts(specs: &[TestSpec], reasons: Vec<Option<String>>) -> Vec<SpecVerdict> {
    specs
        .iter()
        .zip(reasons)
        .enumerate()
        .map(|(index, (spec, skip_reason))| SpecVerdict {
            index,
            name: spec.name.clone(),
            action: spec.action.to_string(),
            selector: spec.selector.clone(),
            skip_reason,
        })
        .collect()
}

pub fn execute(args: CheckArgs, config: RunConfig, format: OutputFormat) -> Result<()> {
    let specs = super::load_queue(&args.specs)?;
    let runner = TestRunner::chromium(config);
    let verdicts = verdicts(&specs, runner.prefilter(&specs)?);

    print_list(&verdicts, format);

    if matches!(format, OutputFormat::Table) {
        let filtered = verdicts.iter().filter(|v| v.skip_reason.is_some()).count();
        if filtered > 0 {
            print_warning(&format!("{} of {} test(s) would be pre-filtered", filtered, verdicts.len()));
        } else {
            print_success(&format!("All {} test(s) would run", verdicts.len()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoqa_common::ActionKind;

    #[test]
    fn test_verdicts_follow_queue_order() {
        let specs = vec![
            TestSpec::new("Verify Table", ActionKind::VerifyRows, "#orders"),
            TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#google-btn"),
        ];
        let runner = TestRunner::chromium(RunConfig::default());
        let verdicts = verdicts(&specs, runner.prefilter(&specs).unwrap());

        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].row()[4], "run");
        assert!(verdicts[1].skip_reason.as_deref().unwrap().contains("google"));
        assert_eq!(verdicts[1].action, "click");
    }
}
