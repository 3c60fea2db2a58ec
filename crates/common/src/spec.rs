//! Loading test specs from YAML and JSON files

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use crate::error::{Error, Result};
use crate::types::TestSpec;

/// Accepted shapes of a spec file
#[derive(Deserialize)]
#[serde(untagged)]
enum SpecDocument {
    /// Generation plan as produced by the discovery collaborator
    Plan { test_cases: Vec<TestSpec> },
    List(Vec<TestSpec>),
    Single(TestSpec),
}

impl SpecDocument {
    fn into_specs(self) -> Vec<TestSpec> {
        match self {
            SpecDocument::Plan { test_cases } => test_cases,
            SpecDocument::List(specs) => specs,
            SpecDocument::Single(spec) => vec![spec],
        }
    }
}

/// Parse specs from a string. YAML is a superset of JSON, so both work.
pub fn parse_specs(content: &str) -> Result<Vec<TestSpec>> {
    let document: SpecDocument = serde_yaml::from_str(content)?;
    let specs = document.into_specs();
    for spec in &specs {
        spec.validate()?;
    }
    Ok(specs)
}

/// Load specs from a file or, recursively, from every spec file in a directory.
///
/// Directory entries are read in path order so the queue order is stable.
pub fn load_specs(path: &Path) -> Result<Vec<TestSpec>> {
    if path.is_file() {
        return load_file(path);
    }

    let mut files: Vec<_> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_spec_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let mut specs = Vec::new();
    for file in files {
        specs.extend(load_file(&file)?);
    }
    Ok(specs)
}

fn load_file(path: &Path) -> Result<Vec<TestSpec>> {
    let content = std::fs::read_to_string(path)?;
    let specs = if path.extension().map_or(false, |ext| ext == "json") {
        let document: SpecDocument = serde_json::from_str(&content)?;
        let specs = document.into_specs();
        for spec in &specs {
            spec.validate()?;
        }
        specs
    } else {
        parse_specs(&content)?
    };
    debug!("Loaded {} spec(s) from {}", specs.len(), path.display());
    Ok(specs)
}

fn is_spec_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| matches!(ext, "yaml" | "yml" | "json"))
}

impl TestSpec {
    /// Parse exactly one spec from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let spec: TestSpec = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Reject an empty queue early; the engine has nothing to do with it.
pub fn ensure_not_empty(specs: &[TestSpec]) -> Result<()> {
    if specs.is_empty() {
        return Err(Error::InvalidConfig("no test specs found".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionKind;
    use tempfile::TempDir;

    #[test]
    fn test_parse_generation_plan() {
        let yaml = r##"
test_cases:
  - name: Verify Table Data (orders)
    type: data_integrity
    action: verify_rows
    selector: "#orders"
  - name: Sort Table by Date
    action: sort
    selector: "#orders"
    header: Date
  - name: Input Interaction - Remember me
    action: input
    selector: "#remember"
    inputType: checkbox
"##;
        let specs = parse_specs(yaml).unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].kind.as_deref(), Some("data_integrity"));
        assert_eq!(specs[1].header.as_deref(), Some("Date"));
        assert_eq!(specs[2].input_type.as_deref(), Some("checkbox"));
    }

    #[test]
    fn test_parse_single_spec() {
        let spec = TestSpec::from_yaml(
            r##"
name: Click Action - Export
action: click
selector: "#export"
block: true
"##,
        )
        .unwrap();
        assert_eq!(spec.action, ActionKind::Click);
        assert!(spec.block);
    }

    #[test]
    fn test_parse_rejects_sort_without_header() {
        let err = parse_specs("- name: Sort\n  action: sort\n  selector: '#t'\n").unwrap_err();
        assert!(err.to_string().contains("header"));
    }

    #[test]
    fn test_load_directory_in_path_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("b.json"),
            r##"[{"name": "Second", "action": "click", "selector": "#b"}]"##,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("a.yaml"),
            "- name: First\n  action: click\n  selector: '#a'\n",
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let specs = load_specs(tmp.path()).unwrap();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second"]);
    }

    #[test]
    fn test_ensure_not_empty() {
        assert!(ensure_not_empty(&[]).is_err());
    }
}
