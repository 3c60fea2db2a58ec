//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use autoqa_common::{RunReport, TestRecord, TestStatus};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
    }
}

impl TableDisplay for TestRecord {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Test", "Status", "Time", "Details"]
    }

    fn row(&self) -> Vec<String> {
        let index = self.id.rsplit("-t-").next().unwrap_or_default().to_string();
        let details = match self.status {
            TestStatus::Passed => self.detail.clone(),
            _ => self.error_message.clone(),
        };
        vec![
            index,
            self.name.clone(),
            status_symbol(self.status).to_string(),
            format!("{}ms", self.execution_time_ms),
            truncate(&details.unwrap_or_default(), 80),
        ]
    }
}

fn status_symbol(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "✓ passed",
        TestStatus::Failed => "✗ failed",
        TestStatus::Skipped => "⊘ skipped",
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

/// Print a finished run: the per-test table (or the whole report as JSON)
/// followed by a coloured summary line
pub fn print_report(report: &RunReport, format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            print_list(&report.records, format);
            println!();
            println!("{}", summary_line(report));
            if let Some(cause) = &report.aborted {
                print_error(&format!("Run aborted: {}", cause));
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        }
    }
}

pub fn summary_line(report: &RunReport) -> String {
    format!(
        "Test Results: {} passed, {} failed, {} skipped of {} ({:.1}s)",
        report.passed.to_string().green(),
        report.failed.to_string().red(),
        report.skipped.to_string().yellow(),
        report.total,
        report.duration_ms as f64 / 1000.0
    )
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}
