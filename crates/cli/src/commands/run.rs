//! Run Command

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use autoqa_common::{Credentials, RunConfig, TestStatus};
use autoqa_engine::{ChannelObserver, FormLogin, RunEvent, TestRunner};

use crate::output::{print_info, print_report, print_success, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Target application URL
    #[arg(short, long, env = "AUTOQA_URL")]
    pub url: String,

    /// Spec file or directory of spec files
    #[arg(short, long, env = "AUTOQA_SPECS")]
    pub specs: PathBuf,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Per-test deadline in seconds
    #[arg(long, env = "AUTOQA_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Chrome/Chromium binary
    #[arg(long, env = "AUTOQA_CHROME")]
    pub chrome: Option<PathBuf>,

    /// Login username
    #[arg(long, env = "AUTOQA_USERNAME")]
    pub username: Option<String>,

    /// Login password
    #[arg(long, env = "AUTOQA_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// One-time code for the login form
    #[arg(long, env = "AUTOQA_OTP", hide_env_values = true)]
    pub otp: Option<String>,

    /// Directory for screenshots and results
    #[arg(short, long, env = "AUTOQA_OUTPUT")]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Layer command-line and environment overrides on top of the file config
    pub fn apply(&self, config: &mut RunConfig) {
        if self.headed {
            config.browser.headless = false;
        }
        if let Some(chrome) = &self.chrome {
            config.browser.chrome_executable = Some(chrome.clone());
        }
        if let Some(secs) = self.timeout_secs {
            let deadline_ms = secs.saturating_mul(1000);
            config.timeouts.test_deadline_ms = deadline_ms;
            // Keep the watchdog behind the deadline
            if config.timeouts.stuck_threshold_ms <= deadline_ms {
                config.timeouts.stuck_threshold_ms = deadline_ms.saturating_mul(2);
            }
        }
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
                otp: self.otp.clone(),
            }),
            _ => None,
        }
    }
}

pub async fn execute(args: RunArgs, mut config: RunConfig, format: OutputFormat, show_progress: bool) -> Result<bool> {
    args.apply(&mut config);
    let specs = super::load_queue(&args.specs)?;
    let credentials = args.credentials();
    if args.username.is_some() && credentials.is_none() {
        print_warning("Username given without a password; skipping authentication");
    }

    if matches!(format, OutputFormat::Table) {
        print_info(&format!("Running {} test(s) against {}", specs.len(), args.url));
    }

    let (observer, events) = ChannelObserver::new();
    let mut runner = TestRunner::chromium(config).with_observer(Arc::new(observer));
    if credentials.is_some() {
        runner = runner.with_auth(Arc::new(FormLogin::default()));
    }

    let progress = show_progress.then(|| spawn_progress(specs.len(), events));
    let report = runner.run(&args.url, &specs, credentials.as_ref()).await;
    // Dropping the runner closes the event channel
    drop(runner);
    if let Some(progress) = progress {
        let _ = progress.await;
    }
    let report = report?;

    print_report(&report, format);
    if report.success() && matches!(format, OutputFormat::Table) {
        print_success("All executed tests passed");
    }
    Ok(report.success())
}

fn spawn_progress(total: usize, mut events: UnboundedReceiver<RunEvent>) -> JoinHandle<()> {
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        bar.set_style(style.progress_chars("=>-"));
    }

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunEvent::Progress(progress) => {
                    let done = progress.total_tests - progress.pending;
                    bar.set_position(done as u64);
                    bar.set_message(progress.current_test_name);
                }
                RunEvent::Record(record) if record.status == TestStatus::Failed => {
                    bar.println(format!(
                        "✗ {} - {}",
                        record.name,
                        record.error_message.unwrap_or_default()
                    ));
                }
                RunEvent::Record(_) | RunEvent::Step(_) => {}
            }
        }
        bar.finish_and_clear();
    })
}
