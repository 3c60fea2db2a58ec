//! Run orchestrator
//!
//! Owns the browser session for a whole run and walks the queue in order.
//! Every queued spec yields exactly one record, whatever happens to the page.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use autoqa_common::{
    ActionKind, ActionResult, Credentials, Progress, RunConfig, RunReport, TestRecord, TestSpec,
    TestStatus,
};

use crate::auth::AuthFlow;
use crate::browser::{ChromiumLauncher, Launcher, PageDriver};
use crate::error::{tolerate, EngineError, EngineResult};
use crate::executor::ActionExecutor;
use crate::guard::{InterstitialGuard, KeywordClassifier, LoginClassifier};
use crate::monitor::PopupMonitor;
use crate::observer::{NoopObserver, RunObserver};
use crate::screenshot::ScreenshotStore;
use crate::stability::StabilityWaiter;
use crate::tracker::{ElementFailureTracker, TestedElementSet};
use crate::watchdog::StuckDetector;

/// Why a spec is skipped before the run starts, if it is
pub fn prefilter_reason(classifier: &dyn LoginClassifier, spec: &TestSpec) -> Option<String> {
    if spec.action == ActionKind::Authenticate {
        return None;
    }
    if spec.block {
        return Some("Pre-filtered: flagged to skip".to_string());
    }
    [spec.name.as_str(), spec.selector.as_str()]
        .into_iter()
        .find_map(|subject| {
            classifier
                .classify(subject)
                .map(|keyword| format!("Pre-filtered: '{}' matches blocked keyword '{}'", subject, keyword))
        })
}

/// Accumulated results and bookkeeping of one run
struct RunState {
    run_id: String,
    total: usize,
    records: Vec<TestRecord>,
    tested: TestedElementSet,
    failures: ElementFailureTracker,
}

impl RunState {
    fn record_id(&self, index: usize) -> String {
        format!("{}-t-{}", self.run_id, index)
    }

    fn count(&self, status: TestStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    fn progress(&self, current: &str) -> Progress {
        let passed_tests = self.count(TestStatus::Passed);
        let failed_tests = self.count(TestStatus::Failed);
        let skipped_tests = self.count(TestStatus::Skipped);
        Progress {
            total_tests: self.total,
            passed_tests,
            failed_tests,
            skipped_tests,
            pending: self.total - self.records.len(),
            current_test_name: current.to_string(),
        }
    }
}

/// Everything the main loop needs for one run
struct Session<'a> {
    page: Arc<dyn PageDriver>,
    guard: Arc<InterstitialGuard>,
    stability: StabilityWaiter,
    detector: &'a StuckDetector,
    screenshots: ScreenshotStore,
    authenticated: bool,
}

enum TestOutcome {
    Finished(ActionResult),
    TimedOut,
    Stuck,
}

/// Drives a queue of specs against a single browser session
pub struct TestRunner {
    config: RunConfig,
    launcher: Arc<dyn Launcher>,
    auth: Option<Arc<dyn AuthFlow>>,
    observer: Arc<dyn RunObserver>,
    classifier: Option<Arc<dyn LoginClassifier>>,
}

impl TestRunner {
    pub fn new(config: RunConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            auth: None,
            observer: Arc::new(NoopObserver),
            classifier: None,
        }
    }

    /// Runner backed by a local Chrome
    pub fn chromium(config: RunConfig) -> Self {
        Self::new(config, Arc::new(ChromiumLauncher::new()))
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthFlow>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the keyword-based external login classifier
    pub fn with_classifier(mut self, classifier: Arc<dyn LoginClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn classifier(&self) -> EngineResult<Arc<dyn LoginClassifier>> {
        match &self.classifier {
            Some(classifier) => Ok(classifier.clone()),
            None => Ok(Arc::new(KeywordClassifier::with_defaults(
                &self.config.policy.extra_blocked_keywords,
            )?)),
        }
    }

    /// Pre-filter verdict for every spec, in queue order
    pub fn prefilter(&self, specs: &[TestSpec]) -> EngineResult<Vec<Option<String>>> {
        let classifier = self.classifier()?;
        Ok(specs
            .iter()
            .map(|spec| prefilter_reason(classifier.as_ref(), spec))
            .collect())
    }

    /// Run `specs` against `target_url`.
    ///
    /// Only configuration problems are returned as errors. An unusable target
    /// URL or a session failure ends the run early but still produces a
    /// report covering every spec.
    pub async fn run(
        &self,
        target_url: &str,
        specs: &[TestSpec],
        credentials: Option<&Credentials>,
    ) -> EngineResult<RunReport> {
        self.config.validate()?;
        let classifier = self.classifier()?;
        let prefiltered: Vec<Option<String>> = specs
            .iter()
            .map(|spec| prefilter_reason(classifier.as_ref(), spec))
            .collect();

        let started_at = chrono::Utc::now();
        let start = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut state = RunState {
            run_id: run_id.clone(),
            total: specs.len(),
            records: Vec::with_capacity(specs.len()),
            tested: TestedElementSet::default(),
            failures: ElementFailureTracker::new(self.config.policy.failure_threshold),
        };

        info!(run_id = %run_id, target = target_url, tests = specs.len(), "Starting run");
        self.observer.on_progress(&state.progress(""));

        let mut aborted: Option<String> = None;
        let mut video_path = None;

        let session = match InterstitialGuard::new(target_url, classifier.clone(), &self.config.policy.extra_login_hosts) {
            Ok(guard) => self
                .launcher
                .launch(&self.config.browser)
                .await
                .map(|page| (page, Arc::new(guard))),
            Err(e) => Err(e),
        };

        match session {
            Ok((page, guard)) => {
                video_path = page.video_path();
                let detector = StuckDetector::spawn(self.config.timeouts.stuck_threshold());
                let mut monitor = None;

                let outcome = AssertUnwindSafe(self.drive(
                    target_url,
                    specs,
                    &prefiltered,
                    credentials,
                    page.clone(),
                    guard.clone(),
                    &detector,
                    &mut monitor,
                    &mut state,
                ))
                .catch_unwind()
                .await;

                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        error!("Run aborted: {}", e);
                        aborted = Some(e.to_string());
                    }
                    Err(_) => {
                        error!("Run aborted: main loop panicked");
                        aborted = Some("main loop panicked".to_string());
                    }
                }

                if let Some(monitor) = monitor {
                    let stats = monitor.stop().await;
                    debug!(?stats, "Popup monitor finished");
                }
                detector.stop().await;
                if let Err(e) = page.shutdown().await {
                    warn!("Browser shutdown failed: {}", e);
                }
            }
            Err(e) => {
                error!("Could not start session: {}", e);
                aborted = Some(e.to_string());
            }
        }

        // Cover whatever the main loop did not reach
        while state.records.len() < specs.len() {
            let index = state.records.len();
            let spec = &specs[index];
            let reason = match (&prefiltered[index], &aborted) {
                (Some(reason), _) => reason.clone(),
                (None, Some(cause)) => format!("Run aborted: {}", cause),
                (None, None) => "Run ended before this test".to_string(),
            };
            let id = state.record_id(index);
            self.push_record(&mut state, TestRecord::skipped(id, spec.name.clone(), reason));
        }

        let report = RunReport {
            run_id: run_id.clone(),
            target_url: target_url.to_string(),
            started_at,
            total: specs.len(),
            passed: state.count(TestStatus::Passed),
            failed: state.count(TestStatus::Failed),
            skipped: state.count(TestStatus::Skipped),
            duration_ms: start.elapsed().as_millis() as u64,
            records: state.records,
            video_path,
            aborted,
        };

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            report.passed, report.failed, report.skipped, report.duration_ms
        );

        let results_path = self.config.output_dir.join(&run_id).join("results.json");
        if let Err(e) = Self::write_results(&report, &results_path) {
            warn!("Failed to write {}: {}", results_path.display(), e);
        }

        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        target_url: &str,
        specs: &[TestSpec],
        prefiltered: &[Option<String>],
        credentials: Option<&Credentials>,
        page: Arc<dyn PageDriver>,
        guard: Arc<InterstitialGuard>,
        detector: &StuckDetector,
        monitor: &mut Option<PopupMonitor>,
        state: &mut RunState,
    ) -> EngineResult<()> {
        let stability = StabilityWaiter::new(self.config.timeouts.stability_timeout());

        tolerate("open target", page.goto(target_url).await)?;
        stability.wait(page.as_ref()).await;

        let authenticated = match (&self.auth, credentials) {
            (Some(auth), Some(credentials)) => {
                let ok = tolerate("authenticate", auth.authenticate(page.as_ref(), credentials).await)?
                    .unwrap_or(false);
                guard.reconcile_tabs(page.as_ref()).await?;
                ok
            }
            _ => false,
        };

        *monitor = Some(PopupMonitor::spawn(
            page.clone(),
            guard.clone(),
            self.config.policy.monitor_interval(),
        ));

        let session = Session {
            page,
            guard,
            stability,
            detector,
            screenshots: ScreenshotStore::new(&self.config.output_dir, &state.run_id),
            authenticated,
        };

        for (index, spec) in specs.iter().enumerate() {
            self.observer.on_progress(&state.progress(&spec.name));

            let skip = prefiltered[index]
                .clone()
                .or_else(|| Self::skip_reason(state, spec, self.config.policy.failure_threshold));
            if let Some(reason) = skip {
                info!("⊘ {} - {}", spec.name, reason);
                let id = state.record_id(index);
                self.push_record(state, TestRecord::skipped(id, spec.name.clone(), reason));
                continue;
            }

            self.run_test(&session, state, index, spec).await?;
        }
        Ok(())
    }

    fn skip_reason(state: &RunState, spec: &TestSpec, threshold: u32) -> Option<String> {
        if spec.action == ActionKind::Authenticate {
            return None;
        }
        let key = spec.element_key();
        if state.tested.contains(&key) {
            return Some(format!("Duplicate element: {} already tested", key));
        }
        if state.failures.is_tripped(&spec.selector) {
            return Some(format!(
                "Element {} failed {} times (threshold {})",
                spec.selector,
                state.failures.failures(&spec.selector),
                threshold
            ));
        }
        None
    }

    async fn run_test(&self, session: &Session<'_>, state: &mut RunState, index: usize, spec: &TestSpec) -> EngineResult<()> {
        let page = session.page.as_ref();
        let start = Instant::now();
        debug!(index, name = %spec.name, "Running test");

        session.detector.enter(index);
        let outcome = tokio::select! {
            biased;
            _ = session.detector.stuck_on(index) => Ok(TestOutcome::Stuck),
            outcome = self.execute_with_deadline(session, spec) => outcome,
        };
        session.detector.leave();

        let id = state.record_id(index);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let timeouts = &self.config.timeouts;

        let mut record = match outcome {
            Ok(TestOutcome::Finished(result)) => TestRecord::from_result(id, spec.name.clone(), &result, elapsed_ms),
            Ok(TestOutcome::TimedOut) => {
                let err = EngineError::ActionTimeout {
                    seconds: timeouts.test_deadline().as_secs(),
                };
                TestRecord::from_result(id, spec.name.clone(), &ActionResult::fail(err.to_string()), elapsed_ms)
            }
            Ok(TestOutcome::Stuck) => {
                let err = EngineError::StuckTest {
                    seconds: timeouts.stuck_threshold().as_secs(),
                };
                let mut record = TestRecord::skipped(id, spec.name.clone(), err.to_string());
                record.execution_time_ms = elapsed_ms;
                if let Err(e) = session.guard.force_cleanup(page, timeouts.cleanup_budget()).await {
                    self.push_record(state, record);
                    return Err(e);
                }
                record
            }
            Err(e) => {
                let record = TestRecord::from_result(id, spec.name.clone(), &ActionResult::fail(e.to_string()), elapsed_ms);
                self.push_record(state, record);
                return Err(e);
            }
        };

        match record.status {
            TestStatus::Passed => {
                state.tested.insert(spec.element_key());
                state.failures.record_success(&spec.selector);
                info!("✓ {} ({} ms)", record.name, record.execution_time_ms);
            }
            status => {
                if spec.action != ActionKind::Authenticate {
                    let count = state.failures.record_failure(&spec.selector);
                    debug!(selector = %spec.selector, count, "Recorded element failure");
                }
                let message = record.error_message.as_deref().unwrap_or("unknown error");
                if status == TestStatus::Failed {
                    error!("✗ {} - {}", record.name, message);
                } else {
                    warn!("⊘ {} - {}", record.name, message);
                }
            }
        }

        let budget = timeouts.cleanup_budget();
        match tokio::time::timeout(budget, session.screenshots.capture(page, index, record.status)).await {
            Ok(Ok(shot)) => record.screenshot = shot.map(|(path, _)| path),
            Ok(Err(e)) => {
                self.push_record(state, record);
                return Err(e);
            }
            Err(_) => warn!("Screenshot for '{}' timed out", spec.name),
        }

        match tokio::time::timeout(budget, session.guard.reconcile_tabs(page)).await {
            Ok(Err(e)) if e.is_fatal() => {
                self.push_record(state, record);
                return Err(e);
            }
            Ok(_) => {}
            Err(_) => warn!("Tab reconciliation after '{}' timed out", spec.name),
        }

        self.push_record(state, record);
        Ok(())
    }

    /// Race the executor against the test deadline; on expiry the result is
    /// discarded and the page is force-cleaned
    async fn execute_with_deadline(&self, session: &Session<'_>, spec: &TestSpec) -> EngineResult<TestOutcome> {
        let page = session.page.as_ref();
        let executor = ActionExecutor::new(&session.guard, &session.stability, self.observer.as_ref())
            .capture_steps(true)
            .authenticated(session.authenticated);
        let timeouts = &self.config.timeouts;

        match tokio::time::timeout(timeouts.test_deadline(), executor.execute(spec, page)).await {
            Ok(Ok(result)) => Ok(TestOutcome::Finished(result)),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    "Test '{}' exceeded {}s; forcing cleanup",
                    spec.name,
                    timeouts.test_deadline().as_secs()
                );
                session.guard.force_cleanup(page, timeouts.cleanup_budget()).await?;
                Ok(TestOutcome::TimedOut)
            }
        }
    }

    fn push_record(&self, state: &mut RunState, record: TestRecord) {
        self.observer.on_record(&record);
        let current = record.name.clone();
        state.records.push(record);
        self.observer.on_progress(&state.progress(&current));
    }

    /// Write a report as pretty JSON
    pub fn write_results(report: &RunReport, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(path, json)?;
        info!("Results written to: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefilter_reasons() {
        let classifier = KeywordClassifier::with_defaults(&[]).unwrap();

        let blocked = TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#g");
        let flagged = TestSpec::new("Click Action - Export", ActionKind::Click, "#export").blocked();
        let login = TestSpec::new("Login - Valid Credentials", ActionKind::Authenticate, "");
        let plain = TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders");

        assert!(prefilter_reason(&classifier, &blocked).unwrap().starts_with("Pre-filtered"));
        assert_eq!(
            prefilter_reason(&classifier, &flagged).as_deref(),
            Some("Pre-filtered: flagged to skip")
        );
        assert!(prefilter_reason(&classifier, &login).is_none());
        assert!(prefilter_reason(&classifier, &plain).is_none());
    }

    #[test]
    fn test_write_results() {
        let tmp = tempfile::TempDir::new().unwrap();
        let report = RunReport {
            run_id: "run".into(),
            target_url: "https://app.example.com".into(),
            started_at: chrono::Utc::now(),
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
            records: vec![],
            video_path: None,
            aborted: None,
        };
        let path = tmp.path().join("nested").join("results.json");
        TestRunner::write_results(&report, &path).unwrap();
        let loaded: RunReport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.run_id, "run");
    }
}
