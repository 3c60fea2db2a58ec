//! End-to-end runs against the in-memory page

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use autoqa_common::{ActionKind, Credentials, RunConfig, RunReport, TestSpec, TestStatus};
use autoqa_engine::browser::{ClickEffect, MockElement};
use autoqa_engine::{
    AuthFlow, ChannelObserver, EngineResult, MockLauncher, MockPage, PageDriver, RunEvent, TestRunner,
};

const URL: &str = "https://app.example.com/dashboard";

fn config(tmp: &TempDir) -> RunConfig {
    RunConfig {
        output_dir: tmp.path().to_path_buf(),
        ..RunConfig::default()
    }
}

async fn run(page: &MockPage, specs: &[TestSpec], tmp: &TempDir) -> RunReport {
    TestRunner::new(config(tmp), Arc::new(MockLauncher::new(page.clone())))
        .run(URL, specs, None)
        .await
        .unwrap()
}

fn assert_accounted(report: &RunReport, specs: &[TestSpec]) {
    assert_eq!(report.records.len(), specs.len());
    assert_eq!(report.passed + report.failed + report.skipped, specs.len());
    for (record, spec) in report.records.iter().zip(specs) {
        assert_eq!(record.name, spec.name);
    }
}

#[tokio::test(start_paused = true)]
async fn test_every_spec_gets_a_record_in_order() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#orders", MockElement::table(&["Id", "Date", "Amount"], 5))
        .with_element("#refresh", MockElement::button("Refresh"))
        .with_element("#search", MockElement::input("search"));

    let specs = vec![
        TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders"),
        TestSpec::new("Sort by Date", ActionKind::Sort, "#orders").with_header("Date"),
        TestSpec::new("Click Action - Refresh", ActionKind::Click, "#refresh"),
        TestSpec::new("Search Orders", ActionKind::Input, "#search"),
        TestSpec::new("Click Action - Missing", ActionKind::Click, "#missing"),
    ];

    let report = run(&page, &specs, &tmp).await;
    assert_accounted(&report, &specs);

    assert_eq!(report.records[0].detail.as_deref(), Some("Found 5 rows"));
    assert_eq!(report.records[1].detail.as_deref(), Some("Sorted by 'Date'"));
    assert_eq!(report.records[2].status, TestStatus::Passed);
    assert_eq!(report.records[3].status, TestStatus::Passed);
    assert_eq!(report.records[4].status, TestStatus::Failed);
    assert!(report.aborted.is_none());
    assert!(page.was_shut_down());

    for (index, record) in report.records.iter().enumerate() {
        assert_eq!(record.id, format!("{}-t-{}", report.run_id, index));
    }

    let results = tmp.path().join(&report.run_id).join("results.json");
    let saved: RunReport = serde_json::from_str(&std::fs::read_to_string(results).unwrap()).unwrap();
    assert_eq!(saved.records.len(), specs.len());
}

#[tokio::test(start_paused = true)]
async fn test_external_login_entries_are_never_clicked() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#analytics-tab", MockElement::button("Reports"))
        .with_element("#google", MockElement::button("Continue"))
        .with_element("#corp-link", MockElement::button("Company portal").href("https://corp.okta.com/app"))
        .with_element("#export", MockElement::button("Export"));

    let specs = vec![
        TestSpec::new("Open Reports", ActionKind::Click, "#analytics-tab"),
        TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#google"),
        TestSpec::new("Click Action - Export", ActionKind::Click, "#export").blocked(),
        TestSpec::new("Click Action - Company", ActionKind::Click, "#corp-link"),
    ];

    let report = run(&page, &specs, &tmp).await;
    assert_accounted(&report, &specs);

    for record in &report.records[..3] {
        assert_eq!(record.status, TestStatus::Skipped);
        assert!(record.error_message.as_deref().unwrap().starts_with("Pre-filtered"));
    }
    // Only the element's attributes give this one away
    assert_eq!(report.records[3].status, TestStatus::Failed);
    assert!(report.records[3].error_message.as_deref().unwrap().contains("BLOCKED"));

    assert!(page.clicks().is_empty());
    assert_eq!(page.url(), URL);
}

#[tokio::test(start_paused = true)]
async fn test_failing_element_is_circuit_broken() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL).with_element("#flaky-button", MockElement::button("Flaky").failing("node detached"));

    let specs: Vec<TestSpec> = (1..=4)
        .map(|i| TestSpec::new(format!("Click Flaky #{i}"), ActionKind::Click, "#flaky-button"))
        .collect();

    let report = run(&page, &specs, &tmp).await;
    assert_accounted(&report, &specs);

    for record in &report.records[..3] {
        assert_eq!(record.status, TestStatus::Failed);
        assert!(record.error_message.as_deref().unwrap().contains("node detached"));
    }
    let fourth = &report.records[3];
    assert_eq!(fourth.status, TestStatus::Skipped);
    assert_eq!(
        fourth.error_message.as_deref(),
        Some("Element #flaky-button failed 3 times (threshold 3)")
    );
}

#[tokio::test(start_paused = true)]
async fn test_passed_element_is_not_tested_twice() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL).with_element("#refresh", MockElement::button("Refresh"));

    let specs = vec![
        TestSpec::new("Click Action - Refresh", ActionKind::Click, "#refresh"),
        TestSpec::new("Click Action - Refresh again", ActionKind::Click, "#refresh"),
    ];

    let report = run(&page, &specs, &tmp).await;
    assert_eq!(report.records[0].status, TestStatus::Passed);
    assert_eq!(report.records[1].status, TestStatus::Skipped);
    assert!(report.records[1].error_message.as_deref().unwrap().contains("Duplicate element"));
    assert_eq!(page.clicks().iter().filter(|c| *c == "#refresh").count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropdown_is_explored_and_restored() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#orders", MockElement::table(&["Id"], 4))
        .with_element("#status-filter", MockElement::select(&["All", "Active", "Inactive"]));

    let specs = vec![TestSpec::new("Filter by Status", ActionKind::Input, "#status-filter")];

    let report = run(&page, &specs, &tmp).await;
    let record = &report.records[0];
    assert_eq!(record.status, TestStatus::Passed, "{:?}", record.error_message);
    assert!(record.detail.as_deref().unwrap().starts_with("Explored 2 option(s)"));
    assert_eq!(page.selected_value("#status-filter").as_deref(), Some("all"));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_action_fails_at_the_deadline() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#frozen", MockElement::button("Generate report").hanging())
        .with_element("#orders", MockElement::table(&["Id"], 2))
        .with_iframe("https://widgets.example.net/chat");

    let specs = vec![
        TestSpec::new("Click Action - Generate", ActionKind::Click, "#frozen"),
        TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders"),
    ];

    let start = Instant::now();
    let report = run(&page, &specs, &tmp).await;
    assert_accounted(&report, &specs);

    let timed_out = &report.records[0];
    assert_eq!(timed_out.status, TestStatus::Failed);
    assert_eq!(timed_out.error_message.as_deref(), Some("Test timed out after 30s"));
    assert!(timed_out.execution_time_ms >= 30_000);
    assert!(timed_out.execution_time_ms < 31_000);

    // Force cleanup tore out the iframe and the queue carried on
    assert_eq!(page.iframe_count(), 0);
    assert_eq!(report.records[1].status, TestStatus::Passed);
    assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_skips_the_rest() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#orders", MockElement::table(&["Id"], 2))
        .with_element("#crash", MockElement::button("Crash").on_click(ClickEffect::Crash))
        .with_element("#refresh", MockElement::button("Refresh"));

    let specs = vec![
        TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders"),
        TestSpec::new("Click Action - Crash", ActionKind::Click, "#crash"),
        TestSpec::new("Click Action - Refresh", ActionKind::Click, "#refresh"),
        TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#google"),
    ];

    let report = run(&page, &specs, &tmp).await;
    assert_accounted(&report, &specs);

    assert_eq!(report.records[0].status, TestStatus::Passed);
    assert_eq!(report.records[1].status, TestStatus::Failed);
    assert_eq!(report.records[2].status, TestStatus::Skipped);
    assert!(report.records[2].error_message.as_deref().unwrap().starts_with("Run aborted"));
    assert!(report.records[3].error_message.as_deref().unwrap().starts_with("Pre-filtered"));
    assert!(report.aborted.is_some());
    assert!(!report.success());
    assert!(!page.clicked("#refresh"));
    assert!(page.was_shut_down());
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let specs = vec![
        TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders"),
        TestSpec::new("Click Action - Refresh", ActionKind::Click, "#refresh"),
    ];

    let report = TestRunner::new(config(&tmp), Arc::new(MockLauncher::failing()))
        .run(URL, &specs, None)
        .await
        .unwrap();

    assert_accounted(&report, &specs);
    assert_eq!(report.skipped, 2);
    assert!(report.aborted.as_deref().unwrap().contains("failed to launch browser"));
}

struct AcceptAll;

#[async_trait]
impl AuthFlow for AcceptAll {
    async fn authenticate(&self, page: &dyn PageDriver, _credentials: &Credentials) -> EngineResult<bool> {
        page.goto(URL).await?;
        Ok(true)
    }
}

#[tokio::test(start_paused = true)]
async fn test_authenticate_spec_follows_session_login() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL);
    let specs = vec![
        TestSpec::new("Login - Valid Credentials", ActionKind::Authenticate, ""),
        TestSpec::new("Login - Sign in again", ActionKind::Authenticate, ""),
    ];
    let credentials = Credentials {
        username: "qa@example.com".into(),
        password: "secret".into(),
        otp: None,
    };

    let runner = TestRunner::new(config(&tmp), Arc::new(MockLauncher::new(page.clone())));
    let without = runner.run(URL, &specs, Some(&credentials)).await.unwrap();
    assert_eq!(without.failed, 2);
    assert_eq!(
        without.records[0].error_message.as_deref(),
        Some("Session authentication did not succeed")
    );

    let with = TestRunner::new(config(&tmp), Arc::new(MockLauncher::new(page.clone())))
        .with_auth(Arc::new(AcceptAll))
        .run(URL, &specs, Some(&credentials))
        .await
        .unwrap();
    assert_eq!(with.passed, 2);
    assert_eq!(with.records[1].detail.as_deref(), Some("Covered by session authentication"));
}

#[tokio::test(start_paused = true)]
async fn test_progress_is_reported_after_every_test() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#orders", MockElement::table(&["Id"], 3))
        .with_element("#empty", MockElement::table(&["Id"], 0));
    let specs = vec![
        TestSpec::new("Verify Orders", ActionKind::VerifyRows, "#orders"),
        TestSpec::new("Verify Empty", ActionKind::VerifyRows, "#empty"),
        TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#google"),
    ];

    let (observer, mut rx) = ChannelObserver::new();
    let report = TestRunner::new(config(&tmp), Arc::new(MockLauncher::new(page)))
        .with_observer(Arc::new(observer))
        .run(URL, &specs, None)
        .await
        .unwrap();
    assert_accounted(&report, &specs);

    let mut progress = Vec::new();
    let mut records = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            RunEvent::Progress(p) => progress.push(p),
            RunEvent::Record(_) => records += 1,
            RunEvent::Step(_) => {}
        }
    }

    assert_eq!(records, 3);
    let first = progress.first().unwrap();
    assert_eq!(first.pending, 3);
    let last = progress.last().unwrap();
    assert_eq!(last.pending, 0);
    assert_eq!(
        (last.passed_tests, last.failed_tests, last.skipped_tests),
        (1, 1, 1)
    );
    for p in &progress {
        assert_eq!(p.passed_tests + p.failed_tests + p.skipped_tests + p.pending, p.total_tests);
    }
}

#[tokio::test(start_paused = true)]
async fn test_popup_is_explored_while_monitor_runs() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL).with_element(
        "#share",
        MockElement::button("Share").on_click(ClickEffect::OpenModal {
            tabs: vec!["Link".into(), "Embed".into(), "Email".into()],
            buttons: vec![],
        }),
    );
    let specs = vec![TestSpec::new("Click Action - Share", ActionKind::Click, "#share")];

    // Tick well inside the post-click settle window
    let mut config = config(&tmp);
    config.policy.monitor_interval_ms = 100;

    let (observer, mut rx) = ChannelObserver::new();
    let report = TestRunner::new(config, Arc::new(MockLauncher::new(page.clone())))
        .with_observer(Arc::new(observer))
        .run(URL, &specs, None)
        .await
        .unwrap();

    let record = &report.records[0];
    assert_eq!(record.status, TestStatus::Passed, "{:?}", record.error_message);
    assert_eq!(
        record.detail.as_deref(),
        Some("Clicked #share and explored popup (2 step(s))")
    );

    let mut steps = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, RunEvent::Step(_)) {
            steps += 1;
        }
    }
    assert_eq!(steps, 2);
    assert_eq!(page.modal_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_popup_is_cleared_before_the_click() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_modal(&[], &["Accept cookies"])
        .with_element(
            "#share",
            MockElement::button("Share").on_click(ClickEffect::OpenModal {
                tabs: vec!["Link".into(), "Embed".into()],
                buttons: vec![],
            }),
        );
    let specs = vec![TestSpec::new("Click Action - Share", ActionKind::Click, "#share")];

    // Keep the monitor out of the way so only the executor touches the cookie banner
    let mut config = config(&tmp);
    config.policy.monitor_interval_ms = 600_000;

    let report = TestRunner::new(config, Arc::new(MockLauncher::new(page.clone())))
        .run(URL, &specs, None)
        .await
        .unwrap();

    assert_eq!(
        report.records[0].detail.as_deref(),
        Some("Clicked #share and explored popup (1 step(s))")
    );
    // The popup explored is the one the click opened, not the banner
    assert_eq!(page.clicks(), vec!["#share".to_string(), "#modal-2-tab-1".to_string()]);
    assert_eq!(page.modal_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stuck_test_is_force_skipped() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL)
        .with_element("#frozen", MockElement::button("Generate report").hanging())
        .with_element("#orders", MockElement::table(&["Id"], 2))
        .stalled_iframe_removal();

    let specs = vec![
        TestSpec::new("Click Action - Generate", ActionKind::Click, "#frozen"),
        TestSpec::new("Verify Table Data", ActionKind::VerifyRows, "#orders"),
        TestSpec::new("Click Action - Generate again", ActionKind::Click, "#frozen"),
    ];

    // Cleanup after the 30s deadline cannot finish before the 60s watchdog
    let mut config = config(&tmp);
    config.timeouts.cleanup_budget_ms = 40_000;
    config.policy.failure_threshold = 1;

    let start = Instant::now();
    let report = TestRunner::new(config, Arc::new(MockLauncher::new(page.clone())))
        .run(URL, &specs, None)
        .await
        .unwrap();
    assert_accounted(&report, &specs);

    let stuck = &report.records[0];
    assert_eq!(stuck.status, TestStatus::Skipped);
    assert_eq!(stuck.error_message.as_deref(), Some("Test stuck for 60s, force-skipped"));
    assert!(stuck.execution_time_ms >= 60_000);
    assert!(stuck.execution_time_ms < 61_000);

    // Force cleanup still ran its remaining steps
    assert!(page.key_presses("Escape") >= 3);
    assert_eq!(report.records[1].status, TestStatus::Passed);
    assert_eq!(
        report.records[2].error_message.as_deref(),
        Some("Element #frozen failed 1 times (threshold 1)")
    );
    assert!(report.aborted.is_none());
    assert!(start.elapsed() < Duration::from_secs(60 + 40 + 10));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_target_url_skips_everything() {
    let tmp = TempDir::new().unwrap();
    let page = MockPage::new(URL).with_element("#refresh", MockElement::button("Refresh"));
    let specs = vec![
        TestSpec::new("Click Action - Refresh", ActionKind::Click, "#refresh"),
        TestSpec::new("Click Action - Sign in with Google", ActionKind::Click, "#google"),
    ];

    let report = TestRunner::new(config(&tmp), Arc::new(MockLauncher::new(page.clone())))
        .run("not a url", &specs, None)
        .await
        .unwrap();

    assert_accounted(&report, &specs);
    assert_eq!(report.skipped, 2);
    assert!(report.aborted.as_deref().unwrap().contains("Invalid target URL"));
    assert!(report.records[0].error_message.as_deref().unwrap().starts_with("Run aborted"));
    assert!(report.records[1].error_message.as_deref().unwrap().starts_with("Pre-filtered"));
    assert!(page.clicks().is_empty());
    assert!(!page.was_shut_down());
}
