//! Test: Timeouts - global deadline, per-job limits and the grace period

use crate::helpers::*;
use pipeline_orchestrator::cache::{CacheManager, InMemoryCacheBackend};
use pipeline_orchestrator::core::{CancelReason, FailureKind, JobStatus};
use pipeline_orchestrator::execution::{ExecutionEngine, ExecutionEvent};
use pipeline_orchestrator::report::Verdict;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_global_timeout_cancels_the_run() {
    let yaml = r#"
name: "slow"
settings:
  timeout_secs: 2
gate:
  max_failures: 0
stages:
  - name: integration
    command: "make integration"
  - name: publish
    depends_on: [integration]
    command: "make publish"
"#;
    let pipeline = pipeline(yaml);
    let executor =
        ScriptedExecutor::new().on("integration", Behavior::Sleep(Duration::from_secs(600)));

    let report = run_pipeline(&pipeline, &executor).await;

    assert_status(&report, "integration", JobStatus::Cancelled);
    assert_status(&report, "publish", JobStatus::Cancelled);
    assert!(report.timed_out());
    assert_eq!(
        report.cancellation,
        Some(CancelReason::Timeout { after_secs: 2 })
    );
    assert_eq!(report.verdict, Verdict::FailCritical);
    assert_eq!(executor.invoked(), vec!["integration"]);
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_is_tagged_as_timeout() {
    let yaml = r#"
name: "hanging"
settings:
  max_parallel: 2
gate:
  max_failures: 0
stages:
  - name: e2e
    command: "npm run e2e"
    timeout_secs: 1
  - name: report
    depends_on: [e2e]
    command: "npm run report"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new().on("e2e", Behavior::Sleep(Duration::from_secs(600)));

    let report = run_pipeline(&pipeline, &executor).await;

    assert_status(&report, "e2e", JobStatus::Failed);
    assert_status(&report, "report", JobStatus::Cancelled);
    let failure = report.job("e2e").unwrap().failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(failure.message, "timed out after 1s");
    assert_eq!(
        report.cancellation,
        Some(CancelReason::CriticalFailure {
            job_id: "e2e".to_string()
        })
    );
    assert!(!report.timed_out(), "only the job hit its limit");
}

#[tokio::test(start_paused = true)]
async fn test_non_critical_job_timeout_only_skips_dependents() {
    let yaml = r#"
name: "optional-bench"
gate:
  max_failures: 1
stages:
  - name: bench
    command: "cargo bench"
    critical: false
    timeout_secs: 5
  - name: bench-report
    depends_on: [bench]
    command: "./report.sh"
    critical: false
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new().on("bench", Behavior::Sleep(Duration::from_secs(60)));

    let report = run_pipeline(&pipeline, &executor).await;

    assert_status(&report, "bench", JobStatus::Failed);
    assert_status(&report, "bench-report", JobStatus::Skipped);
    assert!(report.cancellation.is_none());
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_grace_overrun_is_a_warning() {
    let yaml = r#"
name: "stubborn"
settings:
  max_parallel: 2
  cancel_grace_secs: 1
gate:
  max_failures: 0
stages:
  - name: lint
    command: "make lint"
  - name: migrate
    command: "./migrate.sh"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new()
        .on("lint", Behavior::Fail("style violations"))
        .on("migrate", Behavior::IgnoreCancel(Duration::from_secs(30)));

    let (report, events) = run_pipeline_with_events(&pipeline, &executor).await;

    // The run waits for the stubborn job instead of orphaning it
    assert_status(&report, "migrate", JobStatus::Succeeded);
    assert!(report.job("migrate").unwrap().finished_at.is_some());

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].job_id.as_deref(), Some("migrate"));
    assert!(events.contains(&ExecutionEvent::CancellationOverdue {
        job_id: "migrate".to_string()
    }));

    assert_eq!(report.verdict, Verdict::FailCritical);
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_holds_when_command_ignores_cancellation() {
    let yaml = r#"
name: "deaf-e2e"
settings:
  cancel_grace_secs: 1
gate:
  max_failures: 0
stages:
  - name: e2e
    command: "npm run e2e"
    timeout_secs: 1
"#;
    let pipeline = pipeline(yaml);
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor =
        ScriptedExecutor::new().on("e2e", Behavior::IgnoreCancel(Duration::from_secs(600)));

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut engine =
        ExecutionEngine::new(executor.clone()).with_cache(CacheManager::new(backend.clone()));
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event.clone()));
    let report = engine.execute(&pipeline).await.unwrap();

    // Finishing successfully after the limit does not undo the timeout
    assert_status(&report, "e2e", JobStatus::Failed);
    let failure = report.job("e2e").unwrap().failure.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Timeout);
    assert_eq!(report.verdict, Verdict::FailCritical);
    assert!(backend.is_empty().await, "a timed out job is never cached");

    assert_eq!(report.warnings.len(), 1);
    assert_eq!(report.warnings[0].job_id.as_deref(), Some("e2e"));
    assert!(events
        .lock()
        .unwrap()
        .contains(&ExecutionEvent::CancellationOverdue {
            job_id: "e2e".to_string()
        }));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_run_timeout_never_fires() {
    let yaml = r#"
name: "patient"
settings:
  timeout_secs: 18446744073709551615
gate:
  max_failures: 0
stages:
  - name: build
    command: "make"
  - name: test
    depends_on: [build]
    command: "make test"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new().on("test", Behavior::Sleep(Duration::from_secs(60)));

    let report = run_pipeline(&pipeline, &executor).await;

    assert_status(&report, "test", JobStatus::Succeeded);
    assert!(report.cancellation.is_none());
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_run_timeout_override_accepts_any_value() {
    let yaml = r#"
name: "override"
gate:
  max_failures: 0
stages:
  - name: build
    command: "make"
"#;
    // What `--timeout-secs` does to a loaded definition
    let mut pipeline = pipeline(yaml);
    pipeline.settings.timeout = Some(Duration::from_secs(u64::MAX));

    let report = run_pipeline(&pipeline, &ScriptedExecutor::new()).await;

    assert_status(&report, "build", JobStatus::Succeeded);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_grace_still_cancels() {
    let yaml = r#"
name: "long-grace"
settings:
  max_parallel: 2
  cancel_grace_secs: 18446744073709551615
gate:
  max_failures: 0
stages:
  - name: lint
    command: "make lint"
  - name: integration
    command: "make integration"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new()
        .on("lint", Behavior::Fail("style violations"))
        .on("integration", Behavior::Sleep(Duration::from_secs(600)));

    let report = run_pipeline(&pipeline, &executor).await;

    assert_status(&report, "lint", JobStatus::Failed);
    assert_status(&report, "integration", JobStatus::Cancelled);
    assert!(report.warnings.is_empty());
    assert_eq!(report.verdict, Verdict::FailCritical);
}
