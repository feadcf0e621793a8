//! Test: Caching - deterministic keys, warm reruns and invalidation

use crate::helpers::*;
use async_trait::async_trait;
use pipeline_orchestrator::cache::{
    CacheBackend, CacheBackendError, CacheKey, CacheManager, FileFingerprinter, FsCacheBackend,
    InMemoryCacheBackend,
};
use pipeline_orchestrator::core::JobStatus;
use pipeline_orchestrator::execution::{ExecutionEngine, ExecutionEvent};
use pipeline_orchestrator::planning;
use pipeline_orchestrator::report::Verdict;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PYTHON_CI: &str = r#"
name: "python-ci"
gate:
  max_failures: 0
stages:
  - name: lint
    command: "ruff check ."
  - name: test
    depends_on: [lint]
    matrix:
      version: ["3.9", "3.10"]
    command: "pytest"
  - name: build
    depends_on: [test]
    command: "python -m build"
"#;

#[test]
fn test_cache_keys_are_deterministic() {
    let first = planning::plan(&pipeline(PYTHON_CI)).unwrap();
    let second = planning::plan(&pipeline(PYTHON_CI)).unwrap();

    let first_keys = CacheManager::compute_keys(&first);
    assert_eq!(first_keys, CacheManager::compute_keys(&second));

    let mut distinct = first_keys.clone();
    distinct.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    distinct.dedup();
    assert_eq!(distinct.len(), first_keys.len(), "every job has its own key");
}

#[tokio::test]
async fn test_warm_cache_reruns_nothing() {
    let pipeline = pipeline(PYTHON_CI);
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor = ScriptedExecutor::new();

    let cold = run_pipeline_cached(&pipeline, &executor, &backend).await;
    assert_eq!(cold.cached_count(), 0);
    assert_eq!(executor.calls(), 4);
    assert_eq!(backend.len().await, 4);

    let warm = run_pipeline_cached(&pipeline, &executor, &backend).await;
    assert_eq!(executor.calls(), 4, "no command may run on a warm cache");
    assert_eq!(warm.count(JobStatus::Succeeded), 4);
    assert_eq!(warm.cached_count(), 4);
    assert!(warm.jobs.iter().all(|record| record.cached));
    assert_eq!(warm.verdict, Verdict::Pass);
}

#[tokio::test]
async fn test_cache_hits_are_reported_as_events() {
    let pipeline = pipeline(PYTHON_CI);
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor = ScriptedExecutor::new();
    run_pipeline_cached(&pipeline, &executor, &backend).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut engine =
        ExecutionEngine::new(executor.clone()).with_cache(CacheManager::new(backend.clone()));
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event.clone()));
    engine.execute(&pipeline).await.unwrap();

    let events = events.lock().unwrap();
    let hits = events
        .iter()
        .filter(|e| matches!(e, ExecutionEvent::JobCacheHit { .. }))
        .count();
    assert_eq!(hits, 4);
    assert!(!events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::JobStarted { .. })));
}

#[tokio::test]
async fn test_upstream_change_invalidates_downstream() {
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor = ScriptedExecutor::new();
    run_pipeline_cached(&pipeline(PYTHON_CI), &executor, &backend).await;

    let changed = PYTHON_CI.replace("ruff check .", "ruff check --fix .");
    let rerun = ScriptedExecutor::new();
    let report = run_pipeline_cached(&pipeline(&changed), &rerun, &backend).await;

    assert_eq!(rerun.calls(), 4, "lint changed, so everything downstream reruns");
    assert_eq!(report.cached_count(), 0);
}

#[tokio::test]
async fn test_unchanged_branch_stays_cached() {
    let yaml = r#"
name: "two-branches"
gate:
  max_failures: 0
stages:
  - name: frontend
    command: "npm test"
  - name: backend
    command: "cargo test"
  - name: bundle
    depends_on: [frontend]
    command: "npm run build"
"#;
    let backend = Arc::new(InMemoryCacheBackend::new());
    run_pipeline_cached(&pipeline(yaml), &ScriptedExecutor::new(), &backend).await;

    let changed = yaml.replace("npm test", "npm test -- --coverage");
    let rerun = ScriptedExecutor::new();
    let report = run_pipeline_cached(&pipeline(&changed), &rerun, &backend).await;

    let mut invoked = rerun.invoked();
    invoked.sort();
    assert_eq!(invoked, vec!["bundle", "frontend"]);
    assert!(report.job("backend").unwrap().cached);
}

#[tokio::test]
async fn test_failures_are_not_cached() {
    let yaml = r#"
name: "flaky"
gate:
  max_failures: 1
stages:
  - name: e2e
    command: "npm run e2e"
    critical: false
"#;
    let pipeline = pipeline(yaml);
    let backend = Arc::new(InMemoryCacheBackend::new());

    let failing = ScriptedExecutor::new().on("e2e", Behavior::Fail("timeout waiting for page"));
    run_pipeline_cached(&pipeline, &failing, &backend).await;
    assert!(backend.is_empty().await);

    let passing = ScriptedExecutor::new();
    let report = run_pipeline_cached(&pipeline, &passing, &backend).await;
    assert_eq!(passing.calls(), 1);
    assert_status(&report, "e2e", JobStatus::Succeeded);
    assert!(!report.job("e2e").unwrap().cached);
}

#[tokio::test]
async fn test_uncacheable_stage_always_runs() {
    let yaml = r#"
name: "deploy"
gate:
  max_failures: 0
stages:
  - name: build
    command: "make"
  - name: deploy
    depends_on: [build]
    command: "./deploy.sh"
    cache: false
"#;
    let pipeline = pipeline(yaml);
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor = ScriptedExecutor::new();

    run_pipeline_cached(&pipeline, &executor, &backend).await;
    let report = run_pipeline_cached(&pipeline, &executor, &backend).await;

    assert_eq!(executor.invoked(), vec!["build", "deploy", "deploy"]);
    assert!(report.job("build").unwrap().cached);
    assert!(!report.job("deploy").unwrap().cached);
}

#[tokio::test]
async fn test_input_changes_invalidate_the_job() {
    let workdir = tempfile::tempdir().unwrap();
    std::fs::write(workdir.path().join("requirements.txt"), "requests==2.31\n").unwrap();

    let yaml = r#"
name: "inputs"
gate:
  max_failures: 0
stages:
  - name: install
    command: "pip install -r requirements.txt"
    inputs: [requirements.txt]
"#;
    let pipeline = pipeline(yaml);
    let backend = Arc::new(InMemoryCacheBackend::new());
    let executor = ScriptedExecutor::new();
    let engine = ExecutionEngine::new(executor.clone())
        .with_cache(CacheManager::new(backend.clone()))
        .with_fingerprinter(FileFingerprinter::new(workdir.path()));

    engine.execute(&pipeline).await.unwrap();
    engine.execute(&pipeline).await.unwrap();
    assert_eq!(executor.calls(), 1, "unchanged inputs hit the cache");

    std::fs::write(workdir.path().join("requirements.txt"), "requests==2.32\n").unwrap();
    let report = engine.execute(&pipeline).await.unwrap();
    assert_eq!(executor.calls(), 2);
    assert!(!report.job("install").unwrap().cached);
}

#[tokio::test]
async fn test_filesystem_cache_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = pipeline(PYTHON_CI);
    let executor = ScriptedExecutor::new();

    for _ in 0..2 {
        let backend = FsCacheBackend::new(dir.path()).unwrap();
        ExecutionEngine::new(executor.clone())
            .with_cache(CacheManager::new(Arc::new(backend)))
            .execute(&pipeline)
            .await
            .unwrap();
    }

    assert_eq!(executor.calls(), 4);
}

/// Backend that is always down
struct UnavailableBackend;

#[async_trait]
impl CacheBackend for UnavailableBackend {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".to_string()))
    }

    async fn put(&self, _key: &CacheKey, _blob: Vec<u8>) -> Result<(), CacheBackendError> {
        Err(CacheBackendError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_cache_outage_degrades_to_misses() {
    let pipeline = pipeline(PYTHON_CI);
    let executor = ScriptedExecutor::new();

    let report = ExecutionEngine::new(executor.clone())
        .with_cache(CacheManager::new(Arc::new(UnavailableBackend)))
        .execute(&pipeline)
        .await
        .unwrap();

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.cached_count(), 0);
    assert_eq!(executor.calls(), 4);
}

/// Backend whose lookups are slow and always miss
struct SlowBackend;

#[async_trait]
impl CacheBackend for SlowBackend {
    async fn get(&self, _key: &CacheKey) -> Result<Option<Vec<u8>>, CacheBackendError> {
        tokio::time::sleep(Duration::from_millis(1500)).await;
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _blob: Vec<u8>) -> Result<(), CacheBackendError> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_during_slow_lookups_stops_dispatch() {
    let yaml = r#"
name: "fan-out"
settings:
  max_parallel: 5
gate:
  max_failures: 0
stages:
  - name: a
    command: "./a.sh"
  - name: b
    command: "./b.sh"
  - name: c
    command: "./c.sh"
  - name: d
    command: "./d.sh"
  - name: e
    command: "./e.sh"
"#;
    let pipeline = pipeline(yaml);
    let executor = ScriptedExecutor::new().on("a", Behavior::Fail("broken"));

    let report = ExecutionEngine::new(executor.clone())
        .with_cache(CacheManager::new(Arc::new(SlowBackend)))
        .execute(&pipeline)
        .await
        .unwrap();

    // The failure lands while b is being looked up, so nothing after a starts
    assert_eq!(executor.invoked(), vec!["a"]);
    for job in ["b", "c", "d", "e"] {
        assert_status(&report, job, JobStatus::Cancelled);
    }
    assert_eq!(report.verdict, Verdict::FailCritical);
}
