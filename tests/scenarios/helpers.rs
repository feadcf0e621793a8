//! Test utility functions for pipeline-orchestrator

use async_trait::async_trait;
use pipeline_orchestrator::cache::{CacheManager, InMemoryCacheBackend};
use pipeline_orchestrator::core::config::PipelineConfig;
use pipeline_orchestrator::core::{JobStatus, Pipeline};
use pipeline_orchestrator::execution::{
    CommandExecutor, CommandInvocation, CommandOutcome, ExecutionEngine, ExecutionEvent,
    ExecutorError,
};
use pipeline_orchestrator::report::RunReport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What the scripted executor does for one job
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Succeed immediately
    Succeed,
    /// Exit non-zero with this error line
    Fail(&'static str),
    /// Succeed after a delay, stopping early when cancelled
    Sleep(Duration),
    /// Succeed after a delay, ignoring cancellation
    IgnoreCancel(Duration),
    /// Report an executor error instead of an outcome
    Error,
    /// Panic inside the executor
    Panic,
}

/// Mock executor with per-job scripted behavior
///
/// Clones share the script and all recorded state, so a test can keep one
/// handle while the engine owns another.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<HashMap<String, Behavior>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the behavior of one job; unscripted jobs succeed
    pub fn on(self, job_id: &str, behavior: Behavior) -> Self {
        self.script
            .lock()
            .unwrap()
            .insert(job_id.to_string(), behavior);
        self
    }

    /// Number of times `execute` was called
    pub fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    /// Job ids in the order they were handed to the executor
    pub fn invoked(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .map(|inv| inv.job_id.clone())
            .collect()
    }

    pub fn invocation(&self, job_id: &str) -> Option<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .find(|inv| inv.job_id == job_id)
            .cloned()
    }

    /// Highest number of commands that were running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Decrements the running counter even if the command panics
struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome, ExecutorError> {
        let behavior = self
            .script
            .lock()
            .unwrap()
            .get(&invocation.job_id)
            .cloned()
            .unwrap_or(Behavior::Succeed);
        self.invocations.lock().unwrap().push(invocation.clone());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(self.running.clone());

        match behavior {
            Behavior::Succeed => Ok(CommandOutcome::success()),
            Behavior::Fail(line) => Ok(CommandOutcome::failure(Some(1), line)),
            Behavior::Sleep(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => Ok(CommandOutcome::success()),
                    _ = cancel.cancelled() => Ok(CommandOutcome::cancelled()),
                }
            }
            Behavior::IgnoreCancel(duration) => {
                tokio::time::sleep(duration).await;
                Ok(CommandOutcome::success())
            }
            Behavior::Error => Err(ExecutorError::Internal("executor unavailable".to_string())),
            Behavior::Panic => panic!("scripted executor crash in {}", invocation.job_id),
        }
    }
}

/// Parse a pipeline from inline YAML
pub fn pipeline(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .expect("pipeline YAML should parse")
        .to_pipeline()
        .expect("pipeline should convert")
}

/// Run a pipeline without a cache
pub async fn run_pipeline(pipeline: &Pipeline, executor: &ScriptedExecutor) -> RunReport {
    ExecutionEngine::new(executor.clone())
        .execute(pipeline)
        .await
        .expect("pipeline should be structurally valid")
}

/// Run a pipeline against a shared cache backend
pub async fn run_pipeline_cached(
    pipeline: &Pipeline,
    executor: &ScriptedExecutor,
    backend: &Arc<InMemoryCacheBackend>,
) -> RunReport {
    ExecutionEngine::new(executor.clone())
        .with_cache(CacheManager::new(backend.clone()))
        .execute(pipeline)
        .await
        .expect("pipeline should be structurally valid")
}

/// Run a pipeline and collect every emitted event
pub async fn run_pipeline_with_events(
    pipeline: &Pipeline,
    executor: &ScriptedExecutor,
) -> (RunReport, Vec<ExecutionEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let mut engine = ExecutionEngine::new(executor.clone());
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event.clone()));
    let report = engine
        .execute(pipeline)
        .await
        .expect("pipeline should be structurally valid");

    let events = events.lock().unwrap().clone();
    (report, events)
}

pub fn assert_status(report: &RunReport, job_id: &str, expected: JobStatus) {
    assert_eq!(
        report.status_of(job_id),
        Some(expected),
        "unexpected status for {}",
        job_id
    );
}

pub fn assert_all_terminal(report: &RunReport) {
    for record in &report.jobs {
        assert!(
            record.status.is_terminal(),
            "{} ended in non-terminal status {:?}",
            record.job_id,
            record.status
        );
    }
}
