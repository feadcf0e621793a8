//! Main execution engine - plans and runs a pipeline

use crate::cache::{CacheManager, InputFingerprinter};
use crate::core::{CancelReason, FailureKind, GraphError, JobGraph, Pipeline, PipelineError};
use crate::execution::command::CommandExecutor;
use crate::execution::scheduler::ExecutionScheduler;
use crate::planning;
use crate::report::{RunReport, Verdict};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Events that occur during a pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        jobs: usize,
    },
    JobStarted {
        job_id: String,
    },
    JobCacheHit {
        job_id: String,
    },
    JobSucceeded {
        job_id: String,
    },
    JobFailed {
        job_id: String,
        kind: FailureKind,
        message: String,
    },
    JobSkipped {
        job_id: String,
        because_of: String,
    },
    JobCancelled {
        job_id: String,
    },
    CancellationRequested {
        reason: CancelReason,
    },
    /// A job kept running past the cancellation grace period
    CancellationOverdue {
        job_id: String,
    },
    RunFinished {
        run_id: Uuid,
        verdict: Verdict,
    },
}

/// Type for event handlers
///
/// Handlers are called synchronously from the scheduling loop and should
/// return quickly.
pub type EventHandler = Arc<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Main pipeline execution engine
pub struct ExecutionEngine<E> {
    executor: Arc<E>,
    cache: Option<CacheManager>,
    fingerprinter: Option<Arc<dyn InputFingerprinter>>,
    event_handlers: Vec<EventHandler>,
}

impl<E: CommandExecutor + 'static> ExecutionEngine<E> {
    pub fn new(executor: E) -> Self {
        Self {
            executor: Arc::new(executor),
            cache: None,
            fingerprinter: None,
            event_handlers: Vec::new(),
        }
    }

    /// Reuse results of unchanged jobs through this cache
    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fingerprint declared inputs before computing cache keys
    pub fn with_fingerprinter<F>(mut self, fingerprinter: F) -> Self
    where
        F: InputFingerprinter + 'static,
    {
        self.fingerprinter = Some(Arc::new(fingerprinter));
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
    }

    /// Validate the stage graph and expand it into jobs
    pub fn plan(&self, pipeline: &Pipeline) -> Result<JobGraph, GraphError> {
        let mut graph = planning::plan(pipeline)?;

        if let Some(fingerprinter) = &self.fingerprinter {
            for index in 0..graph.len() {
                let job = graph.job(index);
                if job.cacheable && !job.inputs.is_empty() {
                    let fingerprint = fingerprinter.fingerprint(job);
                    graph.set_fingerprint(index, fingerprint);
                }
            }
        }

        Ok(graph)
    }

    /// Execute the entire pipeline
    ///
    /// Structural errors are returned before anything runs. Every job that
    /// was planned appears in the report with a terminal status.
    pub async fn execute(&self, pipeline: &Pipeline) -> Result<RunReport, PipelineError> {
        let graph = self.plan(pipeline)?;
        info!(
            "Planned pipeline '{}': {} stage(s), {} job(s)",
            pipeline.name,
            pipeline.stages.len(),
            graph.len()
        );

        let cache = self
            .cache
            .clone()
            .map(|cache| cache.with_lookup_timeout(pipeline.settings.cache_lookup_timeout));

        let scheduler = ExecutionScheduler::new(
            &pipeline.name,
            graph,
            self.executor.clone(),
            cache,
            pipeline.settings.clone(),
            pipeline.gate,
            self.event_handlers.clone(),
        );

        Ok(scheduler.run().await)
    }
}
