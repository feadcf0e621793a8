//! Execution scheduler - dispatches ready jobs onto bounded slots
//!
//! One loop owns the run state. Workers never touch it; they send a
//! completion message back over a channel and the loop applies it.

use crate::cache::{CacheKey, CacheManager, CachedResult};
use crate::core::{CancelReason, FailureKind, JobGraph, JobStatus, PipelineSettings, RunState};
use crate::execution::command::{CommandExecutor, CommandInvocation, CommandOutcome, CommandStatus};
use crate::execution::engine::{EventHandler, ExecutionEvent};
use crate::report::{FailureDetail, GateEvaluator, GatePolicy, ResultAggregator, RunReport};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a worker reports back for one job
#[derive(Debug)]
enum WorkerResult {
    /// The executor returned an outcome
    Finished {
        outcome: CommandOutcome,
        timed_out: Option<Duration>,
    },
    /// The executor could not run the command, or the worker panicked
    Broken(String),
}

#[derive(Debug)]
struct Completion {
    index: usize,
    result: WorkerResult,
}

/// Messages workers send back to the loop
#[derive(Debug)]
enum WorkerMessage {
    /// A timed-out job is still running after the grace period
    Overdue { index: usize },
    Done(Completion),
}

/// Runs one job graph to completion
pub(crate) struct ExecutionScheduler<E> {
    graph: Arc<JobGraph>,
    executor: Arc<E>,
    cache: Option<CacheManager>,
    keys: Vec<CacheKey>,
    settings: PipelineSettings,
    gate: GatePolicy,
    handlers: Vec<EventHandler>,

    state: RunState,
    aggregator: ResultAggregator,
    ready: BTreeSet<usize>,
    running: BTreeSet<usize>,
    unmet: Vec<usize>,
    looked_up: Vec<bool>,
    run_token: CancellationToken,
    grace_deadline: Option<Instant>,
    overdue_reported: bool,
    overdue: BTreeSet<usize>,
}

impl<E: CommandExecutor + 'static> ExecutionScheduler<E> {
    pub(crate) fn new(
        pipeline: &str,
        graph: JobGraph,
        executor: Arc<E>,
        cache: Option<CacheManager>,
        settings: PipelineSettings,
        gate: GatePolicy,
        handlers: Vec<EventHandler>,
    ) -> Self {
        let keys = if cache.is_some() {
            CacheManager::compute_keys(&graph)
        } else {
            Vec::new()
        };
        let state = RunState::new(&graph);
        let aggregator = ResultAggregator::new(Uuid::new_v4(), pipeline, &graph);
        let ready = (0..graph.len())
            .filter(|&i| state.status(i) == JobStatus::Ready)
            .collect();
        let unmet = graph.jobs().iter().map(|j| j.dependencies.len()).collect();
        let looked_up = vec![false; graph.len()];

        Self {
            graph: Arc::new(graph),
            executor,
            cache,
            keys,
            settings,
            gate,
            handlers,
            state,
            aggregator,
            ready,
            running: BTreeSet::new(),
            unmet,
            looked_up,
            run_token: CancellationToken::new(),
            grace_deadline: None,
            overdue_reported: false,
            overdue: BTreeSet::new(),
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    fn job_id(&self, index: usize) -> String {
        self.graph.job(index).id.to_string()
    }

    /// Drive the run until every job is terminal
    pub(crate) async fn run(mut self) -> RunReport {
        let run_id = self.aggregator.run_id();
        info!("Starting run {} with {} job(s)", run_id, self.graph.len());
        self.emit(ExecutionEvent::RunStarted {
            run_id,
            jobs: self.graph.len(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMessage>();
        let max_parallel = self.settings.max_parallel.max(1);
        // A deadline past the clock's range never fires
        let global_deadline = self
            .settings
            .timeout
            .and_then(|t| Instant::now().checked_add(t));

        loop {
            if !self.state.is_cancelled() {
                self.dispatch(max_parallel, &tx, &mut rx, global_deadline)
                    .await;
            }

            if self.state.is_finished() {
                break;
            }

            if self.running.is_empty() && self.ready.is_empty() {
                error!(
                    "No runnable jobs left but {} job(s) unfinished",
                    self.state.unfinished().len()
                );
                break;
            }

            let timeout_armed = global_deadline.is_some() && !self.state.is_cancelled();
            let grace_armed = self.grace_deadline.is_some() && !self.overdue_reported;

            tokio::select! {
                Some(message) = rx.recv() => {
                    self.handle(message);
                }
                _ = sleep_until(global_deadline.unwrap_or_else(Instant::now)), if timeout_armed => {
                    self.time_out();
                }
                _ = sleep_until(self.grace_deadline.unwrap_or_else(Instant::now)), if grace_armed => {
                    self.report_overdue();
                }
            }
        }

        let verdict = GateEvaluator::new(self.gate)
            .evaluate(self.aggregator.records(), self.aggregator.cancellation());
        info!("Run {} finished: {}", run_id, verdict);
        self.emit(ExecutionEvent::RunFinished { run_id, verdict });
        self.aggregator.finish(verdict)
    }

    /// Start ready jobs in priority order while slots are free
    ///
    /// Cache hits complete without taking a slot. Messages and deadlines
    /// that came due during a lookup are applied before anything else is
    /// dispatched, and dispatching stops as soon as the run is cancelled.
    async fn dispatch(
        &mut self,
        max_parallel: usize,
        tx: &mpsc::UnboundedSender<WorkerMessage>,
        rx: &mut mpsc::UnboundedReceiver<WorkerMessage>,
        global_deadline: Option<Instant>,
    ) {
        while let Some(index) = self.ready.first().copied() {
            if !self.looked_up[index] {
                self.looked_up[index] = true;
                let hit = self.lookup(index).await;
                self.catch_up(rx, global_deadline);
                if self.state.is_cancelled() {
                    return;
                }
                if let Some(hit) = hit {
                    self.ready.remove(&index);
                    self.complete_from_cache(index, hit);
                }
                // Completions may have readied a job of higher priority
                continue;
            }

            if self.running.len() >= max_parallel {
                break;
            }

            self.ready.remove(&index);
            self.start(index, tx);
        }
    }

    /// Apply whatever arrived while the loop was busy with a cache lookup
    fn catch_up(
        &mut self,
        rx: &mut mpsc::UnboundedReceiver<WorkerMessage>,
        global_deadline: Option<Instant>,
    ) {
        while let Ok(message) = rx.try_recv() {
            self.handle(message);
        }

        let now = Instant::now();
        if !self.state.is_cancelled() && global_deadline.is_some_and(|d| now >= d) {
            self.time_out();
        }
        if !self.overdue_reported && self.grace_deadline.is_some_and(|d| now >= d) {
            self.report_overdue();
        }
    }

    fn handle(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Done(completion) => self.complete(completion),
            WorkerMessage::Overdue { index } => self.warn_overdue(index),
        }
    }

    fn time_out(&mut self) {
        let after_secs = self.settings.timeout.map_or(0, |t| t.as_secs());
        warn!("Run timed out after {}s", after_secs);
        self.request_cancel(CancelReason::Timeout { after_secs });
    }

    async fn lookup(&self, index: usize) -> Option<CachedResult> {
        let cache = self.cache.as_ref()?;
        if !self.graph.job(index).cacheable {
            return None;
        }
        cache.lookup(&self.keys[index]).await
    }

    fn complete_from_cache(&mut self, index: usize, hit: CachedResult) {
        if !self.state.transition(index, JobStatus::Succeeded) {
            return;
        }
        let job_id = self.job_id(index);
        debug!("{} satisfied from cache", job_id);
        self.aggregator.record_cache_hit(index, hit.output_ref);
        self.emit(ExecutionEvent::JobCacheHit { job_id });
        self.release_dependents(index);
    }

    fn start(&mut self, index: usize, tx: &mpsc::UnboundedSender<WorkerMessage>) {
        if !self.state.transition(index, JobStatus::Running) {
            return;
        }
        self.running.insert(index);
        self.aggregator.record_started(index);

        let job = self.graph.job(index);
        info!("Starting {}", job.id);
        self.emit(ExecutionEvent::JobStarted {
            job_id: job.id.to_string(),
        });

        let invocation = CommandInvocation::for_job(job);
        let limit = JobLimit {
            timeout: job.timeout,
            grace: self.settings.cancel_grace,
        };
        let store = match (&self.cache, job.cacheable) {
            (Some(cache), true) => Some((cache.clone(), self.keys[index].clone())),
            _ => None,
        };
        let executor = self.executor.clone();
        let token = self.run_token.child_token();
        let worker_tx = tx.clone();
        let tx = tx.clone();

        tokio::spawn(async move {
            let worker = tokio::spawn(async move {
                let result =
                    run_command(executor.as_ref(), &invocation, limit, token, index, &worker_tx)
                        .await;
                // A job that overran its limit is never cached, however it ended
                if let (Some((cache, key)), WorkerResult::Finished { outcome, timed_out: None }) =
                    (store, &result)
                {
                    if outcome.status == CommandStatus::Success {
                        let cached =
                            CachedResult::success(invocation.job_id.clone(), outcome.output_ref.clone());
                        cache.store(&key, &cached).await;
                    }
                }
                result
            });

            let result = match worker.await {
                Ok(result) => result,
                Err(e) => WorkerResult::Broken(format!("worker panicked: {}", e)),
            };
            // The loop holds a receiver until every job is terminal
            let _ = tx.send(WorkerMessage::Done(Completion { index, result }));
        });
    }

    fn complete(&mut self, completion: Completion) {
        let Completion { index, result } = completion;
        self.running.remove(&index);
        let job_id = self.job_id(index);

        let failure = match result {
            WorkerResult::Finished { outcome, timed_out } => match (outcome.status, timed_out) {
                (_, Some(limit)) => FailureDetail::new(
                    FailureKind::Timeout,
                    format!("timed out after {}s", limit.as_secs()),
                )
                .with_output_ref(outcome.output_ref),
                (CommandStatus::Success, None) => {
                    if self.state.transition(index, JobStatus::Succeeded) {
                        info!("{} succeeded", job_id);
                        self.aggregator.record_succeeded(index, outcome.output_ref);
                        self.emit(ExecutionEvent::JobSucceeded { job_id });
                        self.release_dependents(index);
                    }
                    return;
                }
                (CommandStatus::Cancelled, None) if self.state.is_cancelled() => {
                    if self.state.transition(index, JobStatus::Cancelled) {
                        info!("{} cancelled", job_id);
                        self.aggregator.record_cancelled(index);
                        self.emit(ExecutionEvent::JobCancelled { job_id });
                    }
                    return;
                }
                (CommandStatus::Cancelled, None) => FailureDetail::new(
                    FailureKind::Executor,
                    "command reported cancellation without a cancellation request",
                )
                .with_output_ref(outcome.output_ref),
                (CommandStatus::Failure(code), None) => {
                    let message = outcome.error_line.unwrap_or_else(|| match code {
                        Some(code) => format!("exited with code {}", code),
                        None => "command failed".to_string(),
                    });
                    FailureDetail::new(FailureKind::CommandFailed, message)
                        .with_output_ref(outcome.output_ref)
                }
            },
            WorkerResult::Broken(message) => FailureDetail::new(FailureKind::Executor, message),
        };

        self.fail(index, failure);
    }

    fn fail(&mut self, index: usize, failure: FailureDetail) {
        if !self.state.transition(index, JobStatus::Failed) {
            return;
        }
        let job = self.graph.job(index);
        let job_id = job.id.to_string();
        let critical = job.critical;

        warn!("{} failed ({}): {}", job_id, failure.kind, failure.message);
        self.emit(ExecutionEvent::JobFailed {
            job_id: job_id.clone(),
            kind: failure.kind,
            message: failure.message.clone(),
        });
        self.aggregator.record_failed(index, failure);

        if critical {
            self.request_cancel(CancelReason::CriticalFailure { job_id });
        } else {
            self.propagate_skip(index);
        }
    }

    /// Jobs whose last unmet dependency just succeeded become ready
    fn release_dependents(&mut self, index: usize) {
        let graph = self.graph.clone();
        for &dependent in graph.dependents(index) {
            self.unmet[dependent] -= 1;
            if self.unmet[dependent] == 0
                && self.state.status(dependent) == JobStatus::Pending
                && !self.state.is_cancelled()
                && self.state.transition(dependent, JobStatus::Ready)
            {
                debug!("{} is ready", graph.job(dependent).id);
                self.ready.insert(dependent);
            }
        }
    }

    /// Skip every pending job downstream of a non-critical failure
    fn propagate_skip(&mut self, failed: usize) {
        let graph = self.graph.clone();
        let mut stack = vec![failed];
        while let Some(cause) = stack.pop() {
            let cause_id = self.job_id(cause);
            for &dependent in graph.dependents(cause) {
                if self.state.status(dependent) != JobStatus::Pending {
                    continue;
                }
                if self.state.transition(dependent, JobStatus::Skipped) {
                    let job_id = self.job_id(dependent);
                    info!("Skipping {} because {} did not succeed", job_id, cause_id);
                    self.aggregator.record_skipped(dependent, cause_id.clone());
                    self.emit(ExecutionEvent::JobSkipped {
                        job_id,
                        because_of: cause_id.clone(),
                    });
                    stack.push(dependent);
                }
            }
        }
    }

    /// Stop dispatching, cancel all queued jobs and signal running ones
    fn request_cancel(&mut self, reason: CancelReason) {
        if !self.state.cancel(reason.clone()) {
            return;
        }

        warn!("Cancelling run: {}", reason);
        self.aggregator.set_cancellation(reason.clone());
        self.emit(ExecutionEvent::CancellationRequested { reason });
        self.run_token.cancel();

        self.ready.clear();
        for index in self.state.unfinished() {
            if self.running.contains(&index) {
                continue;
            }
            if self.state.transition(index, JobStatus::Cancelled) {
                self.aggregator.record_cancelled(index);
                self.emit(ExecutionEvent::JobCancelled {
                    job_id: self.job_id(index),
                });
            }
        }

        if !self.running.is_empty() {
            // A grace period past the clock's range never expires
            self.grace_deadline = Instant::now().checked_add(self.settings.cancel_grace);
        }
    }

    /// Warn about every job still running after the grace period
    fn report_overdue(&mut self) {
        self.overdue_reported = true;
        let overdue: Vec<usize> = self.running.iter().copied().collect();
        for index in overdue {
            self.warn_overdue(index);
        }
    }

    /// One warning per job, whether its own timeout or the run cancelled it
    fn warn_overdue(&mut self, index: usize) {
        if !self.running.contains(&index) || !self.overdue.insert(index) {
            return;
        }

        let grace = self.settings.cancel_grace;
        let job_id = self.job_id(index);
        warn!(
            "{} is still running {:?} after cancellation was requested",
            job_id, grace
        );
        self.aggregator.warn(
            Some(job_id.clone()),
            format!("did not stop within {:?} of cancellation", grace),
        );
        self.emit(ExecutionEvent::CancellationOverdue { job_id });
    }
}

/// Time bounds of one job
#[derive(Debug, Clone, Copy)]
struct JobLimit {
    timeout: Option<Duration>,
    grace: Duration,
}

/// Run one command, enforcing the job's own timeout
///
/// After the timeout the job's token is cancelled and the command is still
/// awaited; if it outlives the grace period the loop is told so it can warn.
async fn run_command<E: CommandExecutor + ?Sized>(
    executor: &E,
    invocation: &CommandInvocation,
    limit: JobLimit,
    token: CancellationToken,
    index: usize,
    tx: &mpsc::UnboundedSender<WorkerMessage>,
) -> WorkerResult {
    let execution = executor.execute(invocation, token.clone());
    tokio::pin!(execution);

    let (result, timed_out) = match limit.timeout {
        Some(timeout_after) => {
            tokio::select! {
                result = &mut execution => (result, None),
                _ = sleep(timeout_after) => {
                    warn!("{} exceeded its timeout of {:?}", invocation.job_id, timeout_after);
                    token.cancel();
                    let result = match timeout(limit.grace, &mut execution).await {
                        Ok(result) => result,
                        Err(_) => {
                            let _ = tx.send(WorkerMessage::Overdue { index });
                            execution.await
                        }
                    };
                    (result, Some(timeout_after))
                }
            }
        }
        None => (execution.await, None),
    };

    match result {
        Ok(outcome) => WorkerResult::Finished { outcome, timed_out },
        Err(e) => WorkerResult::Broken(e.to_string()),
    }
}
