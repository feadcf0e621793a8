//! Execution state models

use crate::core::job::JobGraph;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Status of a single job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for dependencies
    Pending,
    /// All dependencies succeeded; waiting for a slot
    Ready,
    /// Command is executing
    Running,
    /// Command succeeded, or the result was reused from the cache
    Succeeded,
    /// Command failed or timed out
    Failed,
    /// Not run because a dependency failed non-critically or was skipped
    Skipped,
    /// Not run, or stopped, because the run was cancelled
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// Pending -> Ready -> Running -> terminal. A Ready job may also be
    /// satisfied from the cache directly. Jobs that never ran may be skipped
    /// or cancelled.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Ready)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Ready, Running)
                | (Ready, Succeeded)
                | (Ready, Skipped)
                | (Ready, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Pending => "pending",
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Skipped => "skipped",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Why a job failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The command ran and reported failure
    CommandFailed,
    /// The job exceeded its own timeout
    Timeout,
    /// The command could not be run at all
    Executor,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::CommandFailed => f.write_str("command failed"),
            FailureKind::Timeout => f.write_str("timeout"),
            FailureKind::Executor => f.write_str("executor error"),
        }
    }
}

/// Why a run was cancelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum CancelReason {
    /// A critical job failed
    CriticalFailure { job_id: String },
    /// The global run timeout elapsed
    Timeout { after_secs: u64 },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::CriticalFailure { job_id } => {
                write!(f, "critical job '{}' failed", job_id)
            }
            CancelReason::Timeout { after_secs } => {
                write!(f, "pipeline timed out after {}s", after_secs)
            }
        }
    }
}

/// Mutable state of one pipeline execution
///
/// Owned by exactly one scheduling loop; never shared across runs.
#[derive(Debug, Clone)]
pub struct RunState {
    statuses: Vec<JobStatus>,
    completed: usize,
    cancellation: Option<CancelReason>,
}

impl RunState {
    /// Jobs without dependencies start Ready, all others Pending
    pub fn new(graph: &JobGraph) -> Self {
        let statuses = graph
            .jobs()
            .iter()
            .map(|job| {
                if job.dependencies.is_empty() {
                    JobStatus::Ready
                } else {
                    JobStatus::Pending
                }
            })
            .collect();

        Self {
            statuses,
            completed: 0,
            cancellation: None,
        }
    }

    pub fn status(&self, index: usize) -> JobStatus {
        self.statuses[index]
    }

    /// Move a job to a new status
    ///
    /// Returns false, leaving the status untouched, if the transition is
    /// not legal.
    pub fn transition(&mut self, index: usize, next: JobStatus) -> bool {
        let current = self.statuses[index];
        if !current.can_transition_to(next) {
            error!(
                "Illegal job status transition for job #{}: {} -> {}",
                index, current, next
            );
            return false;
        }

        self.statuses[index] = next;
        if next.is_terminal() {
            self.completed += 1;
        }
        true
    }

    /// Number of jobs that reached a terminal status
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Set the cancellation flag; returns false if it was already set
    pub fn cancel(&mut self, reason: CancelReason) -> bool {
        if self.cancellation.is_some() {
            return false;
        }
        self.cancellation = Some(reason);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_some()
    }

    pub fn cancellation(&self) -> Option<&CancelReason> {
        self.cancellation.as_ref()
    }

    /// Whether every job reached a terminal status
    pub fn is_finished(&self) -> bool {
        self.completed == self.statuses.len()
    }

    /// Indices of jobs not yet in a terminal status
    pub fn unfinished(&self) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(i, _)| i)
            .collect()
    }
}
