//! Command execution interface

use crate::core::{CommandSpec, Job};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything an executor needs to run one job's command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Id of the job the command belongs to
    pub job_id: String,

    pub command: CommandSpec,

    /// Matrix values as `MATRIX_<AXIS>` variables
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            command: job.command.clone(),
            env: job.combination.env_vars(),
        }
    }
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    /// Non-zero exit, with the code if the process reported one
    Failure(Option<i32>),
    /// Stopped in response to the cancellation token
    Cancelled,
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub status: CommandStatus,

    /// Where the command's output was written
    pub output_ref: Option<String>,

    /// First line of error output, if any
    pub error_line: Option<String>,
}

impl CommandOutcome {
    pub fn success() -> Self {
        Self {
            status: CommandStatus::Success,
            output_ref: None,
            error_line: None,
        }
    }

    pub fn failure(code: Option<i32>, error_line: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failure(code),
            output_ref: None,
            error_line: Some(error_line.into()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: CommandStatus::Cancelled,
            output_ref: None,
            error_line: None,
        }
    }

    pub fn with_output_ref(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }
}

/// The command could not be run at all
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while running command: {0}")]
    Io(#[from] std::io::Error),

    #[error("executor error: {0}")]
    Internal(String),
}

/// Runs opaque command descriptors
///
/// Implementations must observe `cancel` and stop promptly, reporting
/// [`CommandStatus::Cancelled`], when it is signalled.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome, ExecutorError>;
}
