//! Shell command executor - runs job commands as local subprocesses

use crate::core::CommandSpec;
use crate::execution::command::{
    CommandExecutor, CommandInvocation, CommandOutcome, ExecutorError,
};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SHELL: &str = "sh";

/// Executes commands with `sh -c` or directly as `program args...`
///
/// Stdout and stderr of every job are written to `<log_dir>/<job>.stdout.log`
/// and `<job>.stderr.log`; the stdout path is the output reference.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    log_dir: PathBuf,
    workdir: Option<PathBuf>,
    grace: Duration,
}

impl ShellExecutor {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            workdir: None,
            grace: crate::core::DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// How long a cancelled process may take to exit before it is killed
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Readable stem plus a short digest of the full id, so ids that only
    /// differ in replaced characters never share a log file
    fn log_paths(&self, job_id: &str) -> (PathBuf, PathBuf) {
        let readable: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '=') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let digest = hex::encode(Sha256::digest(job_id.as_bytes()));
        let stem = format!("{}-{}", readable, &digest[..8]);
        (
            self.log_dir.join(format!("{}.stdout.log", stem)),
            self.log_dir.join(format!("{}.stderr.log", stem)),
        )
    }

    fn build_command(&self, invocation: &CommandInvocation) -> Command {
        let mut command = match &invocation.command {
            CommandSpec::Shell(script) => {
                let mut cmd = Command::new(SHELL);
                cmd.arg("-c").arg(script);
                cmd
            }
            CommandSpec::Exec { program, args, env } => {
                let mut cmd = Command::new(program);
                cmd.args(args).envs(env);
                cmd
            }
        };

        command
            .envs(invocation.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command
    }

    /// First non-empty line of the stderr log, or a generic exit message
    async fn error_line(stderr_path: &Path, status: &ExitStatus) -> String {
        let stderr = tokio::fs::read_to_string(stderr_path)
            .await
            .unwrap_or_default();
        stderr
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match status.code() {
                Some(code) => format!("exited with code {}", code),
                None => "terminated by signal".to_string(),
            })
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(
        &self,
        invocation: &CommandInvocation,
        cancel: CancellationToken,
    ) -> Result<CommandOutcome, ExecutorError> {
        tokio::fs::create_dir_all(&self.log_dir).await?;
        let (stdout_path, stderr_path) = self.log_paths(&invocation.job_id);
        let output_ref = stdout_path.to_string_lossy().into_owned();

        let mut command = self.build_command(invocation);
        command
            .stdout(Stdio::from(File::create(&stdout_path)?))
            .stderr(Stdio::from(File::create(&stderr_path)?));

        debug!("Spawning '{}' for {}", invocation.command, invocation.job_id);
        let mut child = command.spawn().map_err(|source| ExecutorError::Spawn {
            command: invocation.command.to_string(),
            source,
        })?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                // Give the process a chance to finish on its own first
                if timeout(self.grace, child.wait()).await.is_err() {
                    warn!(
                        "{} did not exit within {:?} of cancellation, killing it",
                        invocation.job_id, self.grace
                    );
                    child.start_kill()?;
                    child.wait().await?;
                }
                return Ok(CommandOutcome::cancelled().with_output_ref(output_ref));
            }
        };

        if status.success() {
            Ok(CommandOutcome::success().with_output_ref(output_ref))
        } else {
            let line = Self::error_line(&stderr_path, &status).await;
            Ok(CommandOutcome::failure(status.code(), line).with_output_ref(output_ref))
        }
    }
}
