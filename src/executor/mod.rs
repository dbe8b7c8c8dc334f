//! Command execution abstractions and implementations.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::ExecutorConfig;
use crate::sandbox::CommandSpec;

pub mod process;

pub use process::ProcessExecutor;

/// Command execution options.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Maximum command runtime before the child is killed.
    pub timeout: Duration,
    /// Bytes kept per output stream. Excess is drained and discarded.
    pub max_output_bytes: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for ExecOptions {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

/// Result of a sandboxed tool that ran to completion.
///
/// A non-zero `exit_code` is the tool's own report, not a harness failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout text, lossily decoded.
    pub stdout: String,
    /// Captured stderr text, lossily decoded.
    pub stderr: String,
    /// Whether stdout exceeded the capture bound.
    pub stdout_truncated: bool,
    /// Whether stderr exceeded the capture bound.
    pub stderr_truncated: bool,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
}

impl ExecutionOutcome {
    /// Returns `true` when the tool exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Harness failures. The tool did not produce a usable outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The command has no executable.
    #[error("command is empty")]
    EmptyCommand,
    /// The process could not be started or ended without an exit status.
    #[error("sandbox launch failed: {0}")]
    LaunchFailed(String),
    /// Command execution exceeded the deadline and was killed.
    #[error("command timed out after {seconds}s")]
    Timeout {
        /// Timeout budget in seconds.
        seconds: u64,
    },
}

impl ExecutorError {
    /// Stable snake_case tag for machine-readable reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyCommand => "empty_command",
            Self::LaunchFailed(_) => "launch_failed",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Runs a fully built command and captures its outcome.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Launch exactly `command` and wait for it to finish.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError`] only for harness failures. A tool that exits
    /// non-zero yields `Ok`.
    async fn execute(&self, command: &CommandSpec) -> Result<ExecutionOutcome, ExecutorError>;
}
