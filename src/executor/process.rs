//! Executor backed by `tokio::process`.
//!
//! The command runs as a direct child: no shell, stdin closed, stdout and
//! stderr piped into bounded buffers. The child is killed when the deadline
//! expires or the future is dropped.

use std::process::Stdio;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::sandbox::CommandSpec;

use super::{ExecOptions, ExecutionOutcome, Executor, ExecutorError};

const READ_CHUNK: usize = 8192;

/// Launches commands as local child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    options: ExecOptions,
}

impl ProcessExecutor {
    /// Create an executor with the given limits.
    pub fn new(options: ExecOptions) -> Self {
        Self { options }
    }

    /// Limits applied to every execution.
    pub fn options(&self) -> &ExecOptions {
        &self.options
    }
}

#[async_trait::async_trait]
impl Executor for ProcessExecutor {
    async fn execute(&self, command: &CommandSpec) -> Result<ExecutionOutcome, ExecutorError> {
        if command.is_empty() {
            return Err(ExecutorError::EmptyCommand);
        }
        let program = command.program().ok_or(ExecutorError::EmptyCommand)?;

        let started = Instant::now();
        let mut child = Command::new(program)
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutorError::LaunchFailed(format!("{program}: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutorError::LaunchFailed("failed to capture stdout".to_owned()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutorError::LaunchFailed("failed to capture stderr".to_owned()))?;

        let limit = self.options.max_output_bytes;
        let waited = tokio::time::timeout(self.options.timeout, async {
            tokio::join!(
                read_bounded(stdout, limit),
                read_bounded(stderr, limit),
                child.wait()
            )
        })
        .await;

        let (stdout, stderr, status) = match waited {
            Ok(parts) => parts,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(program, error = %e, "failed to kill timed out child");
                }
                return Err(ExecutorError::Timeout {
                    seconds: self.options.timeout.as_secs(),
                });
            }
        };

        let status = status.map_err(|e| ExecutorError::LaunchFailed(e.to_string()))?;
        let stdout = stdout.map_err(|e| ExecutorError::LaunchFailed(e.to_string()))?;
        let stderr = stderr.map_err(|e| ExecutorError::LaunchFailed(e.to_string()))?;

        let exit_code = status.code().ok_or_else(|| {
            ExecutorError::LaunchFailed(format!("process ended without exit status ({status})"))
        })?;

        let duration = started.elapsed();
        debug!(
            program,
            exit_code,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            stdout_truncated = stdout.truncated,
            stderr_truncated = stderr.truncated,
            "sandboxed command finished"
        );

        Ok(ExecutionOutcome {
            exit_code,
            stdout: stdout.text,
            stderr: stderr.text,
            stdout_truncated: stdout.truncated,
            stderr_truncated: stderr.truncated,
            duration,
        })
    }
}

struct Captured {
    text: String,
    truncated: bool,
}

/// Read `reader` to EOF, keeping at most `limit` bytes.
///
/// Reading continues past the limit so the child never blocks on a full pipe.
async fn read_bounded<R>(mut reader: R, limit: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let take = n.min(room);
        if take < n {
            truncated = true;
        }
        if let Some(slice) = chunk.get(..take) {
            kept.extend_from_slice(slice);
        }
    }
    Ok(Captured {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    })
}
