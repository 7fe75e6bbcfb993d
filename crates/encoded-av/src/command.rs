//! Builder for executing external tool commands with timeout and
//! cancellation support.
//!
//! The outcome of a run is typed: a successful [`ToolOutput`] or a
//! [`ToolError`] saying whether the process could not start, ran too long,
//! was cancelled, or exited non-zero. Callers map that onto their own error
//! taxonomy instead of sniffing stderr.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Upper bound on captured bytes per stream. The tail is kept.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Output captured from a successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Wall-clock run time.
    pub duration: Duration,
}

/// Why a tool execution did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The process could not be spawned (missing binary, permissions).
    #[error("{tool}: failed to spawn: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exceeded its timeout and was killed.
    #[error("{tool}: timed out after {timeout:?}")]
    TimedOut { tool: String, timeout: Duration },

    /// The run was cancelled and the process was killed.
    #[error("{tool}: cancelled after {elapsed:?}")]
    Cancelled { tool: String, elapsed: Duration },

    /// The process exited unsuccessfully.
    #[error("{tool}: exited with {status}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
        duration: Duration,
    },

    /// Waiting on the process failed.
    #[error("{tool}: I/O error waiting for process: {source}")]
    Io {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    /// Exit code of the process, when it exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ToolError::Failed { status, .. } => status.code(),
            _ => None,
        }
    }
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use encoded_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> Result<(), encoded_av::ToolError> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-version")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    pub async fn execute(&self) -> Result<ToolOutput, ToolError> {
        self.execute_cancellable(&CancellationToken::new()).await
    }

    /// Execute the command, killing the process if `cancel` fires or the
    /// timeout expires. The child never outlives this call.
    pub async fn execute_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|source| ToolError::Spawn {
            tool: tool.clone(),
            source,
        })?;

        // Drain both pipes concurrently so a chatty child cannot block on a
        // full pipe while we wait for it.
        let stdout_task = tokio::spawn(read_capped(child.stdout.take()));
        let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

        enum Ending {
            Exited(std::io::Result<ExitStatus>),
            TimedOut,
            Cancelled,
        }

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status),
            _ = tokio::time::sleep(self.timeout) => Ending::TimedOut,
            _ = cancel.cancelled() => Ending::Cancelled,
        };

        match ending {
            Ending::Exited(Ok(status)) => {
                let stdout = stdout_task.await.unwrap_or_default();
                let stderr = stderr_task.await.unwrap_or_default();
                let duration = started.elapsed();
                let stdout = String::from_utf8_lossy(&stdout).to_string();
                let stderr = String::from_utf8_lossy(&stderr).to_string();

                tracing::debug!(tool = %tool, %status, ?duration, "Tool exited");

                if !status.success() {
                    return Err(ToolError::Failed {
                        tool,
                        status,
                        stderr,
                        duration,
                    });
                }

                Ok(ToolOutput {
                    status,
                    stdout,
                    stderr,
                    duration,
                })
            }
            Ending::Exited(Err(source)) => {
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::Io { tool, source })
            }
            Ending::TimedOut => {
                kill_child(&mut child, &tool).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::TimedOut {
                    tool,
                    timeout: self.timeout,
                })
            }
            Ending::Cancelled => {
                kill_child(&mut child, &tool).await;
                stdout_task.abort();
                stderr_task.abort();
                Err(ToolError::Cancelled {
                    tool,
                    elapsed: started.elapsed(),
                })
            }
        }
    }
}

async fn kill_child(child: &mut tokio::process::Child, tool: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool = %tool, "Failed to kill process: {e}");
    }
}

/// Read a pipe to EOF, keeping at most [`MAX_CAPTURE_BYTES`] of the tail.
async fn read_capped<R>(reader: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Vec::new();
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.len() > 2 * MAX_CAPTURE_BYTES {
                    let excess = buf.len() - MAX_CAPTURE_BYTES;
                    buf.drain(..excess);
                }
            }
        }
    }
    if buf.len() > MAX_CAPTURE_BYTES {
        let excess = buf.len() - MAX_CAPTURE_BYTES;
        buf.drain(..excess);
    }
    buf
}
