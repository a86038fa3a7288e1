//! Builder for executing external tool commands with timeout support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// How many trailing stderr lines a streaming run keeps for its error message.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use rf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> rf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-show_entries").arg("format=duration")
///     .arg("/path/to/video.mp4")
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

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`rf_core::Error::Tool`] if spawning fails, if the process
    /// times out, or if it exits with a non-zero status (message includes
    /// stderr).
    pub async fn execute(&self) -> rf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let child = self.command().spawn().map_err(|e| rf_core::Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        // The child is dropped (and killed) if the timeout wins.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(rf_core::Error::Tool {
                        tool: program_name,
                        message: format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    });
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(rf_core::Error::Tool {
                tool: program_name,
                message: format!("I/O error waiting for process: {e}"),
            }),
            Err(_elapsed) => Err(rf_core::Error::Tool {
                tool: program_name,
                message: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    /// Execute the command, handing each stdout line to `on_line` as it
    /// arrives.
    ///
    /// Stderr is drained concurrently and only its last lines are kept; they
    /// form the error message when the process exits non-zero. On timeout the
    /// child is killed.
    pub async fn execute_streaming<F>(&self, mut on_line: F) -> rf_core::Result<ExitStatus>
    where
        F: FnMut(&str),
    {
        let program_name = self.program_name();

        let mut child = self.command().spawn().map_err(|e| rf_core::Error::Tool {
            tool: program_name.clone(),
            message: format!("failed to spawn: {e}"),
        })?;

        let stdout = child.stdout.take().ok_or_else(|| rf_core::Error::Tool {
            tool: program_name.clone(),
            message: "stdout was not captured".into(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| rf_core::Error::Tool {
            tool: program_name.clone(),
            message: "stderr was not captured".into(),
        })?;

        let stderr_task = tokio::spawn(collect_stderr_tail(stderr));

        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                on_line(line.trim_end());
            }
            child.wait().await
        };

        let outcome = tokio::time::timeout(self.timeout, run).await;
        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                stderr_task.abort();
                return Err(rf_core::Error::Tool {
                    tool: program_name,
                    message: format!("I/O error reading process output: {e}"),
                });
            }
            Err(_elapsed) => {
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill timed-out {program_name}: {e}");
                }
                stderr_task.abort();
                return Err(rf_core::Error::Tool {
                    tool: program_name,
                    message: format!("timed out after {:?}", self.timeout),
                });
            }
        };

        let tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = tail.trim();
            let message = if detail.is_empty() {
                format!("exited with status {status}")
            } else {
                format!("exited with status {status}: {detail}")
            };
            return Err(rf_core::Error::Tool {
                tool: program_name,
                message,
            });
        }

        Ok(status)
    }
}

/// Read a child's stderr to completion, keeping only the trailing lines.
async fn collect_stderr_tail(stderr: tokio::process::ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    if reader.read_to_end(&mut buf).await.is_err() {
        return String::new();
    }

    let text = String::from_utf8_lossy(&buf);
    let mut tail: VecDeque<&str> = VecDeque::with_capacity(STDERR_TAIL_LINES);
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_delivers_lines_in_order() {
        let mut seen = Vec::new();
        let status = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo one; echo two; echo three"])
            .execute_streaming(|line| seen.push(line.to_string()))
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_failure_reports_stderr_tail() {
        let err = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "echo progress=continue; echo 'Invalid data found' >&2; exit 3"])
            .execute_streaming(|_| {})
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Invalid data found"), "unexpected error: {msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streaming_timeout_kills_child() {
        let err = ToolCommand::new(PathBuf::from("sh"))
            .args(["-c", "sleep 10"])
            .timeout(Duration::from_millis(100))
            .execute_streaming(|_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
