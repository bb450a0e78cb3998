//! Live process output sessions.
//!
//! A [`StreamSession`] owns a running external process whose stdout is the
//! data channel. The process and everything it forked are killed when the
//! session is dropped, so a consumer that stops reading (client abort) never
//! leaves a stray process.

use std::process::ExitStatus;
use std::time::Duration;

use spotspof_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;

use crate::command::ProcessGroup;

/// How long [`StreamSession::finish`] waits for the process after stdout closed.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// How long to wait for the stderr drain once the process has exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// How a session's process ended.
#[derive(Debug, Clone)]
pub struct SessionExit {
    pub status: ExitStatus,
    /// Last `ERROR:` line on stderr, or the last non-empty line if the tool
    /// printed none.
    pub stderr: Option<String>,
}

impl SessionExit {
    /// Human-readable failure description for a non-zero exit.
    pub fn message(&self) -> String {
        self.stderr
            .clone()
            .unwrap_or_else(|| format!("exited with status {}", self.status))
    }
}

/// A running process whose stdout is read incrementally.
#[derive(Debug)]
pub struct StreamSession {
    tool: String,
    // Declared before `child` so the group is signalled first on drop.
    group: ProcessGroup,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<Option<String>>>,
}

impl StreamSession {
    /// Wrap a spawned child. Stdout must be piped; piped stderr is drained
    /// into the log so the child never blocks on a full stderr pipe.
    pub fn new(tool: String, mut child: Child) -> Result<Self> {
        let group = ProcessGroup::of(&child);
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool_failure(&tool, "stdout is not piped"))?;

        let stderr = child.stderr.take().map(|stderr| {
            let tool = tool.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last_error = None;
                let mut last_line = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(tool = %tool, "{line}");
                    let line = line.trim();
                    if line.starts_with("ERROR:") {
                        last_error = Some(line.to_string());
                    } else if !line.is_empty() {
                        last_line = Some(line.to_string());
                    }
                }
                last_error.or(last_line)
            })
        });

        Ok(Self {
            tool,
            group,
            child,
            stdout,
            stderr,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// OS process id, if the process is still running.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Read up to `buf.len()` bytes from the process output. `Ok(0)` means the
    /// channel closed.
    pub async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stdout.read(buf).await
    }

    /// Wait for the process to exit after its output closed. A process that
    /// lingers beyond the grace period is killed.
    pub async fn finish(self) -> Result<ExitStatus> {
        Ok(self.finish_with_stderr().await?.status)
    }

    /// [`StreamSession::finish`], also collecting the tool's last stderr
    /// line for error reporting.
    pub async fn finish_with_stderr(mut self) -> Result<SessionExit> {
        let status = match tokio::time::timeout(EXIT_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(Error::tool_failure(
                    &self.tool,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(_) => {
                self.terminate().await;
                return Err(Error::timeout(format!(
                    "{} did not exit within {:?} after closing its output",
                    self.tool, EXIT_GRACE
                )));
            }
        };
        self.group.disarm();

        let stderr = match self.stderr.take() {
            Some(handle) => match tokio::time::timeout(STDERR_GRACE, handle).await {
                Ok(Ok(line)) => line,
                _ => None,
            },
            None => None,
        };

        Ok(SessionExit { status, stderr })
    }

    /// Kill the process group and reap the process.
    pub async fn terminate(&mut self) {
        self.group.kill();
        if let Err(e) = self.child.kill().await {
            tracing::debug!(tool = %self.tool, "kill failed (already exited?): {e}");
        }
    }
}
