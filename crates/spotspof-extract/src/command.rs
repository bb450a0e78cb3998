//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use spotspof_core::{Error, Result};
use tokio::process::{Child, Command};

use crate::session::StreamSession;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

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
/// use spotspof_extract::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> spotspof_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("yt-dlp"))
///     .arg("-J")
///     .arg("--no-playlist")
///     .arg("https://www.youtube.com/watch?v=abc123")
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

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Short program name for logs and error messages.
    pub fn program_name(&self) -> String {
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
        // Own group, so helpers the tool forks (ffmpeg) die with it.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Run the command to completion, capturing stdout and stderr, without
    /// judging the exit status.
    ///
    /// # Errors
    ///
    /// - `ExtractionReason::Timeout` if the process outlives the timeout. The
    ///   child is killed when the wait future is dropped.
    /// - `ExtractionReason::ToolFailure` if spawning or waiting fails.
    pub async fn output(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();

        tracing::debug!(tool = %program_name, args = ?self.args, "Running tool");

        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool_failure(&program_name, format!("failed to spawn: {e}")))?;
        let mut group = ProcessGroup::of(&child);

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                group.disarm();
                Ok(ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            }
            Ok(Err(e)) => Err(Error::tool_failure(
                &program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(Error::timeout(format!(
                "{program_name} timed out after {:?}",
                self.timeout
            ))),
        }
    }

    /// Execute the command, failing on a non-zero exit status.
    ///
    /// # Errors
    ///
    /// Everything [`ToolCommand::output`] returns, plus
    /// `ExtractionReason::ToolFailure` for a non-zero exit (message includes
    /// stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let output = self.output().await?;
        if !output.status.success() {
            return Err(Error::tool_failure(
                self.program_name(),
                format!(
                    "exited with status {}: {}",
                    output.status,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output)
    }

    /// Spawn the command with its stdout exposed as a byte stream.
    ///
    /// The configured timeout does not apply; the reader of the session
    /// bounds the transfer instead.
    pub fn spawn_stream(&self) -> Result<StreamSession> {
        let program_name = self.program_name();

        tracing::debug!(tool = %program_name, args = ?self.args, "Spawning streaming tool");

        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool_failure(&program_name, format!("failed to spawn: {e}")))?;

        StreamSession::new(program_name, child)
    }
}

/// Kills every process in a spawned tool's process group when dropped, unless
/// disarmed after the tool exited on its own.
///
/// `kill_on_drop` only reaches the direct child; this also reaches whatever
/// the tool forked, which may still be writing next to a temp artifact.
#[derive(Debug)]
pub(crate) struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    pub(crate) fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    pub(crate) fn disarm(&mut self) {
        self.pgid = None;
    }

    /// Send `SIGKILL` to the whole group. A group that is already gone is
    /// not an error.
    pub(crate) fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => tracing::warn!(pgid, "Failed to kill process group: {e}"),
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
