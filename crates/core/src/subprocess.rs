//! Run one external command to completion and capture what it printed.
//!
//! Used for every migration-tool invocation. The caller builds the
//! [`tokio::process::Command`] (program, arguments, environment, working
//! directory); [`run_command`] handles the spawn, output capture and timeout.
//! [`run_command_interruptible`] additionally stops the child cooperatively
//! when an [`Interrupt`] token fires: SIGTERM first, a kill only after the
//! grace window.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Captured output from a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, the way an operator would read them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

/// Errors that prevent a command from producing an exit status.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The command exceeded its timeout and was killed.
    #[error("Command timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed wall-clock time before the process was killed.
        elapsed_ms: u64,
    },

    /// The caller asked the command to stop before it finished.
    #[error("Command interrupted after {elapsed_ms}ms (killed after grace window: {killed})")]
    Interrupted {
        elapsed_ms: u64,
        /// Exit code the child reported after SIGTERM, if it exited normally.
        exit_code: Option<i32>,
        /// The child outlived the grace window and was killed.
        killed: bool,
    },

    /// Spawning or waiting on the process failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Cooperative stop request for a running command.
#[derive(Debug, Clone)]
pub struct Interrupt {
    pub token: CancellationToken,
    /// Time the child gets between SIGTERM and the kill.
    pub grace: Duration,
}

impl Interrupt {
    pub fn new(token: CancellationToken, grace: Duration) -> Self {
        Self { token, grace }
    }
}

/// Spawn `cmd`, capture stdout/stderr and wait for it within `timeout`.
///
/// Stdin is closed. The child is killed if the timeout expires.
pub async fn run_command(cmd: &mut Command, timeout: Duration) -> Result<CommandOutput, CommandError> {
    run_command_interruptible(cmd, timeout, None).await
}

/// [`run_command`], stopping the child when `interrupt` fires.
///
/// On interrupt the child receives SIGTERM and has `interrupt.grace` to exit
/// before it is killed. Either way the result is
/// [`CommandError::Interrupted`].
pub async fn run_command_interruptible(
    cmd: &mut Command,
    timeout: Duration,
    interrupt: Option<&Interrupt>,
) -> Result<CommandOutput, CommandError> {
    // `kill_on_drop(true)` ensures the child is killed when dropped (e.g. on timeout).
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();

    let mut child = cmd.spawn()?;

    // Read the pipes in spawned tasks so `child.wait()` can borrow `child`.
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
    let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

    let interrupted = async {
        match interrupt {
            Some(interrupt) => interrupt.token.cancelled().await,
            None => std::future::pending().await,
        }
    };

    let waited = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait()) => Waited::Finished(result.ok()),
        _ = interrupted => Waited::Interrupted,
    };

    match waited {
        Waited::Finished(Some(Ok(status))) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let stdout_bytes = stdout_task.await.unwrap_or_default();
            let stderr_bytes = stderr_task.await.unwrap_or_default();

            Ok(CommandOutput {
                stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
                exit_code: status.code().unwrap_or(-1),
                duration_ms,
            })
        }
        Waited::Finished(Some(Err(e))) => Err(CommandError::Io(e)),
        Waited::Finished(None) => Err(CommandError::Timeout {
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
        Waited::Interrupted => {
            let grace = interrupt.map(|i| i.grace).unwrap_or_default();
            let (status, killed) = stop_gracefully(&mut child, grace).await;
            Err(CommandError::Interrupted {
                elapsed_ms: start.elapsed().as_millis() as u64,
                exit_code: status.and_then(|s| s.code()),
                killed,
            })
        }
    }
}

enum Waited {
    /// `None` when the timeout expired first.
    Finished(Option<io::Result<ExitStatus>>),
    Interrupted,
}

/// SIGTERM `child`, give it `grace` to exit, then kill it. Returns the exit
/// status (if reaped) and whether the kill was needed.
async fn stop_gracefully(child: &mut Child, grace: Duration) -> (Option<ExitStatus>, bool) {
    if let Some(pid) = child.id() {
        // A failed SIGTERM means the child is already gone; the wait below reaps it.
        let _ = send_terminate(pid);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => (status.ok(), false),
        Err(_) => {
            let _ = child.kill().await;
            (None, true)
        }
    }
}

/// Ask process `pid` to terminate gracefully.
pub fn send_terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range")))?;
    // SAFETY: kill(2) only takes integer arguments and does not touch memory.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
