//! Service descriptions and per-child bookkeeping.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use deployd_core::types::Timestamp;

/// How to launch one supervised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Name used in logs and errors (`serve`, `worker`, `scheduler`).
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Whether the service needs the shared working directory.
    pub uses_shared_workdir: bool,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            uses_shared_workdir: false,
        }
    }

    /// Build from an already split command line. `None` if `argv` is empty.
    pub fn from_argv(name: impl Into<String>, argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(name, program.clone(), args.to_vec()))
    }

    pub fn in_shared_workdir(mut self) -> Self {
        self.uses_shared_workdir = true;
        self
    }
}

/// Snapshot of one child owned by a process group.
#[derive(Debug, Clone)]
pub struct SupervisedProcess {
    pub name: String,
    pub pid: u32,
    pub launched_at: Timestamp,
    pub last_health_check: Option<Timestamp>,
    pub alive: bool,
}

/// How a child ended, as reported by its monitor task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildExit {
    pub service: String,
    pub pid: u32,
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when waiting on the child itself failed.
    pub wait_error: Option<String>,
}

impl ChildExit {
    pub(crate) fn from_wait(service: String, pid: u32, status: std::io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => Self {
                service,
                pid,
                code: status.code(),
                signal: status.signal(),
                wait_error: None,
            },
            Err(e) => Self {
                service,
                pid,
                code: None,
                signal: None,
                wait_error: Some(e.to_string()),
            },
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Short human-readable form, e.g. `exit code 3` or `killed by signal 9`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal, &self.wait_error) {
            (Some(code), _, _) => write!(f, "exit code {code}"),
            (None, Some(signal), _) => write!(f, "killed by signal {signal}"),
            (None, None, Some(err)) => write!(f, "wait failed: {err}"),
            (None, None, None) => write!(f, "unknown exit status"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
