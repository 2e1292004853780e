//! One execution try of the migration upgrade, and its classification.

use std::fmt;

use serde::Serialize;

use crate::types::Timestamp;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The migration graph is inconsistent with the database. Retrying
    /// cannot help.
    FatalVersionMismatch,
    /// Connection drops, lock contention, tool startup races.
    Transient,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FatalVersionMismatch => f.write_str("fatal_version_mismatch"),
            Self::Transient => f.write_str("transient"),
        }
    }
}

/// Captured result of one execution of the upgrade operation.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    /// 1-based position in the run's attempt log.
    pub index: u32,
    /// Combined stdout and stderr of every tool invocation in the attempt.
    pub output: String,
    /// Exit code of the last tool invocation (`-1` if it never exited).
    pub exit_code: i32,
    /// Set by the error classifier once the attempt is known to have failed.
    pub classification: Option<ErrorClass>,
    pub started_at: Timestamp,
    pub duration_ms: u64,
}

impl Attempt {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
