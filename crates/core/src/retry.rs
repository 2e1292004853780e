//! Bounded retry state machine for migration attempts.
//!
//! The controller that actually sleeps and invokes the migration tool lives
//! in `deployd-migrate`; this module only decides what happens after each
//! attempt so the transitions stay pure and testable.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::attempt::{Attempt, ErrorClass};
use crate::error::CoreError;

/// Upper bound on execution attempts per orchestration run.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fixed wait between a transient failure and the next attempt.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Retry budget and backoff interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Build a policy. At least one attempt is required.
    pub fn new(max_attempts: u32, backoff: Duration) -> Result<Self, CoreError> {
        if max_attempts == 0 {
            return Err(CoreError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Decide the next step after `attempt` has been classified.
    ///
    /// An unclassified failure counts as transient.
    pub fn decide(&self, attempt: &Attempt) -> Decision {
        if attempt.succeeded() {
            return Decision::Succeed;
        }

        match attempt.classification {
            Some(ErrorClass::FatalVersionMismatch) => Decision::Abort,
            Some(ErrorClass::Transient) | None if attempt.index < self.max_attempts => {
                Decision::RetryAfter(self.backoff)
            }
            Some(ErrorClass::Transient) | None => Decision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// What the controller does after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Succeed,
    Abort,
    RetryAfter(Duration),
    GiveUp,
}

impl Decision {
    /// State the controller is in once the decision has been applied.
    pub fn resulting_state(self) -> RetryState {
        match self {
            Self::Succeed => RetryState::Succeeded,
            Self::Abort => RetryState::FatalAborted,
            Self::RetryAfter(_) => RetryState::Attempting,
            Self::GiveUp => RetryState::RetryExhausted,
        }
    }
}

/// Retry controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Idle,
    Attempting,
    Succeeded,
    FatalAborted,
    RetryExhausted,
}

impl RetryState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::FatalAborted | Self::RetryExhausted
        )
    }
}

impl fmt::Display for RetryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Attempting => "attempting",
            Self::Succeeded => "succeeded",
            Self::FatalAborted => "fatal_aborted",
            Self::RetryExhausted => "retry_exhausted",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
