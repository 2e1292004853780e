//! Bounded retry loop around the migration executor.
//!
//! The controller walks `Idle -> Attempting -> {Succeeded | FatalAborted |
//! RetryExhausted}`. It sleeps a fixed backoff between transient failures,
//! stops at the first fatal one, and never sleeps after the final attempt.
//! A cancelled shutdown token ends the run after the in-flight attempt, and
//! cuts a backoff short, without reaching a terminal state.

use deployd_core::attempt::{Attempt, ErrorClass};
use deployd_core::fatal_signatures::FailureClassifier;
use deployd_core::retry::{Decision, RetryPolicy, RetryState};
use deployd_core::scenario::Scenario;
use tokio_util::sync::CancellationToken;

use crate::executor::{ExecutorError, MigrationExecutor};
use crate::tool::MigrationTool;

/// Terminal state of one controller run plus its attempt log.
#[derive(Debug)]
pub struct RetryOutcome {
    pub state: RetryState,
    pub attempts: Vec<Attempt>,
    /// Number of backoff sleeps taken.
    pub backoffs: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Migration interrupted by shutdown after {} attempt(s)", .attempts.len())]
    Interrupted { attempts: Vec<Attempt> },
}

pub struct RetryController<'a, T> {
    executor: MigrationExecutor<'a, T>,
    classifier: &'a FailureClassifier,
    policy: RetryPolicy,
    state: RetryState,
    shutdown: CancellationToken,
}

impl<'a, T: MigrationTool> RetryController<'a, T> {
    pub fn new(
        executor: MigrationExecutor<'a, T>,
        classifier: &'a FailureClassifier,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            classifier,
            policy,
            state: RetryState::Idle,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop retrying once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Drive attempts for `scenario` until a terminal state is reached.
    pub async fn run(&mut self, scenario: Scenario) -> Result<RetryOutcome, RetryError> {
        scenario.ensure_executable().map_err(ExecutorError::from)?;

        let mut attempts = Vec::new();
        let mut backoffs = 0;
        let mut index = 1;
        self.state = RetryState::Attempting;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(self.interrupted(attempts));
            }

            let mut attempt = self.executor.execute(scenario, index).await?;

            if !attempt.succeeded() && self.shutdown.is_cancelled() {
                attempts.push(attempt);
                return Err(self.interrupted(attempts));
            }

            if !attempt.succeeded() {
                let class = self.classifier.classify(&attempt.output);
                attempt.classification = Some(class);
                match class {
                    ErrorClass::FatalVersionMismatch => tracing::error!(
                        attempt = index,
                        exit_code = attempt.exit_code,
                        signature = self.classifier.matching_signature(&attempt.output).unwrap_or(""),
                        "Migration failed with a fatal version mismatch",
                    ),
                    ErrorClass::Transient => tracing::warn!(
                        attempt = index,
                        max_attempts = self.policy.max_attempts(),
                        exit_code = attempt.exit_code,
                        "Migration attempt failed transiently",
                    ),
                }
            }

            let decision = self.policy.decide(&attempt);
            attempts.push(attempt);
            self.state = decision.resulting_state();

            match decision {
                Decision::RetryAfter(delay) => {
                    tracing::info!(
                        delay_secs = delay.as_secs_f64(),
                        next_attempt = index + 1,
                        "Backing off before retrying migration",
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return Err(self.interrupted(attempts)),
                    }
                    backoffs += 1;
                    index += 1;
                }
                Decision::Succeed | Decision::Abort | Decision::GiveUp => break,
            }
        }

        tracing::info!(
            state = %self.state,
            attempts = attempts.len(),
            "Migration retry loop finished",
        );

        Ok(RetryOutcome {
            state: self.state,
            attempts,
            backoffs,
        })
    }

    fn interrupted(&self, attempts: Vec<Attempt>) -> RetryError {
        tracing::warn!(
            attempts = attempts.len(),
            state = %self.state,
            "Shutdown requested, abandoning migration retries",
        );
        RetryError::Interrupted { attempts }
    }
}
