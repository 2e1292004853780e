//! End-to-end schema-evolution run: probe, classify, execute with retries.

use deployd_core::attempt::Attempt;
use deployd_core::fatal_signatures::FailureClassifier;
use deployd_core::migration_state::MigrationState;
use deployd_core::ownership::FileOwner;
use deployd_core::retry::{RetryPolicy, RetryState};
use deployd_core::scenario::{self, Scenario};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::Diagnostics;
use crate::executor::{ExecutorError, MigrationExecutor};
use crate::layout::MigrationLayout;
use crate::prober::{DatabaseProbe, ProbeError, StateProber};
use crate::retry::{RetryController, RetryError};
use crate::tool::MigrationTool;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Database has migration history but no migration files were shipped with this build")]
    SchemaDrift(Box<Diagnostics>),

    #[error("Migration aborted: version mismatch between database and migration chain")]
    FatalVersionMismatch(Box<Diagnostics>),

    #[error("Migration failed after {} attempts", .0.attempts.len())]
    RetryExhausted(Box<Diagnostics>),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("Migration interrupted by shutdown")]
    Interrupted,
}

impl PipelineError {
    /// The diagnostic report, for failures that produce one.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::SchemaDrift(d) | Self::FatalVersionMismatch(d) | Self::RetryExhausted(d) => {
                Some(d)
            }
            Self::Probe(_) | Self::Executor(_) | Self::Interrupted => None,
        }
    }
}

/// Result of a successful run.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: MigrationState,
    pub scenario: Scenario,
    /// `Idle` when nothing had to be executed, `Succeeded` otherwise.
    pub final_state: RetryState,
    pub attempts: Vec<Attempt>,
}

/// Everything one orchestration run of the schema pipeline needs.
pub struct MigrationPipeline<T, D> {
    tool: T,
    database: D,
    layout: MigrationLayout,
    classifier: FailureClassifier,
    policy: RetryPolicy,
    owner: FileOwner,
    shutdown: CancellationToken,
}

impl<T: MigrationTool, D: DatabaseProbe> MigrationPipeline<T, D> {
    pub fn new(tool: T, database: D, layout: MigrationLayout) -> Self {
        Self {
            tool,
            database,
            layout,
            classifier: FailureClassifier::default(),
            policy: RetryPolicy::default(),
            owner: FileOwner::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that interrupts the run between attempts. Tool invocations
    /// already in flight are stopped by the tool itself.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Owner applied to migration files generated on first deployment.
    pub fn with_file_owner(mut self, owner: FileOwner) -> Self {
        self.owner = owner;
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Run the pipeline once.
    ///
    /// `recent_logs` is only called on failure, to attach the latest
    /// service output to the diagnostic report.
    pub async fn run<F>(&self, recent_logs: F) -> Result<PipelineOutcome, PipelineError>
    where
        F: FnOnce() -> Vec<String>,
    {
        let prober = StateProber::new(&self.tool, &self.database, &self.layout, &self.classifier);
        let state = match prober.probe().await {
            Ok(state) => state,
            Err(_) if self.shutdown.is_cancelled() => return Err(PipelineError::Interrupted),
            Err(e) => return Err(e.into()),
        };
        let scenario = scenario::classify(&state);

        tracing::info!(scenario = %scenario, "Classified deployment scenario");

        match scenario {
            Scenario::InitializedWithNoFiles => {
                return Err(PipelineError::SchemaDrift(Box::new(Diagnostics::new(
                    RetryState::Idle,
                    scenario,
                    &state,
                    Vec::new(),
                    recent_logs(),
                ))));
            }
            Scenario::NoPendingChanges => {
                tracing::info!(
                    revision = state.current_revision.as_deref().unwrap_or("<none>"),
                    "Database is at head, nothing to migrate",
                );
                return Ok(PipelineOutcome {
                    state,
                    scenario,
                    final_state: RetryState::Idle,
                    attempts: Vec::new(),
                });
            }
            Scenario::UndeterminedProceed => {
                tracing::warn!(
                    current = state.current_revision.as_deref().unwrap_or("<unknown>"),
                    heads = ?state.heads,
                    "Could not compare database revision with migration head; proceeding with upgrade",
                );
            }
            Scenario::BootstrapNewDeployment | Scenario::PendingUpgrade => {}
        }

        let executor = MigrationExecutor::new(&self.tool, &self.layout, self.owner);
        let mut controller = RetryController::new(executor, &self.classifier, self.policy)
            .with_shutdown(self.shutdown.clone());
        let outcome = match controller.run(scenario).await {
            Ok(outcome) => outcome,
            Err(RetryError::Interrupted { .. }) => return Err(PipelineError::Interrupted),
            Err(RetryError::Executor(e)) => return Err(e.into()),
        };

        match outcome.state {
            RetryState::Succeeded => Ok(PipelineOutcome {
                state,
                scenario,
                final_state: outcome.state,
                attempts: outcome.attempts,
            }),
            RetryState::FatalAborted => Err(PipelineError::FatalVersionMismatch(Box::new(
                Diagnostics::new(outcome.state, scenario, &state, outcome.attempts, recent_logs()),
            ))),
            _ => Err(PipelineError::RetryExhausted(Box::new(Diagnostics::new(
                RetryState::RetryExhausted,
                scenario,
                &state,
                outcome.attempts,
                recent_logs(),
            )))),
        }
    }
}
