//! Reads the current migration state of the deployment.
//!
//! The prober first confirms the database accepts connections (failing fast
//! with [`ProbeError::DatabaseUnreachable`]), then counts migration files on
//! disk and asks the migration tool for the current and head revisions.

use std::future::Future;
use std::path::PathBuf;

use deployd_core::attempt::ErrorClass;
use deployd_core::fatal_signatures::FailureClassifier;
use deployd_core::migration_state::{parse_revisions, MigrationState};
use deployd_core::subprocess::CommandError;
use deployd_db::{DatabaseTarget, DbError};

use crate::layout::MigrationLayout;
use crate::tool::MigrationTool;

/// Something that can tell whether the target database accepts connections.
pub trait DatabaseProbe: Send + Sync {
    fn ping(&self) -> impl Future<Output = Result<(), DbError>> + Send;
}

impl DatabaseProbe for DatabaseTarget {
    async fn ping(&self) -> Result<(), DbError> {
        self.check_reachable().await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Database unreachable: {0}")]
    DatabaseUnreachable(#[from] DbError),

    #[error("Migration tool failed to report {operation} (exit {exit_code}): {output}")]
    ToolFailed {
        operation: &'static str,
        exit_code: i32,
        output: String,
    },

    #[error("Could not run migration tool for {operation}: {source}")]
    ToolUnavailable {
        operation: &'static str,
        #[source]
        source: CommandError,
    },

    #[error("Could not read migration directory {path}: {source}")]
    MigrationDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces a fresh [`MigrationState`] for one orchestration run.
pub struct StateProber<'a, T, D> {
    tool: &'a T,
    database: &'a D,
    layout: &'a MigrationLayout,
    classifier: &'a FailureClassifier,
}

impl<'a, T: MigrationTool, D: DatabaseProbe> StateProber<'a, T, D> {
    pub fn new(
        tool: &'a T,
        database: &'a D,
        layout: &'a MigrationLayout,
        classifier: &'a FailureClassifier,
    ) -> Self {
        Self {
            tool,
            database,
            layout,
            classifier,
        }
    }

    pub async fn probe(&self) -> Result<MigrationState, ProbeError> {
        self.database.ping().await?;

        let file_count =
            self.layout
                .count_files()
                .await
                .map_err(|source| ProbeError::MigrationDir {
                    path: self.layout.dir().to_path_buf(),
                    source,
                })?;

        let (current_revision, initialized) = self.current_revision().await?;
        let heads = self.heads().await?;

        let state = MigrationState::new(current_revision, heads, file_count, initialized);
        tracing::info!(
            current = state.current_revision.as_deref().unwrap_or("<none>"),
            head = state.head_revision.as_deref().unwrap_or("<none>"),
            heads = state.heads.len(),
            file_count = state.file_count,
            initialized = state.initialized,
            "Probed migration state",
        );
        Ok(state)
    }

    /// Returns the resolvable current revision and whether the database has
    /// recorded any revision at all.
    async fn current_revision(&self) -> Result<(Option<String>, bool), ProbeError> {
        let output = self
            .tool
            .current()
            .await
            .map_err(|source| ProbeError::ToolUnavailable {
                operation: "current",
                source,
            })?;

        if output.success() {
            let revisions = parse_revisions(&output.stdout);
            return Ok(match revisions.as_slice() {
                [] => (None, false),
                [single] => (Some(single.clone()), true),
                several => {
                    tracing::warn!(
                        revisions = ?several,
                        "Database records several current revisions",
                    );
                    (None, true)
                }
            });
        }

        // The database points at a revision the migration chain cannot
        // resolve. It is initialized, but its position is unknown.
        let combined = output.combined();
        if self.classifier.classify(&combined) == ErrorClass::FatalVersionMismatch {
            tracing::warn!(
                exit_code = output.exit_code,
                output = %combined,
                "Current revision is not resolvable against the migration chain",
            );
            return Ok((None, true));
        }

        Err(ProbeError::ToolFailed {
            operation: "current",
            exit_code: output.exit_code,
            output: combined,
        })
    }

    async fn heads(&self) -> Result<Vec<String>, ProbeError> {
        let output = self
            .tool
            .heads()
            .await
            .map_err(|source| ProbeError::ToolUnavailable {
                operation: "heads",
                source,
            })?;

        if output.success() {
            Ok(parse_revisions(&output.stdout))
        } else {
            tracing::warn!(
                exit_code = output.exit_code,
                output = %output.combined(),
                "Migration tool could not report heads; treating them as unknown",
            );
            Ok(Vec::new())
        }
    }
}
