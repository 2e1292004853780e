use deployd_core::exit_codes::*;
use deployd_migrate::pipeline::PipelineError;
use deployd_migrate::prober::ProbeError;
use deployd_supervisor::SupervisorError;

use crate::config::ConfigError;

/// Every way a deployment run can end badly.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Migration(#[from] PipelineError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

impl OrchestratorError {
    /// Process exit code for this failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(ConfigError::CommandNotFound { .. }) => EXIT_MISSING_COMMAND,
            Self::Config(_) => EXIT_CONFIG,

            Self::Migration(PipelineError::Probe(ProbeError::DatabaseUnreachable(_))) => {
                EXIT_DATABASE_UNREACHABLE
            }
            Self::Migration(PipelineError::Probe(_)) => EXIT_PROBE_FAILED,
            Self::Migration(PipelineError::SchemaDrift(_)) => EXIT_SCHEMA_DRIFT,
            Self::Migration(PipelineError::FatalVersionMismatch(_)) => EXIT_FATAL_VERSION_MISMATCH,
            Self::Migration(PipelineError::RetryExhausted(_)) => EXIT_RETRY_EXHAUSTED,
            // Only reachable if a non-executable scenario reached the executor.
            Self::Migration(PipelineError::Executor(_)) => EXIT_PROBE_FAILED,
            // The startup sequence turns this into a clean shutdown.
            Self::Migration(PipelineError::Interrupted) => EXIT_OK,

            Self::Supervisor(SupervisorError::Spawn { .. } | SupervisorError::StartupFailed(_)) => {
                EXIT_STARTUP_FAILURE
            }
            Self::Supervisor(SupervisorError::ChildCrashed(_)) => EXIT_CHILD_CRASH,
            Self::Supervisor(SupervisorError::Workdir { .. } | SupervisorError::Signal(_)) => {
                EXIT_SUPERVISOR_IO
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use deployd_core::error::CoreError;
    use deployd_core::migration_state::MigrationState;
    use deployd_core::retry::RetryState;
    use deployd_core::scenario::Scenario;
    use deployd_db::DbError;
    use deployd_migrate::diagnostics::Diagnostics;
    use deployd_migrate::executor::ExecutorError;
    use deployd_supervisor::ChildExit;

    use super::*;

    fn diagnostics() -> Box<Diagnostics> {
        let state = MigrationState::new(Some("r1".into()), vec![], 0, true);
        Box::new(Diagnostics::new(
            RetryState::Idle,
            Scenario::InitializedWithNoFiles,
            &state,
            vec![],
            vec![],
        ))
    }

    fn exit(service: &str, code: i32) -> ChildExit {
        ChildExit {
            service: service.to_string(),
            pid: 42,
            code: Some(code),
            signal: None,
            wait_error: None,
        }
    }

    #[test]
    fn configuration_failures() {
        let missing_file = OrchestratorError::from(ConfigError::EnvFileMissing {
            env: "production".into(),
            path: PathBuf::from("secret/.env.production"),
        });
        assert_eq!(missing_file.exit_code(), EXIT_CONFIG);

        let missing_cmd = OrchestratorError::from(ConfigError::CommandNotFound {
            program: "alembic".into(),
            purpose: "migrations",
        });
        assert_eq!(missing_cmd.exit_code(), EXIT_MISSING_COMMAND);
    }

    #[test]
    fn migration_failures() {
        let unreachable = OrchestratorError::from(PipelineError::from(ProbeError::DatabaseUnreachable(
            DbError::Timeout {
                target: "mysql://db/blog".into(),
                secs: 20,
            },
        )));
        assert_eq!(unreachable.exit_code(), EXIT_DATABASE_UNREACHABLE);

        let probe = OrchestratorError::from(PipelineError::from(ProbeError::ToolFailed {
            operation: "current",
            exit_code: 1,
            output: "ImportError".into(),
        }));
        assert_eq!(probe.exit_code(), EXIT_PROBE_FAILED);

        assert_eq!(
            OrchestratorError::from(PipelineError::SchemaDrift(diagnostics())).exit_code(),
            EXIT_SCHEMA_DRIFT
        );
        assert_eq!(
            OrchestratorError::from(PipelineError::FatalVersionMismatch(diagnostics())).exit_code(),
            EXIT_FATAL_VERSION_MISMATCH
        );
        assert_eq!(
            OrchestratorError::from(PipelineError::RetryExhausted(diagnostics())).exit_code(),
            EXIT_RETRY_EXHAUSTED
        );
        assert_eq!(
            OrchestratorError::from(PipelineError::from(ExecutorError::from(
                CoreError::NotExecutable(Scenario::NoPendingChanges)
            )))
            .exit_code(),
            EXIT_PROBE_FAILED
        );
    }

    #[test]
    fn supervisor_failures() {
        assert_eq!(
            OrchestratorError::from(SupervisorError::StartupFailed(exit("worker", 1))).exit_code(),
            EXIT_STARTUP_FAILURE
        );
        assert_eq!(
            OrchestratorError::from(SupervisorError::ChildCrashed(exit("serve", 137))).exit_code(),
            EXIT_CHILD_CRASH
        );
        assert_eq!(
            OrchestratorError::from(SupervisorError::Workdir {
                path: PathBuf::from("/tmp/celery"),
                source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            })
            .exit_code(),
            EXIT_SUPERVISOR_IO
        );
    }

    #[test]
    fn codes_are_distinct_per_class() {
        let mut codes = vec![
            EXIT_CONFIG,
            EXIT_MISSING_COMMAND,
            EXIT_DATABASE_UNREACHABLE,
            EXIT_PROBE_FAILED,
            EXIT_FATAL_VERSION_MISMATCH,
            EXIT_SCHEMA_DRIFT,
            EXIT_RETRY_EXHAUSTED,
            EXIT_STARTUP_FAILURE,
            EXIT_CHILD_CRASH,
            EXIT_SUPERVISOR_IO,
        ];
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
        assert!(!codes.contains(&EXIT_OK));
    }
}
