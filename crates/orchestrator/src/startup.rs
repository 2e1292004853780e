//! The startup sequence: migrate, launch, supervise.

use deployd_core::fatal_signatures::FailureClassifier;
use deployd_db::DatabaseTarget;
use deployd_migrate::layout::MigrationLayout;
use deployd_migrate::pipeline::{MigrationPipeline, PipelineError, PipelineOutcome};
use deployd_migrate::prober::DatabaseProbe;
use deployd_migrate::tool::{CommandMigrationTool, MigrationTool};
use deployd_supervisor::log_tail::LogTail;
use deployd_supervisor::signal::listen_for_termination;
use deployd_supervisor::workdir::SharedWorkdir;
use deployd_supervisor::ProcessGroup;
use tokio_util::sync::CancellationToken;

use crate::config::{OrchestratorConfig, StartupOrder};
use crate::error::OrchestratorError;

/// Wire the schema pipeline from configuration.
///
/// `shutdown` stops a running tool invocation (SIGTERM, then a kill after
/// the shutdown timeout) and ends the retry loop.
pub fn build_pipeline(
    config: &OrchestratorConfig,
    shutdown: &CancellationToken,
) -> MigrationPipeline<CommandMigrationTool, DatabaseTarget> {
    let tool = CommandMigrationTool::new(&config.migration_tool)
        .with_base_args(config.migration_tool_args.clone())
        .with_working_dir(&config.root)
        .with_timeout(config.migration_timeout)
        .with_interrupt(shutdown.clone(), config.group.shutdown_timeout);
    let database = DatabaseTarget::new(&config.database_url, config.connect_timeout);
    let layout = MigrationLayout::new(&config.migrations_dir, &config.migration_file_ext);
    let classifier = FailureClassifier::default()
        .with_substrings(config.extra_fatal_signatures.iter().map(String::as_str));

    MigrationPipeline::new(tool, database, layout)
        .with_classifier(classifier)
        .with_file_owner(config.runtime_owner)
        .with_shutdown(shutdown.clone())
}

/// Run one deployment until shutdown or failure.
pub async fn run(config: &OrchestratorConfig) -> Result<(), OrchestratorError> {
    let shutdown = CancellationToken::new();
    let listener = listen_for_termination(shutdown.clone())?;

    let mut group = ProcessGroup::new(config.group, shutdown.clone())
        .with_shared_workdir(SharedWorkdir::new(&config.worker_workdir, config.runtime_owner));
    let pipeline = build_pipeline(config, &shutdown);

    let result = supervise(config, &pipeline, &mut group).await;

    shutdown.cancel();
    if let Err(e) = listener.await {
        tracing::debug!(error = %e, "Signal listener ended abnormally");
    }
    result
}

async fn supervise<T, D>(
    config: &OrchestratorConfig,
    pipeline: &MigrationPipeline<T, D>,
    group: &mut ProcessGroup,
) -> Result<(), OrchestratorError>
where
    T: MigrationTool,
    D: DatabaseProbe,
{
    match config.startup_order {
        StartupOrder::MigrateFirst => {
            if migrate(pipeline, group.log_tail(), group.shutdown_token()).await?.is_none() {
                return Ok(());
            }
            group.start_all(&config.services()).await?;
        }
        StartupOrder::Concurrent => {
            group.start_all(std::slice::from_ref(&config.serve)).await?;

            // A serving process dying mid-migration ends the run as a crash.
            let logs = group.log_tail().clone();
            let shutdown = group.shutdown_token().clone();
            match group.run_alongside(migrate(pipeline, &logs, &shutdown)).await? {
                Ok(Some(_)) => {}
                Ok(None) => {
                    group.terminate_all().await;
                    return Ok(());
                }
                Err(e) => {
                    tracing::error!("Migration failed, stopping the serving process");
                    group.terminate_all().await;
                    return Err(e);
                }
            }
            group
                .start_all(&[config.worker.clone(), config.scheduler.clone()])
                .await?;
        }
    }

    tracing::info!("All services running");
    group.run_until_stopped().await?;
    Ok(())
}

/// Run the pipeline to completion. `None` means shutdown was requested
/// while it ran and no further services should start.
async fn migrate<T, D>(
    pipeline: &MigrationPipeline<T, D>,
    logs: &LogTail,
    shutdown: &CancellationToken,
) -> Result<Option<PipelineOutcome>, OrchestratorError>
where
    T: MigrationTool,
    D: DatabaseProbe,
{
    match pipeline.run(|| logs.snapshot()).await {
        Ok(_) if shutdown.is_cancelled() => {
            tracing::warn!("Termination requested during migration, not launching services");
            Ok(None)
        }
        Ok(outcome) => {
            tracing::info!(
                scenario = %outcome.scenario,
                state = %outcome.final_state,
                attempts = outcome.attempts.len(),
                revision = outcome.state.current_revision.as_deref().unwrap_or("<none>"),
                "Schema is up to date",
            );
            Ok(Some(outcome))
        }
        Err(PipelineError::Interrupted) => {
            tracing::warn!("Termination requested during migration, aborting");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
