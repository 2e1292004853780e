use std::path::PathBuf;

use deployd_core::exit_codes::EXIT_OK;
use deployd_orchestrator::config::{ConfigError, EnvSelection, LogFormat, OrchestratorConfig};
use deployd_orchestrator::error::OrchestratorError;
use deployd_orchestrator::{startup, telemetry};

#[tokio::main]
async fn main() {
    // --- Environment ---
    let selection = EnvSelection::from_env();
    let env_file = selection.load();

    // --- Tracing ---
    let format = LogFormat::from_env();
    let log_format = format.as_ref().copied().unwrap_or_default();
    telemetry::init_tracing(log_format);

    let code = match run(&selection, env_file, format).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            EXIT_OK
        }
        Err(e) => {
            report(&e, log_format);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

async fn run(
    selection: &EnvSelection,
    env_file: Result<PathBuf, ConfigError>,
    format: Result<LogFormat, ConfigError>,
) -> Result<(), OrchestratorError> {
    let path = env_file?;
    format?;
    tracing::info!(env = %selection.env, file = %path.display(), "Loaded environment file");

    // --- Configuration ---
    let config = OrchestratorConfig::from_env(&selection.root)?;
    config.verify_commands()?;
    tracing::info!(
        database = %deployd_db::redact_url(&config.database_url),
        tool = %config.migration_tool,
        migrations_dir = %config.migrations_dir.display(),
        startup_order = ?config.startup_order,
        "Loaded orchestrator configuration",
    );

    startup::run(&config).await
}

/// Write the one diagnostic every fatal path owes the operator.
fn report(err: &OrchestratorError, format: LogFormat) {
    tracing::error!(error = %err, exit_code = err.exit_code(), "Deployment failed");

    let OrchestratorError::Migration(migration) = err else {
        return;
    };
    let Some(diagnostics) = migration.diagnostics() else {
        return;
    };
    match format {
        LogFormat::Json => tracing::error!(report = %diagnostics.to_json(), "Migration diagnostics"),
        LogFormat::Text => tracing::error!("Migration diagnostics\n{diagnostics}"),
    }
}
