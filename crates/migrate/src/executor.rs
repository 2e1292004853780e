//! Runs one migration attempt through the external tool.
//!
//! Bootstrap deployments first generate an initial migration from the model
//! diff, normalize the new files for the runtime user, then upgrade. Every
//! other executable scenario upgrades directly. Whatever happens, one
//! [`Attempt`] comes back carrying the combined output and exit code.

use std::time::Instant;

use chrono::Utc;
use deployd_core::attempt::Attempt;
use deployd_core::error::CoreError;
use deployd_core::ownership::FileOwner;
use deployd_core::scenario::Scenario;
use deployd_core::subprocess::{CommandError, CommandOutput};

use crate::layout::MigrationLayout;
use crate::tool::MigrationTool;

/// Message passed to the generate operation on first deployment.
pub const BOOTSTRAP_MESSAGE: &str = "initial schema";

/// Mode applied to freshly generated migration files.
const GENERATED_FILE_MODE: u32 = 0o644;

/// Exit code recorded when the tool never produced one.
const NO_EXIT_CODE: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    NotExecutable(#[from] CoreError),
}

/// Bootstrap progress carried across attempts within a run.
#[derive(Debug, Default)]
enum Bootstrap {
    #[default]
    Pending,
    Generated { normalized: bool },
}

pub struct MigrationExecutor<'a, T> {
    tool: &'a T,
    layout: &'a MigrationLayout,
    owner: FileOwner,
    bootstrap: Bootstrap,
    generated_files: Vec<std::path::PathBuf>,
}

impl<'a, T: MigrationTool> MigrationExecutor<'a, T> {
    pub fn new(tool: &'a T, layout: &'a MigrationLayout, owner: FileOwner) -> Self {
        Self {
            tool,
            layout,
            owner,
            bootstrap: Bootstrap::Pending,
            generated_files: Vec::new(),
        }
    }

    /// Files created by the generate step during this run.
    pub fn generated_files(&self) -> &[std::path::PathBuf] {
        &self.generated_files
    }

    /// Execute attempt number `index` for `scenario`.
    ///
    /// Generation happens at most once per run: a later bootstrap attempt
    /// only finishes normalization (if it failed) and upgrades.
    pub async fn execute(&mut self, scenario: Scenario, index: u32) -> Result<Attempt, ExecutorError> {
        scenario.ensure_executable()?;

        let started_at = Utc::now();
        let clock = Instant::now();
        let mut transcript = Transcript::default();

        let exit_code = match self.prepare(scenario, &mut transcript).await {
            Ok(()) => {
                let result = self.tool.upgrade().await;
                transcript.record("upgrade", result)
            }
            Err(exit_code) => exit_code,
        };

        let attempt = Attempt {
            index,
            output: transcript.into_output(),
            exit_code,
            classification: None,
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        tracing::info!(
            scenario = %scenario,
            attempt = index,
            exit_code = attempt.exit_code,
            duration_ms = attempt.duration_ms,
            "Migration attempt finished",
        );

        Ok(attempt)
    }

    /// Bootstrap-only work ahead of the upgrade. `Err` carries the exit code
    /// that ends the attempt early.
    async fn prepare(&mut self, scenario: Scenario, transcript: &mut Transcript) -> Result<(), i32> {
        if scenario != Scenario::BootstrapNewDeployment {
            return Ok(());
        }

        if matches!(self.bootstrap, Bootstrap::Pending) {
            let before = match self.layout.list_files().await {
                Ok(files) => files,
                Err(e) => {
                    transcript.note(format!("could not list existing migrations: {e}"));
                    return Err(NO_EXIT_CODE);
                }
            };

            tracing::info!(dir = %self.layout.dir().display(), "Generating initial migration");
            let result = self.tool.generate(BOOTSTRAP_MESSAGE).await;
            let exit_code = transcript.record("generate", result);
            if exit_code != 0 {
                return Err(exit_code);
            }

            let after = match self.layout.list_files().await {
                Ok(files) => files,
                Err(e) => {
                    transcript.note(format!("could not list generated migrations: {e}"));
                    return Err(NO_EXIT_CODE);
                }
            };
            self.generated_files = after.difference(&before).cloned().collect();
            self.bootstrap = Bootstrap::Generated { normalized: false };

            tracing::info!(files = ?self.generated_files, "Initial migration generated");
        }

        if let Bootstrap::Generated { normalized: false } = self.bootstrap {
            for path in &self.generated_files {
                if let Err(e) = self.owner.apply(path, GENERATED_FILE_MODE) {
                    transcript.note(format!(
                        "could not normalize permissions of {}: {e}",
                        path.display()
                    ));
                    return Err(NO_EXIT_CODE);
                }
            }
            self.bootstrap = Bootstrap::Generated { normalized: true };
        }

        Ok(())
    }
}

/// Combined output of every tool invocation in one attempt.
#[derive(Default)]
struct Transcript {
    sections: Vec<String>,
}

impl Transcript {
    /// Record an invocation and return its exit code.
    fn record(&mut self, operation: &str, result: Result<CommandOutput, CommandError>) -> i32 {
        match result {
            Ok(output) => {
                self.sections.push(format!(
                    "$ {operation} (exit {})\n{}",
                    output.exit_code,
                    output.combined()
                ));
                output.exit_code
            }
            Err(e) => {
                self.sections.push(format!("$ {operation} (no exit status)\n{e}"));
                NO_EXIT_CODE
            }
        }
    }

    fn note(&mut self, message: String) {
        self.sections.push(message);
    }

    fn into_output(self) -> String {
        self.sections.join("\n")
    }
}
