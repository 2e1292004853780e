//! The external migration tool contract.
//!
//! The orchestrator treats the migration tool as a black box exposing four
//! operations, each returning an exit status and textual output. Any tool
//! implementing [`MigrationTool`] is substitutable; [`CommandMigrationTool`]
//! binds the contract to an Alembic-compatible command line.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use deployd_core::subprocess::{self, CommandError, CommandOutput, Interrupt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default wall-clock bound on a single tool invocation.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// Operations the orchestrator needs from a migration tool.
pub trait MigrationTool: Send + Sync {
    /// Report the revision recorded in the database. Prints nothing when
    /// the database is uninitialized.
    fn current(&self) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;

    /// Report the head revision(s) of the on-disk chain.
    fn heads(&self) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;

    /// Generate a migration from the diff between models and database.
    fn generate(
        &self,
        message: &str,
    ) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;

    /// Upgrade the database to head.
    fn upgrade(&self) -> impl Future<Output = Result<CommandOutput, CommandError>> + Send;
}

/// A migration tool driven through its command line.
///
/// | Operation  | Invocation                                          |
/// |------------|-----------------------------------------------------|
/// | `current`  | `<program> <base args> current`                     |
/// | `heads`    | `<program> <base args> heads`                       |
/// | `generate` | `<program> <base args> revision --autogenerate -m <msg>` |
/// | `upgrade`  | `<program> <base args> upgrade head`                |
#[derive(Debug, Clone)]
pub struct CommandMigrationTool {
    program: String,
    base_args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    interrupt: Option<Interrupt>,
}

impl CommandMigrationTool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
            working_dir: None,
            timeout: DEFAULT_TOOL_TIMEOUT,
            interrupt: None,
        }
    }

    /// Arguments placed before every operation, e.g. `-c alembic.ini`.
    pub fn with_base_args(mut self, args: Vec<String>) -> Self {
        self.base_args = args;
        self
    }

    /// Directory the tool runs in (where its own configuration lives).
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop a running invocation when `token` fires: SIGTERM, then a kill
    /// once `grace` has passed.
    pub fn with_interrupt(mut self, token: CancellationToken, grace: Duration) -> Self {
        self.interrupt = Some(Interrupt::new(token, grace));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args).args(args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn invoke(&self, args: &[&str]) -> Result<CommandOutput, CommandError> {
        tracing::debug!(program = %self.program, ?args, "Invoking migration tool");
        let output =
            subprocess::run_command_interruptible(&mut self.command(args), self.timeout, self.interrupt.as_ref())
                .await?;
        tracing::debug!(
            program = %self.program,
            ?args,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Migration tool finished",
        );
        Ok(output)
    }
}

impl MigrationTool for CommandMigrationTool {
    async fn current(&self) -> Result<CommandOutput, CommandError> {
        self.invoke(&["current"]).await
    }

    async fn heads(&self) -> Result<CommandOutput, CommandError> {
        self.invoke(&["heads"]).await
    }

    async fn generate(&self, message: &str) -> Result<CommandOutput, CommandError> {
        self.invoke(&["revision", "--autogenerate", "-m", message]).await
    }

    async fn upgrade(&self) -> Result<CommandOutput, CommandError> {
        self.invoke(&["upgrade", "head"]).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
