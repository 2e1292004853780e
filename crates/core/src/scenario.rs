//! Deployment scenario classification.
//!
//! [`classify`] is a pure decision table over a [`MigrationState`]. The
//! resulting [`Scenario`] drives whether the migration executor runs at all,
//! and how.

use std::fmt;

use serde::Serialize;

use crate::error::CoreError;
use crate::migration_state::MigrationState;

/// The classified deployment situation for one orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    /// Fresh database and no migration files: generate an initial migration,
    /// then upgrade.
    BootstrapNewDeployment,
    /// The database has migration history but this build shipped no
    /// migration files. Terminal and fatal.
    InitializedWithNoFiles,
    /// The database already sits at the single head.
    NoPendingChanges,
    /// Revisions differ (or the database is empty): upgrade to head.
    PendingUpgrade,
    /// The comparison could not be resolved. Proceed and let the migration
    /// tool reject invalid states itself.
    UndeterminedProceed,
}

impl Scenario {
    /// Whether the migration executor must be invoked for this scenario.
    pub fn requires_execution(self) -> bool {
        matches!(
            self,
            Self::BootstrapNewDeployment | Self::PendingUpgrade | Self::UndeterminedProceed
        )
    }

    /// Whether this scenario ends the run with a failure before any
    /// execution.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::InitializedWithNoFiles)
    }

    /// Reject scenarios that must never reach the executor.
    pub fn ensure_executable(self) -> Result<(), CoreError> {
        if self.requires_execution() {
            Ok(())
        } else {
            Err(CoreError::NotExecutable(self))
        }
    }

    /// Stable snake_case name used in logs and diagnostics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BootstrapNewDeployment => "bootstrap_new_deployment",
            Self::InitializedWithNoFiles => "initialized_with_no_files",
            Self::NoPendingChanges => "no_pending_changes",
            Self::PendingUpgrade => "pending_upgrade",
            Self::UndeterminedProceed => "undetermined_proceed",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a probed state to its scenario.
///
/// Rules are evaluated in precedence order:
///
/// | files | initialized | revisions            | scenario                   |
/// |-------|-------------|----------------------|----------------------------|
/// | 0     | no          | --                   | `BootstrapNewDeployment`   |
/// | 0     | yes         | --                   | `InitializedWithNoFiles`   |
/// | > 0   | no          | --                   | `PendingUpgrade`           |
/// | > 0   | yes         | current == head      | `NoPendingChanges`         |
/// | > 0   | yes         | current != head      | `PendingUpgrade`           |
/// | > 0   | yes         | either unresolvable  | `UndeterminedProceed`      |
pub fn classify(state: &MigrationState) -> Scenario {
    match (state.file_count, state.initialized) {
        (0, false) => Scenario::BootstrapNewDeployment,
        (0, true) => Scenario::InitializedWithNoFiles,
        (_, false) => Scenario::PendingUpgrade,
        (_, true) => match (&state.current_revision, &state.head_revision) {
            (Some(current), Some(head)) if current == head => Scenario::NoPendingChanges,
            (Some(_), Some(_)) => Scenario::PendingUpgrade,
            _ => Scenario::UndeterminedProceed,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
