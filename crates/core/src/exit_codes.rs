//! Process exit codes reported by the `deployd` binary.
//!
//! Each failure class has its own code so deployment health checks can tell
//! them apart without parsing logs.

/// Migrations applied or confirmed current and every service shut down
/// cleanly.
pub const EXIT_OK: i32 = 0;

/// The environment file is missing or a setting is invalid.
pub const EXIT_CONFIG: i32 = 2;

/// The migration tool or a service program is not on `PATH`.
pub const EXIT_MISSING_COMMAND: i32 = 3;

/// The database could not be reached while probing migration state.
pub const EXIT_DATABASE_UNREACHABLE: i32 = 4;

/// The migration tool failed while reporting state.
pub const EXIT_PROBE_FAILED: i32 = 5;

/// The migration graph is inconsistent with the database.
pub const EXIT_FATAL_VERSION_MISMATCH: i32 = 10;

/// The database has migration history but no migration files were shipped.
pub const EXIT_SCHEMA_DRIFT: i32 = 11;

/// Every migration attempt failed transiently.
pub const EXIT_RETRY_EXHAUSTED: i32 = 12;

/// A supervised process was not alive after its grace period.
pub const EXIT_STARTUP_FAILURE: i32 = 20;

/// A supervised process died unexpectedly in steady state.
pub const EXIT_CHILD_CRASH: i32 = 21;

/// Spawning or signalling a supervised process failed.
pub const EXIT_SUPERVISOR_IO: i32 = 22;
