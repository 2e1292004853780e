//! `deployd-core` -- pure domain logic for the deployment orchestrator.
//!
//! Everything in this crate is free of database and process-group state so
//! it can be unit tested in isolation. The only I/O lives in [`subprocess`],
//! which captures the output of a single external command, and
//! [`ownership`], which normalizes file modes for the runtime user.

pub mod attempt;
pub mod error;
pub mod exit_codes;
pub mod fatal_signatures;
pub mod migration_state;
pub mod ownership;
pub mod retry;
pub mod scenario;
pub mod subprocess;
pub mod types;
