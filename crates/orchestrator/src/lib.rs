//! `deployd` -- brings a service stack up against a migrated database.
//!
//! The binary loads its environment, runs the schema pipeline, then hands
//! the serving, worker and scheduler processes to a process group until a
//! termination signal arrives or one of them dies.

pub mod config;
pub mod error;
pub mod startup;
pub mod telemetry;
