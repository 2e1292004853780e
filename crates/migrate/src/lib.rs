//! Schema-evolution pipeline run on every container start.
//!
//! [`prober::StateProber`] reads where the database and the migration chain
//! stand, [`deployd_core::scenario::classify`] decides what to do,
//! [`executor::MigrationExecutor`] invokes the migration tool and
//! [`retry::RetryController`] bounds the attempts. [`pipeline::MigrationPipeline`]
//! wires them together.

pub mod diagnostics;
pub mod executor;
pub mod layout;
pub mod pipeline;
pub mod prober;
pub mod retry;
pub mod tool;
