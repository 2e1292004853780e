//! Supervision of the long-running service processes.
//!
//! A [`group::ProcessGroup`] owns every child it launches: it starts them
//! in order with a liveness check after each, watches for unexpected exits,
//! and tears the whole group down in reverse order on shutdown.

pub mod error;
pub mod group;
pub mod log_tail;
pub mod process;
pub mod signal;
pub mod workdir;

pub use error::SupervisorError;
pub use group::{GroupSettings, ProcessGroup};
pub use process::{ChildExit, ServiceSpec, SupervisedProcess};
