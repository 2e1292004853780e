use std::path::PathBuf;

use crate::process::ChildExit;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Failed to launch {service}: {source}")]
    Spawn {
        service: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{} did not survive startup: {}", .0.service, .0.describe())]
    StartupFailed(ChildExit),

    #[error("{} exited unexpectedly: {}", .0.service, .0.describe())]
    ChildCrashed(ChildExit),

    #[error("Failed to prepare shared working directory {path}: {source}")]
    Workdir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install termination signal handler: {0}")]
    Signal(#[source] std::io::Error),
}
