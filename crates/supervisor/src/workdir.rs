//! Working directory shared by the worker and scheduler services.

use std::path::{Path, PathBuf};

use deployd_core::ownership::FileOwner;

use crate::error::SupervisorError;

/// Default location of the shared directory.
pub const DEFAULT_WORKDIR: &str = "/tmp/celery";

/// Environment variable through which children learn the directory path.
pub const WORKDIR_ENV: &str = "WORKER_WORKDIR";

/// Group-writable so worker and scheduler can share state files.
const WORKDIR_MODE: u32 = 0o775;

#[derive(Debug, Clone)]
pub struct SharedWorkdir {
    path: PathBuf,
    owner: FileOwner,
}

impl SharedWorkdir {
    pub fn new(path: impl Into<PathBuf>, owner: FileOwner) -> Self {
        Self {
            path: path.into(),
            owner,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and apply mode and ownership.
    pub fn prepare(&self) -> Result<(), SupervisorError> {
        let wrap = |source| SupervisorError::Workdir {
            path: self.path.clone(),
            source,
        };
        std::fs::create_dir_all(&self.path).map_err(wrap)?;
        self.owner.apply(&self.path, WORKDIR_MODE).map_err(wrap)?;
        tracing::info!(path = %self.path.display(), "Shared working directory ready");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
