//! File mode and ownership normalization for the runtime user.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Optional numeric owner applied to files and directories the orchestrator
/// creates on behalf of the services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileOwner {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileOwner {
    pub fn new(uid: Option<u32>, gid: Option<u32>) -> Self {
        Self { uid, gid }
    }

    pub fn is_unset(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }

    /// Set `mode` on `path` and, when configured, its owner.
    pub fn apply(&self, path: &Path, mode: u32) -> io::Result<()> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        if !self.is_unset() {
            std::os::unix::fs::chown(path, self.uid, self.gid)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
