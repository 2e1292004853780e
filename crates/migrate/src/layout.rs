//! Where migration files live on disk and which files count.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Default migration directory, relative to the project root.
pub const DEFAULT_MIGRATIONS_DIR: &str = "alembic/versions";

/// Default extension of a migration file.
pub const DEFAULT_MIGRATION_EXTENSION: &str = "py";

/// Migration directory plus the extension that identifies migration files.
///
/// Only regular files directly inside the directory count. Names starting
/// with `__` (package markers) and subdirectories such as bytecode caches
/// are ignored.
#[derive(Debug, Clone)]
pub struct MigrationLayout {
    dir: PathBuf,
    extension: String,
}

impl MigrationLayout {
    pub fn new(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted paths of every migration file. A missing directory has none.
    pub async fn list_files(&self) -> io::Result<BTreeSet<PathBuf>> {
        let mut files = BTreeSet::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            if self.is_migration_file(&path) {
                files.insert(path);
            }
        }

        Ok(files)
    }

    pub async fn count_files(&self) -> io::Result<usize> {
        Ok(self.list_files().await?.len())
    }

    fn is_migration_file(&self, path: &Path) -> bool {
        let name_ok = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with("__"));
        let ext_ok = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.extension);
        name_ok && ext_ok
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
