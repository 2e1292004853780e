//! Snapshot of where the database and the on-disk migration chain stand.
//!
//! A [`MigrationState`] is produced fresh on every orchestration run by the
//! state prober. The database is the source of truth; nothing here is
//! persisted.

use serde::Serialize;

use crate::types::Revision;

/// Log-level prefixes the migration tool writes ahead of real output.
const LOG_LINE_PREFIXES: &[&str] = &["INFO", "WARN", "WARNING", "DEBUG", "ERROR"];

/// Result of probing the database and the migration directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationState {
    /// Revision currently recorded in the database, if resolvable.
    pub current_revision: Option<Revision>,
    /// The single head of the migration chain. `None` when there are zero
    /// or several heads.
    pub head_revision: Option<Revision>,
    /// Every head the migration tool reported.
    pub heads: Vec<Revision>,
    /// Number of migration files on disk.
    pub file_count: usize,
    /// Whether the database has ever recorded a revision.
    pub initialized: bool,
}

impl MigrationState {
    /// Build a state from the raw probe results.
    ///
    /// `initialized` follows `current_revision` unless the caller knows the
    /// database holds a revision it could not resolve.
    pub fn new(
        current_revision: Option<Revision>,
        heads: Vec<Revision>,
        file_count: usize,
        initialized: bool,
    ) -> Self {
        let head_revision = match heads.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        };

        Self {
            current_revision,
            head_revision,
            heads,
            file_count,
            initialized,
        }
    }

    /// True when the database revision and the single head are both known.
    pub fn is_resolvable(&self) -> bool {
        self.current_revision.is_some() && self.head_revision.is_some()
    }
}

/// Extract revision identifiers from the migration tool's textual output.
///
/// Every non-empty line that is not a log line contributes its first
/// whitespace-separated token, so `"ae1027a6acf (head)"` yields
/// `"ae1027a6acf"`.
pub fn parse_revisions(output: &str) -> Vec<Revision> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !is_log_line(line))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

fn is_log_line(line: &str) -> bool {
    LOG_LINE_PREFIXES.iter().any(|prefix| {
        line.strip_prefix(prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', '\t', ':', '[']))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
