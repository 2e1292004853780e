/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier of one applied unit of schema change, as printed by the
/// migration tool.
pub type Revision = String;
