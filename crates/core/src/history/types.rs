use chrono::{DateTime, Utc};

/// Last known state of a source stream and its mirrored output.
///
/// Keyed by fingerprint in the store. Mutated only after a successful unit
/// of work, inside the same logical step that reports success.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub size: u64,
    pub mtime_ns: i64,
    pub quality: String,
    pub encoder_id: String,
    pub tags_digest: Option<String>,
    pub source_rel_path: String,
    pub dest_rel_path: String,
    pub last_seen_at: DateTime<Utc>,

    /// Set when the fingerprint stopped appearing in the source tree;
    /// cleared as soon as it is seen again. Drives the prune grace period.
    pub missing_since: Option<DateTime<Utc>>,
}
