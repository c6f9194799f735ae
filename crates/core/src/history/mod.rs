//! Persistent history of mirrored outputs.
//!
//! A key-value record of previously seen sources and the outputs produced
//! for them, used as the cheap alternative to rebuilding the destination
//! index. Consulted read-only by the planner; written only by the scheduler
//! after a successful action.

mod sqlite;
mod types;

pub use sqlite::SqliteHistory;
pub use types::HistoryRecord;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::scanner::Fingerprint;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Database(String),
}

/// Store of previously mirrored sources and outputs.
///
/// Safe for concurrent use by multiple workers; implementations serialize
/// writes on the connection.
pub trait HistoryStore: Send + Sync {
    /// Last known state for a fingerprint.
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryRecord>, HistoryError>;

    /// Inserts or updates a record; at most one update per successful unit
    /// of work.
    fn upsert(&self, fingerprint: &Fingerprint, record: &HistoryRecord)
        -> Result<(), HistoryError>;

    /// Removes a fingerprint and all of its recorded outputs.
    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError>;

    /// Fingerprint most recently associated with a source relative path.
    /// Supports rename detection without a destination rescan.
    fn lookup_path_history(&self, rel_path: &str) -> Result<Option<Fingerprint>, HistoryError>;

    /// Records an output file produced for a fingerprint.
    fn record_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError>;

    /// Forgets one recorded output of a fingerprint.
    fn remove_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError>;

    /// Every recorded output path.
    fn output_paths(&self) -> Result<Vec<String>, HistoryError>;

    /// Starts the grace-period clock for a fingerprint absent from source.
    /// A no-op when the clock is already running.
    fn mark_missing(
        &self,
        fingerprint: &Fingerprint,
        when: DateTime<Utc>,
    ) -> Result<(), HistoryError>;

    /// Stops the grace-period clock for a fingerprint seen again.
    fn clear_missing(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError>;

    /// All tracked fingerprints with their records.
    fn tracked(&self) -> Result<Vec<(Fingerprint, HistoryRecord)>, HistoryError>;
}
