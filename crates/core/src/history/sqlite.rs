//! SQLite-backed history store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{HistoryError, HistoryRecord, HistoryStore};
use crate::scanner::Fingerprint;

/// SQLite-backed history store.
///
/// Writes are serialized on the connection mutex, which is what makes the
/// store safe to share across scheduler workers.
pub struct SqliteHistory {
    conn: Mutex<Connection>,
}

impl SqliteHistory {
    /// Opens (and if needed creates) the history database.
    pub fn new(path: &Path) -> Result<Self, HistoryError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, HistoryError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), HistoryError> {
        conn.execute_batch(
            r#"
            -- Last known state per source stream (one row per fingerprint)
            CREATE TABLE IF NOT EXISTS history (
                fingerprint TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                mtime_ns INTEGER NOT NULL,
                quality TEXT NOT NULL,
                encoder_id TEXT NOT NULL,
                tags_digest TEXT,
                source_rel_path TEXT NOT NULL,
                dest_rel_path TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                missing_since TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_source_rel ON history(source_rel_path);

            -- Source paths ever associated with a fingerprint
            CREATE TABLE IF NOT EXISTS source_paths (
                fingerprint TEXT NOT NULL,
                rel_path TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (fingerprint, rel_path)
            );

            CREATE INDEX IF NOT EXISTS idx_source_paths_rel ON source_paths(rel_path);

            -- Output files produced per fingerprint
            CREATE TABLE IF NOT EXISTS outputs (
                fingerprint TEXT NOT NULL,
                dest_rel_path TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (fingerprint, dest_rel_path)
            );
            "#,
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<HistoryRecord> {
        let last_seen_str: String = row.get(8)?;
        let missing_since_str: Option<String> = row.get(9)?;

        Ok(HistoryRecord {
            size: row.get(1)?,
            mtime_ns: row.get(2)?,
            quality: row.get(3)?,
            encoder_id: row.get(4)?,
            tags_digest: row.get(5)?,
            source_rel_path: row.get(6)?,
            dest_rel_path: row.get(7)?,
            last_seen_at: parse_timestamp(&last_seen_str),
            missing_since: missing_since_str.as_deref().map(parse_timestamp),
        })
    }
}

fn db_err(e: rusqlite::Error) -> HistoryError {
    HistoryError::Database(e.to_string())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const RECORD_COLUMNS: &str = "fingerprint, size, mtime_ns, quality, encoder_id, tags_digest, \
     source_rel_path, dest_rel_path, last_seen_at, missing_since";

impl HistoryStore for SqliteHistory {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryRecord>, HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM history WHERE fingerprint = ?"),
            params![fingerprint.as_str()],
            Self::row_to_record,
        )
        .optional()
        .map_err(db_err)
    }

    fn upsert(
        &self,
        fingerprint: &Fingerprint,
        record: &HistoryRecord,
    ) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO history ({RECORD_COLUMNS}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                fingerprint.as_str(),
                record.size,
                record.mtime_ns,
                record.quality,
                record.encoder_id,
                record.tags_digest,
                record.source_rel_path,
                record.dest_rel_path,
                record.last_seen_at.to_rfc3339(),
                record.missing_since.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(db_err)?;
        conn.execute(
            "INSERT OR REPLACE INTO source_paths (fingerprint, rel_path, updated_at) \
             VALUES (?, ?, ?)",
            params![
                fingerprint.as_str(),
                record.source_rel_path,
                record.last_seen_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "DELETE FROM history WHERE fingerprint = ?",
            params![fingerprint.as_str()],
        )
        .map_err(db_err)?;
        conn.execute(
            "DELETE FROM source_paths WHERE fingerprint = ?",
            params![fingerprint.as_str()],
        )
        .map_err(db_err)?;
        conn.execute(
            "DELETE FROM outputs WHERE fingerprint = ?",
            params![fingerprint.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn lookup_path_history(&self, rel_path: &str) -> Result<Option<Fingerprint>, HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.query_row(
            "SELECT fingerprint FROM source_paths WHERE rel_path = ? \
             ORDER BY updated_at DESC LIMIT 1",
            params![rel_path],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map_err(db_err)
        .map(|opt| opt.map(Fingerprint::new))
    }

    fn record_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO outputs (fingerprint, dest_rel_path, updated_at) \
             VALUES (?, ?, ?)",
            params![fingerprint.as_str(), dest_rel_path, Utc::now().to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn remove_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "DELETE FROM outputs WHERE fingerprint = ? AND dest_rel_path = ?",
            params![fingerprint.as_str(), dest_rel_path],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn output_paths(&self) -> Result<Vec<String>, HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        let mut stmt = conn
            .prepare("SELECT dest_rel_path FROM outputs")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_err)?;

        let mut paths = Vec::new();
        for row in rows {
            paths.push(row.map_err(db_err)?);
        }
        Ok(paths)
    }

    fn mark_missing(
        &self,
        fingerprint: &Fingerprint,
        when: DateTime<Utc>,
    ) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "UPDATE history SET missing_since = ? \
             WHERE fingerprint = ? AND missing_since IS NULL",
            params![when.to_rfc3339(), fingerprint.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn clear_missing(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        conn.execute(
            "UPDATE history SET missing_since = NULL WHERE fingerprint = ?",
            params![fingerprint.as_str()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    fn tracked(&self) -> Result<Vec<(Fingerprint, HistoryRecord)>, HistoryError> {
        let conn = self.conn.lock().expect("history lock poisoned");
        let mut stmt = conn
            .prepare(&format!("SELECT {RECORD_COLUMNS} FROM history"))
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                let fp: String = row.get(0)?;
                Ok((Fingerprint::new(fp), Self::row_to_record(row)?))
            })
            .map_err(db_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(db_err)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source_rel: &str, dest_rel: &str) -> HistoryRecord {
        HistoryRecord {
            size: 1000,
            mtime_ns: 42,
            quality: "ogg-192".to_string(),
            encoder_id: "ffmpeg-libvorbis".to_string(),
            tags_digest: Some("digest".to_string()),
            source_rel_path: source_rel.to_string(),
            dest_rel_path: dest_rel.to_string(),
            last_seen_at: Utc::now(),
            missing_since: None,
        }
    }

    #[test]
    fn test_upsert_and_lookup_roundtrip() {
        let store = SqliteHistory::in_memory().unwrap();
        let fp = Fingerprint::new("aa".repeat(16));
        let rec = record("a.flac", "a.ogg");

        store.upsert(&fp, &rec).unwrap();
        let loaded = store.lookup(&fp).unwrap().unwrap();

        assert_eq!(loaded.size, rec.size);
        assert_eq!(loaded.mtime_ns, rec.mtime_ns);
        assert_eq!(loaded.quality, rec.quality);
        assert_eq!(loaded.source_rel_path, "a.flac");
        assert_eq!(loaded.dest_rel_path, "a.ogg");
        assert!(loaded.missing_since.is_none());
    }

    #[test]
    fn test_lookup_unknown_fingerprint_is_none() {
        let store = SqliteHistory::in_memory().unwrap();
        assert!(store
            .lookup(&Fingerprint::new("00".repeat(16)))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_path_history_follows_latest_association() {
        let store = SqliteHistory::in_memory().unwrap();
        let fp = Fingerprint::new("bb".repeat(16));

        let mut rec = record("old/name.flac", "old/name.ogg");
        store.upsert(&fp, &rec).unwrap();

        rec.source_rel_path = "new/name.flac".to_string();
        rec.last_seen_at = Utc::now();
        store.upsert(&fp, &rec).unwrap();

        // Both paths resolve: rename detection needs the historical one too.
        assert_eq!(store.lookup_path_history("old/name.flac").unwrap(), Some(fp.clone()));
        assert_eq!(store.lookup_path_history("new/name.flac").unwrap(), Some(fp));
        assert!(store.lookup_path_history("never/seen.flac").unwrap().is_none());
    }

    #[test]
    fn test_mark_missing_is_sticky_until_cleared() {
        let store = SqliteHistory::in_memory().unwrap();
        let fp = Fingerprint::new("cc".repeat(16));
        store.upsert(&fp, &record("x.flac", "x.ogg")).unwrap();

        let first = Utc::now() - chrono::Duration::days(10);
        store.mark_missing(&fp, first).unwrap();
        // A later mark must not restart the clock.
        store.mark_missing(&fp, Utc::now()).unwrap();

        let loaded = store.lookup(&fp).unwrap().unwrap();
        let since = loaded.missing_since.unwrap();
        assert!((since - first).num_seconds().abs() < 2);

        store.clear_missing(&fp).unwrap();
        assert!(store.lookup(&fp).unwrap().unwrap().missing_since.is_none());
    }

    #[test]
    fn test_outputs_tracked_per_fingerprint() {
        let store = SqliteHistory::in_memory().unwrap();
        let fp = Fingerprint::new("dd".repeat(16));
        store.upsert(&fp, &record("y.flac", "y.ogg")).unwrap();

        store.record_output(&fp, "y.ogg").unwrap();
        store.record_output(&fp, "y (1).ogg").unwrap();
        let mut paths = store.output_paths().unwrap();
        paths.sort();
        assert_eq!(paths, vec!["y (1).ogg".to_string(), "y.ogg".to_string()]);

        store.remove_output(&fp, "y (1).ogg").unwrap();
        assert_eq!(store.output_paths().unwrap(), vec!["y.ogg".to_string()]);

        store.remove(&fp).unwrap();
        assert!(store.output_paths().unwrap().is_empty());
        assert!(store.lookup(&fp).unwrap().is_none());
    }
}
