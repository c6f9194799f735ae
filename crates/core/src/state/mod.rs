//! Tracked-state providers for the planner.
//!
//! The planner compares the scanned source tree against what was mirrored
//! before. That prior state comes from one of two places, the history
//! database or a fresh destination index, presented behind a single trait
//! so the planning rules never know which backend produced it. Providers
//! snapshot their backend at load time; the planner sees a fixed view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dest_index::DestIndex;
use crate::history::{HistoryError, HistoryStore};
use crate::scanner::Fingerprint;

/// Last known state of one mirrored source stream.
///
/// Size and mtime are unknown when the state comes from a destination index,
/// since outputs do not record the source file's filesystem metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DestState {
    pub size: Option<u64>,
    pub mtime_ns: Option<i64>,
    pub quality: String,
    pub encoder_id: String,
    pub tags_digest: Option<String>,
    pub source_rel_path: String,
    pub dest_rel_path: String,
    pub missing_since: Option<DateTime<Utc>>,
}

/// Read-only view of previously mirrored state.
pub trait StateProvider: Send + Sync {
    /// State recorded for a source fingerprint.
    fn get(&self, fingerprint: &Fingerprint) -> Option<&DestState>;

    /// Fingerprint last associated with a source relative path. Used for
    /// rename detection and for planning without fingerprints.
    fn fingerprint_for_path(&self, rel_path: &str) -> Option<&Fingerprint>;

    /// Every fingerprint the backend tracks. Input to the prune sweep.
    fn tracked_fingerprints(&self) -> Vec<Fingerprint>;

    /// A provenance-less destination file at the given path stem, if the
    /// backend can see one. Only the index backend can.
    fn legacy_dest_for(&self, stem: &str) -> Option<&str>;

    /// Destination relative paths already occupied, seeding collision
    /// resolution for new outputs.
    fn known_dest_paths(&self) -> HashSet<String>;
}

/// State snapshot loaded from a [`HistoryStore`].
pub struct HistoryStateProvider {
    by_fingerprint: HashMap<Fingerprint, DestState>,
    by_source_path: HashMap<String, Fingerprint>,
    dest_paths: HashSet<String>,
}

impl HistoryStateProvider {
    /// Loads the full tracked set once. Later writes to the store do not
    /// show up in this snapshot.
    pub fn load(store: &Arc<dyn HistoryStore>) -> Result<Self, HistoryError> {
        let mut by_fingerprint = HashMap::new();
        let mut by_source_path = HashMap::new();

        for (fp, record) in store.tracked()? {
            by_source_path.insert(record.source_rel_path.clone(), fp.clone());
            by_fingerprint.insert(
                fp,
                DestState {
                    size: Some(record.size),
                    mtime_ns: Some(record.mtime_ns),
                    quality: record.quality,
                    encoder_id: record.encoder_id,
                    tags_digest: record.tags_digest,
                    source_rel_path: record.source_rel_path,
                    dest_rel_path: record.dest_rel_path,
                    missing_since: record.missing_since,
                },
            );
        }

        let dest_paths = store.output_paths()?.into_iter().collect();

        Ok(Self {
            by_fingerprint,
            by_source_path,
            dest_paths,
        })
    }
}

impl StateProvider for HistoryStateProvider {
    fn get(&self, fingerprint: &Fingerprint) -> Option<&DestState> {
        self.by_fingerprint.get(fingerprint)
    }

    fn fingerprint_for_path(&self, rel_path: &str) -> Option<&Fingerprint> {
        self.by_source_path.get(rel_path)
    }

    fn tracked_fingerprints(&self) -> Vec<Fingerprint> {
        self.by_fingerprint.keys().cloned().collect()
    }

    fn legacy_dest_for(&self, _stem: &str) -> Option<&str> {
        // History records only what this tool wrote; legacy outputs are
        // invisible to it.
        None
    }

    fn known_dest_paths(&self) -> HashSet<String> {
        self.dest_paths.clone()
    }
}

/// State snapshot derived from a freshly built [`DestIndex`].
pub struct IndexStateProvider {
    by_fingerprint: HashMap<Fingerprint, DestState>,
    by_source_path: HashMap<String, Fingerprint>,
    legacy_by_stem: HashMap<String, String>,
    dest_paths: HashSet<String>,
}

impl IndexStateProvider {
    pub fn from_index(index: &DestIndex) -> Self {
        let mut by_fingerprint = HashMap::new();
        let mut by_source_path = HashMap::new();
        let mut legacy_by_stem = HashMap::new();
        let mut dest_paths = HashSet::new();

        for fp in index.fingerprints() {
            let Some(entry) = index.preferred(fp) else {
                continue;
            };
            by_source_path.insert(entry.provenance.source_rel_path.clone(), fp.clone());
            by_fingerprint.insert(
                fp.clone(),
                DestState {
                    size: None,
                    mtime_ns: None,
                    quality: entry.provenance.quality.clone(),
                    encoder_id: entry.provenance.encoder_id.clone(),
                    tags_digest: entry.tags_digest.clone(),
                    source_rel_path: entry.provenance.source_rel_path.clone(),
                    dest_rel_path: entry.rel_path.clone(),
                    missing_since: None,
                },
            );
        }

        for entry in index.entries() {
            dest_paths.insert(entry.rel_path.clone());
            if entry.is_legacy() {
                legacy_by_stem
                    .entry(stem_of(&entry.rel_path).to_string())
                    .or_insert_with(|| entry.rel_path.clone());
            }
        }

        Self {
            by_fingerprint,
            by_source_path,
            legacy_by_stem,
            dest_paths,
        }
    }
}

impl StateProvider for IndexStateProvider {
    fn get(&self, fingerprint: &Fingerprint) -> Option<&DestState> {
        self.by_fingerprint.get(fingerprint)
    }

    fn fingerprint_for_path(&self, rel_path: &str) -> Option<&Fingerprint> {
        self.by_source_path.get(rel_path)
    }

    fn tracked_fingerprints(&self) -> Vec<Fingerprint> {
        self.by_fingerprint.keys().cloned().collect()
    }

    fn legacy_dest_for(&self, stem: &str) -> Option<&str> {
        self.legacy_by_stem.get(stem).map(String::as_str)
    }

    fn known_dest_paths(&self) -> HashSet<String> {
        self.dest_paths.clone()
    }
}

/// Relative path without its final extension.
fn stem_of(rel_path: &str) -> &str {
    match rel_path.rfind('.') {
        Some(dot) if dot > rel_path.rfind('/').map_or(0, |s| s + 1) => &rel_path[..dot],
        _ => rel_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest_index::{Container, DestEntry};
    use crate::history::{HistoryRecord, SqliteHistory};
    use crate::provenance::Provenance;
    use std::path::PathBuf;

    fn dest_entry(rel: &str, fp: &str, source_rel: &str) -> DestEntry {
        DestEntry {
            abs_path: PathBuf::from("/dest").join(rel),
            rel_path: rel.to_string(),
            size: 100,
            mtime_ns: 0,
            container: Container::Ogg,
            provenance: Provenance {
                source_fingerprint: fp.to_string(),
                encoder_id: "ffmpeg-libvorbis".to_string(),
                quality: "ogg-192".to_string(),
                format_version: "1".to_string(),
                source_rel_path: source_rel.to_string(),
            },
            tags_digest: Some("digest".to_string()),
        }
    }

    #[test]
    fn test_history_provider_snapshots_store() {
        let store = SqliteHistory::in_memory().unwrap();
        let fp = Fingerprint::new("aa".repeat(16));
        store
            .upsert(
                &fp,
                &HistoryRecord {
                    size: 500,
                    mtime_ns: 7,
                    quality: "ogg-192".to_string(),
                    encoder_id: "ffmpeg-libvorbis".to_string(),
                    tags_digest: None,
                    source_rel_path: "a.flac".to_string(),
                    dest_rel_path: "a.ogg".to_string(),
                    last_seen_at: Utc::now(),
                    missing_since: None,
                },
            )
            .unwrap();
        store.record_output(&fp, "a.ogg").unwrap();

        let store: Arc<dyn HistoryStore> = Arc::new(store);
        let provider = HistoryStateProvider::load(&store).unwrap();

        let state = provider.get(&fp).unwrap();
        assert_eq!(state.size, Some(500));
        assert_eq!(state.dest_rel_path, "a.ogg");
        assert_eq!(provider.fingerprint_for_path("a.flac"), Some(&fp));
        assert!(provider.known_dest_paths().contains("a.ogg"));
        assert!(provider.legacy_dest_for("a").is_none());
    }

    #[test]
    fn test_index_provider_has_no_source_metadata() {
        let fp = Fingerprint::new("bb".repeat(16));
        let mut index = DestIndex::default();
        index.insert(dest_entry("x/track.ogg", fp.as_str(), "x/track.flac"));

        let provider = IndexStateProvider::from_index(&index);
        let state = provider.get(&fp).unwrap();
        assert_eq!(state.size, None);
        assert_eq!(state.mtime_ns, None);
        assert_eq!(state.source_rel_path, "x/track.flac");
        assert_eq!(provider.fingerprint_for_path("x/track.flac"), Some(&fp));
    }

    #[test]
    fn test_index_provider_exposes_legacy_stems() {
        let mut index = DestIndex::default();
        let mut legacy = dest_entry("old/song.mp3", "", "");
        legacy.provenance = Provenance::default();
        index.insert(legacy);

        let provider = IndexStateProvider::from_index(&index);
        assert_eq!(provider.legacy_dest_for("old/song"), Some("old/song.mp3"));
        assert!(provider.legacy_dest_for("old/other").is_none());
        assert!(provider.tracked_fingerprints().is_empty());
        assert!(provider.known_dest_paths().contains("old/song.mp3"));
    }
}
