use std::collections::HashMap;
use std::path::PathBuf;

use crate::provenance::Provenance;
use crate::scanner::Fingerprint;

/// Output container families recognized in the destination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Container {
    Flac,
    Ogg,
    Opus,
    M4a,
    Mp3,
}

impl Container {
    pub const ALL: &'static [Container] = &[
        Container::Flac,
        Container::Ogg,
        Container::Opus,
        Container::M4a,
        Container::Mp3,
    ];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "flac" => Some(Container::Flac),
            "ogg" => Some(Container::Ogg),
            "opus" => Some(Container::Opus),
            "m4a" => Some(Container::M4a),
            "mp3" => Some(Container::Mp3),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Container::Flac => "flac",
            Container::Ogg => "ogg",
            Container::Opus => "opus",
            Container::M4a => "m4a",
            Container::Mp3 => "mp3",
        }
    }

    /// Fixed tie-break rank; richer tag families first.
    pub fn rank(&self) -> u8 {
        match self {
            Container::Flac => 0,
            Container::Ogg => 1,
            Container::Opus => 2,
            Container::M4a => 3,
            Container::Mp3 => 4,
        }
    }
}

/// One existing file in the destination tree.
///
/// Reconstructed fresh on every index build; never mutated in place. An
/// action either rewrites the file (new provenance) or deletes it.
#[derive(Debug, Clone)]
pub struct DestEntry {
    pub abs_path: PathBuf,
    pub rel_path: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub container: Container,
    pub provenance: Provenance,
    pub tags_digest: Option<String>,
}

impl DestEntry {
    /// True when the output predates provenance tagging.
    pub fn is_legacy(&self) -> bool {
        self.provenance.is_empty()
    }

    pub fn fingerprint(&self) -> Option<Fingerprint> {
        if self.provenance.source_fingerprint.is_empty() {
            None
        } else {
            Some(Fingerprint::new(self.provenance.source_fingerprint.clone()))
        }
    }
}

/// Lookup structures over the destination tree.
#[derive(Debug, Default)]
pub struct DestIndex {
    by_rel_path: HashMap<String, DestEntry>,
    by_fingerprint: HashMap<Fingerprint, Vec<DestEntry>>,
}

impl DestIndex {
    pub fn insert(&mut self, entry: DestEntry) {
        if let Some(fp) = entry.fingerprint() {
            self.by_fingerprint.entry(fp).or_default().push(entry.clone());
        }
        self.by_rel_path.insert(entry.rel_path.clone(), entry);
    }

    pub fn by_rel_path(&self, rel_path: &str) -> Option<&DestEntry> {
        self.by_rel_path.get(rel_path)
    }

    /// Every destination entry claiming a fingerprint; usually one, but
    /// stale duplicates from renames can leave several.
    pub fn entries_for(&self, fingerprint: &Fingerprint) -> &[DestEntry] {
        self.by_fingerprint
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The canonical destination for a fingerprint.
    ///
    /// Total order over candidates: relative path lexicographic, then
    /// container rank. Reproducible across runs without timestamps.
    pub fn preferred(&self, fingerprint: &Fingerprint) -> Option<&DestEntry> {
        self.by_fingerprint.get(fingerprint)?.iter().min_by(|a, b| {
            a.rel_path
                .cmp(&b.rel_path)
                .then_with(|| a.container.rank().cmp(&b.container.rank()))
        })
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.by_fingerprint.keys()
    }

    pub fn rel_paths(&self) -> impl Iterator<Item = &str> {
        self.by_rel_path.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &DestEntry> {
        self.by_rel_path.values()
    }

    pub fn len(&self) -> usize {
        self.by_rel_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_rel_path.is_empty()
    }
}
