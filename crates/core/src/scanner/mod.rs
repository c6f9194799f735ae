//! Source tree scanner.
//!
//! Enumerates every source audio file under a root and computes a cheap
//! content fingerprint per file. Enumeration is a blocking directory walk;
//! fingerprinting is I/O-bound and runs in parallel, bounded by a worker
//! count.

mod fingerprint;
mod types;

pub use fingerprint::{path_identity, read_fingerprint, Fingerprint, FingerprintError};
pub use types::SourceFile;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::provenance;

/// Extensions recognized as source audio.
const SOURCE_EXTENSIONS: &[&str] = &["flac"];

/// Errors that can abort a scan outright. Per-file problems never do; they
/// either exclude the file or leave its fingerprint unset.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Source root missing or unreadable.
    #[error("source root not accessible: {path}: {source}")]
    RootNotAccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A scan worker task failed.
    #[error("scan worker failed: {0}")]
    Worker(String),
}

/// Scans a source root and produces the full set of source files.
pub struct Scanner {
    fingerprinting: bool,
    tags_digest: bool,
    workers: usize,
}

impl Scanner {
    /// Creates a scanner.
    ///
    /// With `fingerprinting` disabled, change detection degrades to
    /// size+mtime only; an accepted precision loss that makes scans free of
    /// per-file reads.
    pub fn new(fingerprinting: bool, tags_digest: bool, workers: usize) -> Self {
        Self {
            fingerprinting,
            tags_digest,
            workers: workers.max(1),
        }
    }

    /// Walks the root and returns every readable source file under it.
    ///
    /// A file whose FLAC header fails to parse is excluded from the result
    /// set, not reported: corruption is the concern of a separate integrity
    /// check, not the scanner. A file that merely cannot be read right now
    /// is kept with no fingerprint so the planner can hold it.
    pub async fn scan(&self, root: &Path) -> Result<Vec<SourceFile>, ScanError> {
        let root = root.to_path_buf();
        std::fs::metadata(&root).map_err(|e| ScanError::RootNotAccessible {
            path: root.clone(),
            source: e,
        })?;

        // Enumeration is blocking I/O; keep it off the async workers.
        let walk_root = root.clone();
        let entries = tokio::task::spawn_blocking(move || enumerate(&walk_root))
            .await
            .map_err(|e| ScanError::Worker(e.to_string()))?;

        if !self.fingerprinting && !self.tags_digest {
            return Ok(entries
                .into_iter()
                .map(|raw| raw.into_source_file(None, None))
                .collect());
        }

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let fingerprinting = self.fingerprinting;
        let tags_digest = self.tags_digest;

        for raw in entries {
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| ScanError::Worker(e.to_string()))?;
                let path = raw.path.clone();
                let probed = tokio::task::spawn_blocking(move || {
                    probe_file(&path, fingerprinting, tags_digest)
                })
                .await
                .map_err(|e| ScanError::Worker(e.to_string()))?;

                Ok::<Option<SourceFile>, ScanError>(
                    probed.map(|(fp, digest)| raw.into_source_file(fp, digest)),
                )
            });
        }

        let mut files = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| ScanError::Worker(e.to_string()))?;
            if let Some(file) = result? {
                files.push(file);
            }
        }
        Ok(files)
    }
}

struct RawEntry {
    path: PathBuf,
    rel_path: String,
    size: u64,
    mtime_ns: i64,
}

impl RawEntry {
    fn into_source_file(
        self,
        fingerprint: Option<Fingerprint>,
        tags_digest: Option<String>,
    ) -> SourceFile {
        SourceFile {
            path: self.path,
            rel_path: self.rel_path,
            size: self.size,
            mtime_ns: self.mtime_ns,
            fingerprint,
            tags_digest,
        }
    }
}

fn enumerate(root: &Path) -> Vec<RawEntry> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry during scan: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_source_extension(entry.path()) {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("skipping {}: metadata unreadable: {}", entry.path().display(), e);
                continue;
            }
        };
        let Some(rel_path) = rel_string(root, entry.path()) else {
            continue;
        };
        out.push(RawEntry {
            path: entry.path().to_path_buf(),
            rel_path,
            size: meta.len(),
            mtime_ns: mtime_ns(&meta),
        });
    }
    out
}

/// Probes one file; `None` means the file is excluded from the scan.
fn probe_file(
    path: &Path,
    fingerprinting: bool,
    tags_digest: bool,
) -> Option<(Option<Fingerprint>, Option<String>)> {
    let fp = if fingerprinting {
        match read_fingerprint(path) {
            Ok(fp) => Some(fp),
            Err(e) if e.is_corruption() => {
                debug!("excluding {}: {}", path.display(), e);
                return None;
            }
            Err(e) => {
                warn!("fingerprint unavailable for {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    let digest = if tags_digest {
        provenance::tags_digest(path)
    } else {
        None
    };

    Some((fp, digest))
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SOURCE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn rel_string(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn mtime_ns(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
