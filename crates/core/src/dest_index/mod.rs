//! Self-describing destination index.
//!
//! Rebuilt from scratch on every run by walking the destination tree and
//! reading the provenance markers embedded in each output file. This is the
//! alternative source of tracked state when no history database is in play.

mod types;

pub use types::{Container, DestEntry, DestIndex};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;
use walkdir::WalkDir;

use crate::provenance::{Provenance, ProvenanceCodec};

/// Errors that can abort an index build. Per-file provenance problems never
/// do; the entry is kept with empty provenance instead.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Destination root missing or unreadable.
    #[error("destination root not accessible: {path}: {source}")]
    RootNotAccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An index worker task failed.
    #[error("index worker failed: {0}")]
    Worker(String),
}

/// Builds a [`DestIndex`] by walking a destination root.
pub struct DestIndexBuilder {
    codec: Arc<dyn ProvenanceCodec>,
    workers: usize,
}

impl DestIndexBuilder {
    pub fn new(codec: Arc<dyn ProvenanceCodec>, workers: usize) -> Self {
        Self {
            codec,
            workers: workers.max(1),
        }
    }

    /// Walks the destination root and reads provenance out of every file
    /// whose extension matches a supported container.
    ///
    /// Provenance reads are best-effort and run in parallel; a file whose
    /// tags cannot be parsed is kept as a legacy entry, not dropped.
    pub async fn build(&self, root: &Path) -> Result<DestIndex, IndexError> {
        let root = root.to_path_buf();
        std::fs::metadata(&root).map_err(|e| IndexError::RootNotAccessible {
            path: root.clone(),
            source: e,
        })?;

        let walk_root = root.clone();
        let entries = tokio::task::spawn_blocking(move || enumerate(&walk_root))
            .await
            .map_err(|e| IndexError::Worker(e.to_string()))?;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for raw in entries {
            let semaphore = Arc::clone(&semaphore);
            let codec = Arc::clone(&self.codec);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| IndexError::Worker(e.to_string()))?;

                let provenance = match codec.read(&raw.path).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("treating {} as legacy: {}", raw.path.display(), e);
                        Provenance::default()
                    }
                };
                let tags_digest = codec.read_tags_digest(&raw.path).await.unwrap_or(None);

                Ok::<DestEntry, IndexError>(DestEntry {
                    abs_path: raw.path,
                    rel_path: raw.rel_path,
                    size: raw.size,
                    mtime_ns: raw.mtime_ns,
                    container: raw.container,
                    provenance,
                    tags_digest,
                })
            });
        }

        let mut index = DestIndex::default();
        while let Some(joined) = tasks.join_next().await {
            let entry = joined.map_err(|e| IndexError::Worker(e.to_string()))??;
            index.insert(entry);
        }
        Ok(index)
    }
}

struct RawDestEntry {
    path: PathBuf,
    rel_path: String,
    size: u64,
    mtime_ns: i64,
    container: Container,
}

fn enumerate(root: &Path) -> Vec<RawDestEntry> {
    let mut out = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("skipping unreadable entry during index build: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        // Temp files from an interrupted run are not outputs.
        if entry
            .file_name()
            .to_string_lossy()
            .starts_with('.')
        {
            continue;
        }
        let Some(container) = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Container::from_extension)
        else {
            continue;
        };
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!(
                    "skipping {}: metadata unreadable: {}",
                    entry.path().display(),
                    e
                );
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel_path = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if rel_path.is_empty() {
            continue;
        }
        out.push(RawDestEntry {
            path: entry.path().to_path_buf(),
            rel_path,
            size: meta.len(),
            mtime_ns: meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_nanos() as i64)
                .unwrap_or(0),
            container,
        });
    }
    out
}
