//! Embedded provenance markers.
//!
//! Every output file carries a small record of which source stream produced
//! it, with which encoder and settings. The destination index is rebuilt by
//! reading these markers back, which is what makes the destination tree
//! self-describing: no database is required to know where an output came
//! from.

mod lofty_codec;

pub use lofty_codec::{tags_digest, LoftyCodec};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Version of the provenance tag layout written to outputs.
pub const FORMAT_VERSION: &str = "1";

/// Provenance embedded in an output file.
///
/// All fields are empty strings on outputs that predate provenance tagging
/// ("legacy" outputs).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_fingerprint: String,
    pub encoder_id: String,
    pub quality: String,
    pub format_version: String,
    pub source_rel_path: String,
}

impl Provenance {
    /// True when no provenance fields are present (legacy output).
    pub fn is_empty(&self) -> bool {
        self.source_fingerprint.is_empty()
            && self.encoder_id.is_empty()
            && self.quality.is_empty()
            && self.format_version.is_empty()
            && self.source_rel_path.is_empty()
    }
}

/// Errors raised by a provenance codec.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Tags could not be read.
    #[error("failed to read tags from {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    /// Tags could not be written.
    #[error("failed to write tags to {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads and writes provenance markers embedded in output files.
#[async_trait]
pub trait ProvenanceCodec: Send + Sync {
    /// Reads provenance from an output file.
    ///
    /// Absent or unreadable tags yield a record with empty fields, not an
    /// error; only hard I/O failures are reported.
    async fn read(&self, path: &Path) -> Result<Provenance, CodecError>;

    /// Writes (or rewrites) provenance on an output file, leaving other tags
    /// in place.
    async fn write(&self, path: &Path, provenance: &Provenance) -> Result<(), CodecError>;

    /// Digest of the textual tag metadata embedded in the file, if any.
    async fn read_tags_digest(&self, path: &Path) -> Result<Option<String>, CodecError>;

    /// Replaces the textual tags on `dest` with those of `source`, then
    /// re-stamps `provenance`. Audio content is untouched.
    async fn copy_tags(
        &self,
        source: &Path,
        dest: &Path,
        provenance: &Provenance,
    ) -> Result<(), CodecError>;
}
