use std::path::PathBuf;

use super::fingerprint::Fingerprint;

/// A single audio file discovered under the source root.
///
/// Created fresh on every scan pass and never mutated; the only durable
/// trace of a source file lives in the history store.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Absolute location on disk.
    pub path: PathBuf,

    /// Path relative to the source root, with `/` separators. This is the
    /// file's identity for tree position; enumeration order carries none.
    pub rel_path: String,

    /// File size in bytes.
    pub size: u64,

    /// Modification time, nanoseconds since the Unix epoch.
    pub mtime_ns: i64,

    /// Stream fingerprint; `None` when fingerprinting is disabled or the
    /// stream identity could not be read.
    pub fingerprint: Option<Fingerprint>,

    /// Digest of the textual tag metadata; `None` when tags could not be
    /// read. Separate from the audio fingerprint, drives tag-sync detection.
    pub tags_digest: Option<String>,
}
