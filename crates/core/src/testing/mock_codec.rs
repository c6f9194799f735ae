//! Provenance codec double backed by JSON file content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provenance::{CodecError, Provenance, ProvenanceCodec};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Payload {
    provenance: Provenance,
    tags_digest: Option<String>,
}

/// Codec that stores provenance as the whole file content, JSON-encoded.
///
/// Because the payload lives in the file itself it survives the scheduler's
/// temp-then-rename publish, exactly like real embedded tags would. Files
/// whose content is not a payload read as errors, which is how legacy
/// outputs are simulated.
pub struct MockCodec {
    source_digests: Mutex<HashMap<PathBuf, String>>,
}

impl MockCodec {
    pub fn new() -> Self {
        Self {
            source_digests: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds the digest that `copy_tags` will stamp for a source path.
    pub fn seed_source_digest(&self, source: &Path, digest: &str) {
        self.source_digests
            .lock()
            .expect("mock lock poisoned")
            .insert(source.to_path_buf(), digest.to_string());
    }

    /// Writes a payload file directly; for arranging pre-existing outputs.
    pub fn write_file(
        path: &Path,
        provenance: &Provenance,
        tags_digest: Option<&str>,
    ) -> std::io::Result<()> {
        let payload = Payload {
            provenance: provenance.clone(),
            tags_digest: tags_digest.map(str::to_string),
        };
        let body = serde_json::to_vec_pretty(&payload).expect("payload serializes");
        std::fs::write(path, body)
    }

    fn load(path: &Path) -> Result<Payload, CodecError> {
        let bytes = std::fs::read(path).map_err(CodecError::Io)?;
        serde_json::from_slice(&bytes).map_err(|e| CodecError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn store(path: &Path, payload: &Payload) -> Result<(), CodecError> {
        let body = serde_json::to_vec_pretty(payload).map_err(|e| CodecError::Write {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, body).map_err(CodecError::Io)
    }
}

impl Default for MockCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvenanceCodec for MockCodec {
    async fn read(&self, path: &Path) -> Result<Provenance, CodecError> {
        Self::load(path).map(|p| p.provenance)
    }

    async fn write(&self, path: &Path, provenance: &Provenance) -> Result<(), CodecError> {
        let mut payload = Self::load(path).unwrap_or_default();
        payload.provenance = provenance.clone();
        Self::store(path, &payload)
    }

    async fn read_tags_digest(&self, path: &Path) -> Result<Option<String>, CodecError> {
        Ok(Self::load(path).map(|p| p.tags_digest).unwrap_or(None))
    }

    async fn copy_tags(
        &self,
        source: &Path,
        dest: &Path,
        provenance: &Provenance,
    ) -> Result<(), CodecError> {
        let digest = self
            .source_digests
            .lock()
            .expect("mock lock poisoned")
            .get(source)
            .cloned();
        let mut payload = Self::load(dest).unwrap_or_default();
        payload.provenance = provenance.clone();
        payload.tags_digest = digest;
        Self::store(dest, &payload)
    }
}
