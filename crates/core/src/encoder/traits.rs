//! Trait definitions for the encoder module.

use async_trait::async_trait;

use super::error::EncoderError;
use super::types::{EncodeJob, EncodeOutcome};

/// An encoder that can transcode one audio file into a lossy target.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Stable identifier recorded in provenance and history. Changing it
    /// invalidates every prior output.
    fn id(&self) -> &str;

    /// Transcodes the job's input to its output path.
    async fn encode(&self, job: EncodeJob) -> Result<EncodeOutcome, EncoderError>;

    /// Validates that the encoder is ready to run.
    async fn validate(&self) -> Result<(), EncoderError>;
}
