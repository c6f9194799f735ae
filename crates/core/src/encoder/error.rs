//! Error types for the encoder module.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("input file not found: {path}")]
    InputNotFound { path: PathBuf },

    #[error("ffmpeg binary not found at: {path}")]
    FfmpegNotFound { path: PathBuf },

    #[error("encode failed: {reason}")]
    EncodeFailed {
        reason: String,
        stderr: Option<String>,
    },

    #[error("encode timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("encoder produced no output at: {path}")]
    OutputMissing { path: PathBuf },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncoderError {
    pub fn encode_failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::EncodeFailed {
            reason: reason.into(),
            stderr,
        }
    }
}
