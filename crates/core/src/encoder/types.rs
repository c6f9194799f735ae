//! Type definitions for the encoder module.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lossy target formats the mirror can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFormat {
    OggVorbis,
    Opus,
    Mp3,
    M4a,
}

impl TargetFormat {
    /// File extension of outputs in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            TargetFormat::OggVorbis => "ogg",
            TargetFormat::Opus => "opus",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::M4a => "m4a",
        }
    }

    /// Short name used in quality specs.
    pub fn name(&self) -> &'static str {
        self.extension()
    }

    /// FFmpeg codec for this format.
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            TargetFormat::OggVorbis => "libvorbis",
            TargetFormat::Opus => "libopus",
            TargetFormat::Mp3 => "libmp3lame",
            TargetFormat::M4a => "aac",
        }
    }

    /// FFmpeg muxer, passed explicitly because temp output files carry a
    /// `.tmp` suffix ffmpeg cannot infer a container from.
    pub fn ffmpeg_muxer(&self) -> &'static str {
        match self {
            TargetFormat::OggVorbis => "ogg",
            TargetFormat::Opus => "ogg",
            TargetFormat::Mp3 => "mp3",
            TargetFormat::M4a => "ipod",
        }
    }
}

/// Target format plus bitrate. Two qualities compare equal exactly when
/// their specs do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quality {
    pub format: TargetFormat,
    pub bitrate_kbps: u32,
}

impl Quality {
    pub fn new(format: TargetFormat, bitrate_kbps: u32) -> Self {
        Self {
            format,
            bitrate_kbps,
        }
    }

    /// Canonical spec string, e.g. `ogg-192`. Stored in provenance and in
    /// history records.
    pub fn spec(&self) -> String {
        format!("{}-{}", self.format.name(), self.bitrate_kbps)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spec())
    }
}

/// One transcode request.
#[derive(Debug, Clone)]
pub struct EncodeJob {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub quality: Quality,
}

/// Result of a completed transcode.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub output_path: PathBuf,
    pub output_size_bytes: u64,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_spec_format() {
        assert_eq!(Quality::new(TargetFormat::OggVorbis, 192).spec(), "ogg-192");
        assert_eq!(Quality::new(TargetFormat::Opus, 128).spec(), "opus-128");
        assert_eq!(Quality::new(TargetFormat::Mp3, 320).spec(), "mp3-320");
    }

    #[test]
    fn test_quality_equality_is_spec_equality() {
        let a = Quality::new(TargetFormat::OggVorbis, 192);
        let b = Quality::new(TargetFormat::OggVorbis, 192);
        let c = Quality::new(TargetFormat::OggVorbis, 256);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_opus_uses_ogg_muxer() {
        assert_eq!(TargetFormat::Opus.ffmpeg_muxer(), "ogg");
        assert_eq!(TargetFormat::Opus.extension(), "opus");
    }
}
