use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ConfigError;
use crate::encoder::{EncoderConfig, Quality, TargetFormat};
use crate::planner::PlanOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub dest: DestConfig,

    #[serde(default)]
    pub encoding: EncodingConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Source library settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Root of the lossless library to mirror.
    pub root: PathBuf,
}

/// Destination tree settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestConfig {
    /// Root of the mirrored tree. Created on first run if absent.
    pub root: PathBuf,
}

/// Target format and encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default = "default_format")]
    pub format: TargetFormat,

    #[serde(default = "default_bitrate")]
    pub bitrate_kbps: u32,

    #[serde(default)]
    pub encoder: EncoderConfig,
}

fn default_format() -> TargetFormat {
    TargetFormat::OggVorbis
}

fn default_bitrate() -> u32 {
    192
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            bitrate_kbps: default_bitrate(),
            encoder: EncoderConfig::default(),
        }
    }
}

/// Which backend supplies tracked state to the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    /// The history database; fast, requires it to be intact.
    History,
    /// A fresh walk of the destination tree reading embedded provenance.
    DestIndex,
}

/// Per-run behavior knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Concurrent transcodes (and scan probes).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Identify sources by stream fingerprint rather than path.
    #[serde(default = "default_true")]
    pub fingerprinting: bool,

    /// Follow moved sources with an output rename instead of a re-encode.
    #[serde(default = "default_true")]
    pub detect_renames: bool,

    /// Adopt provenance-less outputs found where a source's output belongs.
    #[serde(default)]
    pub retag_legacy: bool,

    /// Rewrite tags without re-encoding when only tags changed.
    #[serde(default = "default_true")]
    pub sync_tags: bool,

    /// Delete outputs whose source has been gone past the grace period.
    #[serde(default)]
    pub prune: bool,

    /// Grace period before a missing source's output is pruned.
    #[serde(default = "default_prune_grace")]
    pub prune_grace_secs: u64,

    #[serde(default = "default_state_backend")]
    pub state_backend: StateBackend,
}

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_prune_grace() -> u64 {
    7 * 24 * 60 * 60
}

fn default_state_backend() -> StateBackend {
    StateBackend::History
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fingerprinting: true,
            detect_renames: true,
            retag_legacy: false,
            sync_tags: true,
            prune: false,
            prune_grace_secs: default_prune_grace(),
            state_backend: default_state_backend(),
        }
    }
}

/// History database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("soundmirror.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Config {
    pub fn quality(&self) -> Quality {
        Quality::new(self.encoding.format, self.encoding.bitrate_kbps)
    }

    /// Planner knobs derived from this configuration.
    pub fn plan_options(&self, encoder_id: &str) -> PlanOptions {
        PlanOptions {
            quality: self.quality(),
            encoder_id: encoder_id.to_string(),
            fingerprinting: self.run.fingerprinting,
            detect_renames: self.run.detect_renames,
            retag_legacy: self.run.retag_legacy,
            sync_tags: self.run.sync_tags,
            prune: self.run.prune,
            prune_grace: chrono::Duration::seconds(self.run.prune_grace_secs as i64),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "source.root must not be empty".to_string(),
            ));
        }
        if self.dest.root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "dest.root must not be empty".to_string(),
            ));
        }
        if self.source.root == self.dest.root {
            return Err(ConfigError::ValidationError(
                "source.root and dest.root must differ".to_string(),
            ));
        }
        if self.encoding.bitrate_kbps == 0 {
            return Err(ConfigError::ValidationError(
                "encoding.bitrate_kbps must be positive".to_string(),
            ));
        }
        if self.run.workers == 0 {
            return Err(ConfigError::ValidationError(
                "run.workers must be positive".to_string(),
            ));
        }
        // Rename detection needs a content identity to follow.
        if self.run.detect_renames && !self.run.fingerprinting {
            return Err(ConfigError::ValidationError(
                "run.detect_renames requires run.fingerprinting".to_string(),
            ));
        }
        Ok(())
    }
}
