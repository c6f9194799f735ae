//! FFmpeg-based encoder implementation.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::config::EncoderConfig;
use super::error::EncoderError;
use super::traits::Encoder;
use super::types::{EncodeJob, EncodeOutcome};

/// FFmpeg-based encoder.
pub struct FfmpegEncoder {
    config: EncoderConfig,
    id: String,
}

impl FfmpegEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self {
            config,
            id: "ffmpeg-1".to_string(),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EncoderConfig::default())
    }

    /// Builds the ffmpeg argument list for one job.
    ///
    /// The muxer is forced because the output path is a temp file whose
    /// name does not end in the target extension.
    fn build_args(&self, job: &EncodeJob) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            job.input_path.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-map_metadata".to_string(),
            "0".to_string(),
            "-c:a".to_string(),
            job.quality.format.ffmpeg_codec().to_string(),
            "-b:a".to_string(),
            format!("{}k", job.quality.bitrate_kbps),
            "-loglevel".to_string(),
            self.config.ffmpeg_log_level.clone(),
            "-f".to_string(),
            job.quality.format.ffmpeg_muxer().to_string(),
        ];

        args.extend(self.config.extra_ffmpeg_args.iter().cloned());
        args.push(job.output_path.to_string_lossy().to_string());
        args
    }

    fn map_spawn_error(&self, e: std::io::Error) -> EncoderError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EncoderError::FfmpegNotFound {
                path: self.config.ffmpeg_path.clone(),
            }
        } else {
            EncoderError::Io(e)
        }
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn id(&self) -> &str {
        &self.id
    }

    async fn encode(&self, job: EncodeJob) -> Result<EncodeOutcome, EncoderError> {
        let start = Instant::now();

        if !job.input_path.exists() {
            return Err(EncoderError::InputNotFound {
                path: job.input_path.clone(),
            });
        }
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.build_args(&job);
        let child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.map_spawn_error(e))?;

        let timeout_duration = Duration::from_secs(self.config.timeout_secs);
        let output = match timeout(timeout_duration, child.wait_with_output()).await {
            Ok(result) => result.map_err(EncoderError::Io)?,
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                return Err(EncoderError::Timeout {
                    timeout_secs: self.config.timeout_secs,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EncoderError::encode_failed(
                format!("ffmpeg exited with code: {:?}", output.status.code()),
                if stderr.is_empty() {
                    None
                } else {
                    Some(stderr)
                },
            ));
        }

        let meta = tokio::fs::metadata(&job.output_path)
            .await
            .map_err(|_| EncoderError::OutputMissing {
                path: job.output_path.clone(),
            })?;

        Ok(EncodeOutcome {
            output_path: job.output_path,
            output_size_bytes: meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn validate(&self) -> Result<(), EncoderError> {
        let result = Command::new(&self.config.ffmpeg_path)
            .arg("-version")
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(EncoderError::encode_failed(
                "ffmpeg -version failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            )),
            Err(e) => Err(self.map_spawn_error(e)),
        }
    }
}
