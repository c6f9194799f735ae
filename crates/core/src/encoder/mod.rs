//! Audio transcoding.
//!
//! The [`Encoder`] trait hides the actual transcoder; [`FfmpegEncoder`]
//! shells out to ffmpeg. Encoders write wherever the job points them and
//! never decide final paths; the scheduler owns temp-then-rename.

mod config;
mod error;
mod ffmpeg;
mod traits;
mod types;

pub use config::EncoderConfig;
pub use error::EncoderError;
pub use ffmpeg::FfmpegEncoder;
pub use traits::Encoder;
pub use types::{EncodeJob, EncodeOutcome, Quality, TargetFormat};
