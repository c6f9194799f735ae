pub mod config;
pub mod dest_index;
pub mod encoder;
pub mod history;
pub mod library;
pub mod paths;
pub mod planner;
pub mod provenance;
pub mod scanner;
pub mod scheduler;
pub mod state;
pub mod testing;

pub use config::{load_config, load_config_from_str, Config, ConfigError, StateBackend};
pub use encoder::{Encoder, EncoderConfig, FfmpegEncoder, Quality, TargetFormat};
pub use history::{HistoryStore, SqliteHistory};
pub use library::{LibraryRunner, RunError};
pub use planner::{Action, Plan, PlanItem};
pub use provenance::{LoftyCodec, ProvenanceCodec};
pub use scanner::Fingerprint;
pub use scheduler::{Outcome, OutcomeStatus, RunHandle, RunStatus, RunSummary};
