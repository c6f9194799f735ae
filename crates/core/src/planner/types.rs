//! Plan item types.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::encoder::Quality;
use crate::scanner::{Fingerprint, SourceFile};

/// What to do about one source file or one orphaned output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Transcode the source into a fresh output.
    Convert,
    /// Move an existing output to follow a renamed source.
    Rename,
    /// Stamp provenance onto an output that predates tagging.
    Retag,
    /// Rewrite the output's tags from the source without re-encoding.
    SyncTags,
    /// Nothing to do; the output is current.
    Skip,
    /// Delete an output whose source is gone past the grace period.
    Prune,
    /// Deliberately do nothing this run.
    Hold,
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Convert => "convert",
            Action::Rename => "rename",
            Action::Retag => "retag",
            Action::SyncTags => "sync_tags",
            Action::Skip => "skip",
            Action::Prune => "prune",
            Action::Hold => "hold",
        }
    }

    /// Whether the scheduler dispatches this action to a worker.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Action::Skip | Action::Hold)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A tracked attribute that differs from the recorded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangedField {
    Fingerprint,
    Size,
    Mtime,
    Quality,
    Encoder,
}

impl ChangedField {
    pub fn label(&self) -> &'static str {
        match self {
            ChangedField::Fingerprint => "fingerprint",
            ChangedField::Size => "size",
            ChangedField::Mtime => "mtime",
            ChangedField::Quality => "quality",
            ChangedField::Encoder => "encoder",
        }
    }
}

/// Why an action was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    /// Never mirrored before.
    New,
    /// Recorded state differs in the listed fields.
    Changed(Vec<ChangedField>),
    /// An output without provenance sits where this source's output would.
    LegacyOutput,
    /// Same content tracked under a different source path.
    Renamed { from: String },
    /// Audio unchanged but the source tags moved on.
    TagsChanged,
    /// Output matches the recorded state.
    UpToDate,
    /// Source gone longer than the grace period.
    SourceRemoved,
    /// Source gone, grace period still running.
    GracePeriod { since: Option<DateTime<Utc>> },
    /// Source could not be fingerprinted this run.
    Unreadable,
}

impl Reason {
    /// Short grouping key for run summaries.
    pub fn label(&self) -> String {
        match self {
            Reason::New => "new".to_string(),
            Reason::Changed(fields) => {
                let names: Vec<&str> = fields.iter().map(|f| f.label()).collect();
                format!("changed: {}", names.join(", "))
            }
            Reason::LegacyOutput => "legacy output".to_string(),
            Reason::Renamed { .. } => "renamed".to_string(),
            Reason::TagsChanged => "tags changed".to_string(),
            Reason::UpToDate => "up to date".to_string(),
            Reason::SourceRemoved => "source removed".to_string(),
            Reason::GracePeriod { .. } => "grace period".to_string(),
            Reason::Unreadable => "unreadable".to_string(),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::Renamed { from } => write!(f, "renamed from {from}"),
            Reason::GracePeriod { since: Some(since) } => {
                write!(f, "grace period since {}", since.to_rfc3339())
            }
            other => f.write_str(&other.label()),
        }
    }
}

/// One planned unit of work.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub action: Action,
    pub reason: Reason,

    /// Present for every action driven by a scanned source.
    pub source: Option<SourceFile>,

    /// Content identity the item is about, when known.
    pub fingerprint: Option<Fingerprint>,

    /// Destination relative path the action targets. `None` until path
    /// resolution assigns one to a fresh convert or a rename.
    pub dest_rel_path: Option<String>,

    /// For renames, the output path being moved away from.
    pub rename_from: Option<String>,

    /// A prior fingerprint this item's record replaces. Set when the same
    /// source path now carries different audio content.
    pub supersedes: Option<Fingerprint>,

    /// Output the convert replaces when the destination path changed.
    pub stale_dest_rel_path: Option<String>,
}

impl PlanItem {
    pub fn new(action: Action, reason: Reason) -> Self {
        Self {
            action,
            reason,
            source: None,
            fingerprint: None,
            dest_rel_path: None,
            rename_from: None,
            supersedes: None,
            stale_dest_rel_path: None,
        }
    }
}

/// Output of one planning pass. Pure data; executing it is the scheduler's
/// job, bookkeeping the missing sets is the runner's.
#[derive(Debug, Default)]
pub struct Plan {
    pub items: Vec<PlanItem>,

    /// Tracked fingerprints absent from this scan. Their grace clocks
    /// should be running.
    pub missing: Vec<Fingerprint>,

    /// Previously missing fingerprints seen again. Their clocks stop.
    pub reappeared: Vec<Fingerprint>,
}

/// Knobs for one planning pass.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub quality: Quality,
    pub encoder_id: String,
    pub fingerprinting: bool,
    pub detect_renames: bool,
    pub retag_legacy: bool,
    pub sync_tags: bool,
    pub prune: bool,
    pub prune_grace: Duration,
}
