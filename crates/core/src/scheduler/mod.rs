//! Plan execution.
//!
//! Dispatches executable plan items to a bounded pool of workers and
//! streams outcomes back as units finish. Every output lands via a hidden
//! temp file in its final directory followed by a rename, so an
//! interrupted run never leaves a half-written file where an output
//! belongs. History commits ride in the same unit of work as the
//! filesystem change; when a commit fails the run carries on in degraded
//! mode and says so in the summary.

mod handle;
mod types;

pub use handle::RunHandle;
pub use types::{Outcome, OutcomeStatus, RunStatus, RunSummary};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::encoder::{EncodeJob, Encoder, EncoderError, Quality};
use crate::history::{HistoryRecord, HistoryStore};
use crate::planner::{Action, PlanItem};
use crate::provenance::{CodecError, Provenance, ProvenanceCodec, FORMAT_VERSION};
use crate::scanner::{path_identity, SourceFile};

/// Paths and settings shared by every unit in a run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub dest_root: PathBuf,
    pub quality: Quality,
}

#[derive(Debug, Error)]
enum UnitError {
    #[error(transparent)]
    Encode(#[from] EncoderError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{step}: {source}")]
    Io {
        step: &'static str,
        source: std::io::Error,
    },

    #[error("plan item missing {0}")]
    Incomplete(&'static str),
}

fn io_step(step: &'static str) -> impl FnOnce(std::io::Error) -> UnitError {
    move |source| UnitError::Io { step, source }
}

/// Executes plans against the destination tree.
pub struct Scheduler {
    encoder: Arc<dyn Encoder>,
    codec: Arc<dyn ProvenanceCodec>,
    history: Arc<dyn HistoryStore>,
    capacity: usize,
}

impl Scheduler {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        codec: Arc<dyn ProvenanceCodec>,
        history: Arc<dyn HistoryStore>,
        capacity: usize,
    ) -> Self {
        Self {
            encoder,
            codec,
            history,
            capacity: capacity.max(1),
        }
    }

    /// Runs every item of a plan.
    ///
    /// Skips and holds are reported immediately without occupying a worker.
    /// Cancellation stops dispatch; units already running finish and commit.
    pub async fn execute(
        &self,
        items: Vec<PlanItem>,
        ctx: &RunContext,
        handle: &RunHandle,
        outcome_tx: mpsc::Sender<Outcome>,
    ) -> RunSummary {
        let mut summary = RunSummary::new();
        for item in &items {
            summary.record_planned(item.action, item.reason.label());
        }

        let semaphore = Arc::new(Semaphore::new(self.capacity));
        let mut tasks: JoinSet<(Outcome, bool)> = JoinSet::new();
        let mut cancelled = false;

        for item in items {
            if !item.action.is_executable() {
                let status = if item.action == Action::Skip {
                    OutcomeStatus::Skipped
                } else {
                    OutcomeStatus::Held
                };
                let outcome = outcome_for(&item, status, None);
                summary.record(&outcome);
                let _ = outcome_tx.send(outcome).await;
                continue;
            }

            if !cancelled {
                handle.wait_if_paused().await;
            }
            if handle.is_cancelled() {
                cancelled = true;
            }
            if cancelled {
                summary.not_dispatched += 1;
                continue;
            }

            // Report whatever already finished before dispatching more.
            while let Some(joined) = tasks.try_join_next() {
                finish_unit(joined, &mut summary, &outcome_tx).await;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let encoder = Arc::clone(&self.encoder);
            let codec = Arc::clone(&self.codec);
            let history = Arc::clone(&self.history);
            let ctx = ctx.clone();
            tasks.spawn(async move {
                let _permit = permit;
                execute_item(item, &ctx, encoder, codec, history).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            finish_unit(joined, &mut summary, &outcome_tx).await;
        }

        summary.status = if cancelled || handle.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };
        summary
    }
}

async fn finish_unit(
    joined: Result<(Outcome, bool), tokio::task::JoinError>,
    summary: &mut RunSummary,
    outcome_tx: &mpsc::Sender<Outcome>,
) {
    match joined {
        Ok((outcome, degraded)) => {
            summary.degraded |= degraded;
            summary.record(&outcome);
            let _ = outcome_tx.send(outcome).await;
        }
        Err(e) => {
            warn!("worker task failed: {e}");
            summary.degraded = true;
        }
    }
}

async fn execute_item(
    item: PlanItem,
    ctx: &RunContext,
    encoder: Arc<dyn Encoder>,
    codec: Arc<dyn ProvenanceCodec>,
    history: Arc<dyn HistoryStore>,
) -> (Outcome, bool) {
    let result = match item.action {
        Action::Convert => run_convert(&item, ctx, &encoder, &codec, &history).await,
        Action::Rename => run_rename(&item, ctx, &encoder, &codec, &history).await,
        Action::Retag => run_retag(&item, ctx, &encoder, &codec, &history).await,
        Action::SyncTags => run_sync_tags(&item, ctx, &encoder, &codec, &history).await,
        Action::Prune => run_prune(&item, ctx, &history).await,
        Action::Skip | Action::Hold => Ok(false),
    };

    match result {
        Ok(degraded) => {
            debug!(
                action = item.action.label(),
                dest = item.dest_rel_path.as_deref().unwrap_or(""),
                "unit complete"
            );
            (outcome_for(&item, OutcomeStatus::Succeeded, None), degraded)
        }
        Err(e) => (
            outcome_for(&item, OutcomeStatus::Failed, Some(e.to_string())),
            false,
        ),
    }
}

fn outcome_for(item: &PlanItem, status: OutcomeStatus, error: Option<String>) -> Outcome {
    Outcome {
        action: item.action,
        status,
        reason: item.reason.label(),
        source_rel_path: item.source.as_ref().map(|s| s.rel_path.clone()),
        dest_rel_path: item.dest_rel_path.clone(),
        error,
    }
}

async fn run_convert(
    item: &PlanItem,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
    codec: &Arc<dyn ProvenanceCodec>,
    history: &Arc<dyn HistoryStore>,
) -> Result<bool, UnitError> {
    let source = item.source.as_ref().ok_or(UnitError::Incomplete("source"))?;
    let dest_rel = item
        .dest_rel_path
        .as_deref()
        .ok_or(UnitError::Incomplete("destination path"))?;
    let dest_abs = join_rel(&ctx.dest_root, dest_rel);
    let temp = temp_path(&dest_abs)?;

    if let Some(parent) = dest_abs.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_step("create destination directory"))?;
    }

    let provenance = build_provenance(item, source, ctx, encoder);
    let landed = async {
        encoder
            .encode(EncodeJob {
                input_path: source.path.clone(),
                output_path: temp.clone(),
                quality: ctx.quality,
            })
            .await?;
        codec.write(&temp, &provenance).await?;
        tokio::fs::rename(&temp, &dest_abs)
            .await
            .map_err(io_step("publish output"))?;
        Ok::<(), UnitError>(())
    }
    .await;

    if let Err(e) = landed {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    if let Some(stale) = &item.stale_dest_rel_path {
        let stale_abs = join_rel(&ctx.dest_root, stale);
        if let Err(e) = tokio::fs::remove_file(&stale_abs).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove replaced output {}: {e}", stale_abs.display());
            }
        }
    }

    Ok(commit_success(item, source, dest_rel, ctx, encoder, history))
}

async fn run_rename(
    item: &PlanItem,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
    codec: &Arc<dyn ProvenanceCodec>,
    history: &Arc<dyn HistoryStore>,
) -> Result<bool, UnitError> {
    let source = item.source.as_ref().ok_or(UnitError::Incomplete("source"))?;
    let from_rel = item
        .rename_from
        .as_deref()
        .ok_or(UnitError::Incomplete("rename origin"))?;
    let to_rel = item
        .dest_rel_path
        .as_deref()
        .ok_or(UnitError::Incomplete("destination path"))?;

    let from_abs = join_rel(&ctx.dest_root, from_rel);
    let to_abs = join_rel(&ctx.dest_root, to_rel);
    if let Some(parent) = to_abs.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(io_step("create destination directory"))?;
    }
    tokio::fs::rename(&from_abs, &to_abs)
        .await
        .map_err(io_step("rename output"))?;

    // The embedded source path is stale after the move.
    let provenance = build_provenance(item, source, ctx, encoder);
    codec.write(&to_abs, &provenance).await?;

    let identity = identity_of(item, source);
    let record = record_from(source, to_rel, ctx, encoder);
    let committed = (|| {
        history.upsert(&identity, &record)?;
        history.remove_output(&identity, from_rel)?;
        history.record_output(&identity, to_rel)?;
        Ok::<(), crate::history::HistoryError>(())
    })();
    Ok(report_commit(committed, to_rel))
}

async fn run_retag(
    item: &PlanItem,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
    codec: &Arc<dyn ProvenanceCodec>,
    history: &Arc<dyn HistoryStore>,
) -> Result<bool, UnitError> {
    let source = item.source.as_ref().ok_or(UnitError::Incomplete("source"))?;
    let dest_rel = item
        .dest_rel_path
        .as_deref()
        .ok_or(UnitError::Incomplete("destination path"))?;
    let dest_abs = join_rel(&ctx.dest_root, dest_rel);

    let provenance = build_provenance(item, source, ctx, encoder);
    codec.write(&dest_abs, &provenance).await?;

    Ok(commit_success(item, source, dest_rel, ctx, encoder, history))
}

async fn run_sync_tags(
    item: &PlanItem,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
    codec: &Arc<dyn ProvenanceCodec>,
    history: &Arc<dyn HistoryStore>,
) -> Result<bool, UnitError> {
    let source = item.source.as_ref().ok_or(UnitError::Incomplete("source"))?;
    let dest_rel = item
        .dest_rel_path
        .as_deref()
        .ok_or(UnitError::Incomplete("destination path"))?;
    let dest_abs = join_rel(&ctx.dest_root, dest_rel);

    let provenance = build_provenance(item, source, ctx, encoder);
    codec
        .copy_tags(&source.path, &dest_abs, &provenance)
        .await?;

    Ok(commit_success(item, source, dest_rel, ctx, encoder, history))
}

async fn run_prune(
    item: &PlanItem,
    ctx: &RunContext,
    history: &Arc<dyn HistoryStore>,
) -> Result<bool, UnitError> {
    let fingerprint = item
        .fingerprint
        .as_ref()
        .ok_or(UnitError::Incomplete("fingerprint"))?;
    let dest_rel = item
        .dest_rel_path
        .as_deref()
        .ok_or(UnitError::Incomplete("destination path"))?;
    let dest_abs = join_rel(&ctx.dest_root, dest_rel);

    // An already-absent output is a prune that someone else finished.
    if let Err(e) = tokio::fs::remove_file(&dest_abs).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(io_step("delete output")(e));
        }
    }

    Ok(report_commit(history.remove(fingerprint), dest_rel))
}

/// Commits the post-action state of a source-driven unit. A failed commit
/// degrades the run rather than failing the unit, since the output itself
/// already landed.
fn commit_success(
    item: &PlanItem,
    source: &SourceFile,
    dest_rel: &str,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
    history: &Arc<dyn HistoryStore>,
) -> bool {
    let identity = identity_of(item, source);
    let record = record_from(source, dest_rel, ctx, encoder);
    let committed = (|| {
        if let Some(prev) = &item.supersedes {
            history.remove(prev)?;
        }
        history.upsert(&identity, &record)?;
        history.record_output(&identity, dest_rel)?;
        if let Some(stale) = &item.stale_dest_rel_path {
            history.remove_output(&identity, stale)?;
        }
        Ok::<(), crate::history::HistoryError>(())
    })();
    report_commit(committed, dest_rel)
}

fn report_commit<E: std::fmt::Display>(result: Result<(), E>, dest_rel: &str) -> bool {
    match result {
        Ok(()) => false,
        Err(e) => {
            warn!("history commit failed for {dest_rel}: {e}");
            true
        }
    }
}

fn identity_of(item: &PlanItem, source: &SourceFile) -> crate::scanner::Fingerprint {
    item.fingerprint
        .clone()
        .unwrap_or_else(|| path_identity(&source.rel_path))
}

fn record_from(
    source: &SourceFile,
    dest_rel: &str,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
) -> HistoryRecord {
    HistoryRecord {
        size: source.size,
        mtime_ns: source.mtime_ns,
        quality: ctx.quality.spec(),
        encoder_id: encoder.id().to_string(),
        tags_digest: source.tags_digest.clone(),
        source_rel_path: source.rel_path.clone(),
        dest_rel_path: dest_rel.to_string(),
        last_seen_at: Utc::now(),
        missing_since: None,
    }
}

fn build_provenance(
    item: &PlanItem,
    source: &SourceFile,
    ctx: &RunContext,
    encoder: &Arc<dyn Encoder>,
) -> Provenance {
    Provenance {
        source_fingerprint: item
            .fingerprint
            .as_ref()
            .map(|fp| fp.as_str().to_string())
            .unwrap_or_default(),
        encoder_id: encoder.id().to_string(),
        quality: ctx.quality.spec(),
        format_version: FORMAT_VERSION.to_string(),
        source_rel_path: source.rel_path.clone(),
    }
}

/// Joins a slash-separated relative path onto a root.
fn join_rel(root: &Path, rel: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        out.push(part);
    }
    out
}

/// Hidden temp name next to the final path, renamed into place once the
/// whole unit has been written.
fn temp_path(dest_abs: &Path) -> Result<PathBuf, UnitError> {
    let parent = dest_abs
        .parent()
        .ok_or(UnitError::Incomplete("destination parent"))?;
    let name = dest_abs
        .file_name()
        .ok_or(UnitError::Incomplete("destination file name"))?
        .to_string_lossy();
    Ok(parent.join(format!(".{name}.tmp")))
}
