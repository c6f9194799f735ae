//! Run orchestration.
//!
//! Ties the pieces together: scan the source tree, load tracked state,
//! plan, resolve destination paths, execute. [`LibraryRunner::build_plan`]
//! alone is the dry-run mode; it performs reads only.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, StateBackend};
use crate::dest_index::{DestIndex, DestIndexBuilder, IndexError};
use crate::encoder::{Encoder, EncoderError};
use crate::history::{HistoryError, HistoryStore};
use crate::paths::{replace_extension, resolve_paths, split_extension};
use crate::planner::{self, Action, Plan, Reason};
use crate::provenance::ProvenanceCodec;
use crate::scanner::{ScanError, Scanner};
use crate::scheduler::{Outcome, RunContext, RunHandle, RunSummary, Scheduler};
use crate::state::{HistoryStateProvider, IndexStateProvider, StateProvider};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("encoder not usable: {0}")]
    Encoder(#[from] EncoderError),

    #[error("could not prepare destination root: {0}")]
    DestRoot(std::io::Error),
}

/// Drives complete mirror runs for one configured library.
pub struct LibraryRunner {
    config: Config,
    encoder: Arc<dyn Encoder>,
    codec: Arc<dyn ProvenanceCodec>,
    history: Arc<dyn HistoryStore>,
}

impl LibraryRunner {
    pub fn new(
        config: Config,
        encoder: Arc<dyn Encoder>,
        codec: Arc<dyn ProvenanceCodec>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            config,
            encoder,
            codec,
            history,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Scans, loads state and plans. Read-only; this is what a dry run
    /// shows.
    pub async fn build_plan(&self) -> Result<Plan, RunError> {
        self.config.validate()?;
        let opts = self.config.plan_options(self.encoder.id());

        let scanner = Scanner::new(
            self.config.run.fingerprinting,
            self.config.run.sync_tags,
            self.config.run.workers,
        );
        let sources = scanner.scan(&self.config.source.root).await?;
        info!(files = sources.len(), "source scan complete");

        let provider = self.load_state().await?;
        let mut plan = planner::plan(sources, provider.as_ref(), &opts, Utc::now());
        assign_dest_paths(&mut plan, provider.as_ref(), &self.config);
        Ok(plan)
    }

    /// Runs the full mirror cycle and streams outcomes as units finish.
    pub async fn run(
        &self,
        handle: &RunHandle,
        outcome_tx: mpsc::Sender<Outcome>,
    ) -> Result<RunSummary, RunError> {
        self.config.validate()?;
        self.encoder.validate().await?;
        tokio::fs::create_dir_all(&self.config.dest.root)
            .await
            .map_err(RunError::DestRoot)?;

        let plan = self.build_plan().await?;
        let bookkeeping_degraded = self.update_missing_clocks(&plan);

        let scheduler = Scheduler::new(
            Arc::clone(&self.encoder),
            Arc::clone(&self.codec),
            Arc::clone(&self.history),
            self.config.run.workers,
        );
        let ctx = RunContext {
            dest_root: self.config.dest.root.clone(),
            quality: self.config.quality(),
        };

        let mut summary = scheduler.execute(plan.items, &ctx, handle, outcome_tx).await;
        summary.degraded |= bookkeeping_degraded;
        info!(
            status = ?summary.status,
            degraded = summary.degraded,
            "run finished"
        );
        Ok(summary)
    }

    async fn load_state(&self) -> Result<Box<dyn StateProvider>, RunError> {
        match self.config.run.state_backend {
            StateBackend::History => {
                let provider = HistoryStateProvider::load(&self.history)?;
                Ok(Box::new(provider))
            }
            StateBackend::DestIndex => {
                let index = if self.config.dest.root.exists() {
                    DestIndexBuilder::new(Arc::clone(&self.codec), self.config.run.workers)
                        .build(&self.config.dest.root)
                        .await?
                } else {
                    DestIndex::default()
                };
                info!(entries = index.len(), "destination index built");
                Ok(Box::new(IndexStateProvider::from_index(&index)))
            }
        }
    }

    /// Starts and stops grace-period clocks. Failures degrade the run, they
    /// never block it.
    fn update_missing_clocks(&self, plan: &Plan) -> bool {
        let now = Utc::now();
        let mut degraded = false;
        for fp in &plan.missing {
            if let Err(e) = self.history.mark_missing(fp, now) {
                warn!("could not mark {fp} missing: {e}");
                degraded = true;
            }
        }
        for fp in &plan.reappeared {
            if let Err(e) = self.history.clear_missing(fp) {
                warn!("could not clear missing flag on {fp}: {e}");
                degraded = true;
            }
        }
        degraded
    }
}

/// Assigns destination paths to items the planner left unresolved: fresh
/// converts and renames. Occupied paths come from tracked state, minus
/// paths this very plan vacates.
fn assign_dest_paths(plan: &mut Plan, provider: &dyn StateProvider, config: &Config) {
    let mut existing = provider.known_dest_paths();
    for item in &plan.items {
        if let Some(from) = &item.rename_from {
            existing.remove(from);
        }
        if let Some(stale) = &item.stale_dest_rel_path {
            existing.remove(stale);
        }
    }

    let target_ext = config.encoding.format.extension();
    let mut unresolved: Vec<usize> = Vec::new();
    let mut candidates: Vec<String> = Vec::new();

    for (i, item) in plan.items.iter().enumerate() {
        if item.dest_rel_path.is_some() || !item.action.is_executable() {
            continue;
        }
        let Some(source) = &item.source else {
            continue;
        };
        let candidate = match item.action {
            Action::Convert => replace_extension(&source.rel_path, target_ext),
            Action::Rename => {
                // A rename keeps the output's container.
                let ext = item
                    .rename_from
                    .as_deref()
                    .and_then(|p| split_extension(p).1)
                    .unwrap_or(target_ext);
                replace_extension(&source.rel_path, ext)
            }
            _ => continue,
        };
        unresolved.push(i);
        candidates.push(candidate);
    }

    let resolved = resolve_paths(&candidates, &existing);
    for (slot, path) in unresolved.into_iter().zip(resolved) {
        plan.items[slot].dest_rel_path = Some(path);
    }

    // A rename whose resolved target equals its origin is a no-op; the
    // output is already where it belongs.
    for item in &mut plan.items {
        if item.action == Action::Rename && item.dest_rel_path == item.rename_from {
            item.action = Action::Skip;
            item.reason = Reason::UpToDate;
            item.rename_from = None;
        }
    }
}
