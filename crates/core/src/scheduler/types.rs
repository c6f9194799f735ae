//! Execution result types.

use std::collections::BTreeMap;

use crate::planner::Action;

/// Terminal status of one dispatched or reported unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Succeeded,
    Failed,
    Skipped,
    Held,
}

/// Result of one plan item, streamed to the caller as units finish.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub action: Action,
    pub status: OutcomeStatus,
    pub reason: String,
    pub source_rel_path: Option<String>,
    pub dest_rel_path: Option<String>,
    pub error: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Aggregate counters for one run.
#[derive(Debug)]
pub struct RunSummary {
    pub status: RunStatus,

    /// Items planned, per action label. Includes skips and holds.
    pub planned: BTreeMap<String, u64>,
    pub succeeded: BTreeMap<String, u64>,
    pub failed: BTreeMap<String, u64>,

    /// Plan reasons, per reason label.
    pub reasons: BTreeMap<String, u64>,

    /// Executable items never dispatched because the run was cancelled.
    pub not_dispatched: u64,

    /// Set when an action landed but its history write failed. Outputs and
    /// history may disagree until the next run reconciles them.
    pub degraded: bool,

    /// Failed units, in completion order.
    pub failures: Vec<Outcome>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            status: RunStatus::Completed,
            planned: BTreeMap::new(),
            succeeded: BTreeMap::new(),
            failed: BTreeMap::new(),
            reasons: BTreeMap::new(),
            not_dispatched: 0,
            degraded: false,
            failures: Vec::new(),
        }
    }

    pub fn record_planned(&mut self, action: Action, reason_label: String) {
        *self.planned.entry(action.label().to_string()).or_default() += 1;
        *self.reasons.entry(reason_label).or_default() += 1;
    }

    pub fn record(&mut self, outcome: &Outcome) {
        let key = outcome.action.label().to_string();
        match outcome.status {
            OutcomeStatus::Succeeded | OutcomeStatus::Skipped | OutcomeStatus::Held => {
                *self.succeeded.entry(key).or_default() += 1;
            }
            OutcomeStatus::Failed => {
                *self.failed.entry(key).or_default() += 1;
                self.failures.push(outcome.clone());
            }
        }
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
