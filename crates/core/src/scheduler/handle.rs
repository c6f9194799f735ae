//! Run control handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Shared control surface for a run in progress.
///
/// Pause stalls dispatch of new units; in-flight units finish. Cancel is
/// sticky and also stops dispatch, never aborting in-flight units, so a
/// cancelled run leaves no half-written outputs behind.
#[derive(Clone)]
pub struct RunHandle {
    paused: Arc<watch::Sender<bool>>,
    cancelled: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            paused: Arc::new(paused),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause(&self) {
        let _ = self.paused.send(true);
    }

    pub fn resume(&self) {
        let _ = self.paused.send(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // A paused run must still observe the cancel.
        let _ = self.paused.send(false);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks dispatch until unpaused or cancelled.
    pub(crate) async fn wait_if_paused(&self) {
        let mut rx = self.paused.subscribe();
        while *rx.borrow_and_update() && !self.is_cancelled() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for RunHandle {
    fn default() -> Self {
        Self::new()
    }
}
