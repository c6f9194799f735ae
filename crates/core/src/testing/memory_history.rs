//! In-memory history store double.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::history::{HistoryError, HistoryRecord, HistoryStore};
use crate::scanner::Fingerprint;

#[derive(Default)]
struct Inner {
    records: HashMap<Fingerprint, HistoryRecord>,
    outputs: HashMap<Fingerprint, BTreeSet<String>>,
    paths: HashMap<String, Fingerprint>,
}

/// History store backed by hash maps.
///
/// `fail_writes` turns every mutation into an error, for exercising the
/// degraded-run path.
pub struct MemoryHistory {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), HistoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(HistoryError::Database("simulated write failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock lock poisoned")
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryStore for MemoryHistory {
    fn lookup(&self, fingerprint: &Fingerprint) -> Result<Option<HistoryRecord>, HistoryError> {
        Ok(self.lock().records.get(fingerprint).cloned())
    }

    fn upsert(
        &self,
        fingerprint: &Fingerprint,
        record: &HistoryRecord,
    ) -> Result<(), HistoryError> {
        self.check_writable()?;
        let mut inner = self.lock();
        inner
            .paths
            .insert(record.source_rel_path.clone(), fingerprint.clone());
        inner.records.insert(fingerprint.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError> {
        self.check_writable()?;
        let mut inner = self.lock();
        inner.records.remove(fingerprint);
        inner.outputs.remove(fingerprint);
        inner.paths.retain(|_, fp| fp != fingerprint);
        Ok(())
    }

    fn lookup_path_history(&self, rel_path: &str) -> Result<Option<Fingerprint>, HistoryError> {
        Ok(self.lock().paths.get(rel_path).cloned())
    }

    fn record_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError> {
        self.check_writable()?;
        self.lock()
            .outputs
            .entry(fingerprint.clone())
            .or_default()
            .insert(dest_rel_path.to_string());
        Ok(())
    }

    fn remove_output(
        &self,
        fingerprint: &Fingerprint,
        dest_rel_path: &str,
    ) -> Result<(), HistoryError> {
        self.check_writable()?;
        if let Some(paths) = self.lock().outputs.get_mut(fingerprint) {
            paths.remove(dest_rel_path);
        }
        Ok(())
    }

    fn output_paths(&self) -> Result<Vec<String>, HistoryError> {
        Ok(self
            .lock()
            .outputs
            .values()
            .flat_map(|paths| paths.iter().cloned())
            .collect())
    }

    fn mark_missing(
        &self,
        fingerprint: &Fingerprint,
        when: DateTime<Utc>,
    ) -> Result<(), HistoryError> {
        self.check_writable()?;
        if let Some(record) = self.lock().records.get_mut(fingerprint) {
            if record.missing_since.is_none() {
                record.missing_since = Some(when);
            }
        }
        Ok(())
    }

    fn clear_missing(&self, fingerprint: &Fingerprint) -> Result<(), HistoryError> {
        self.check_writable()?;
        if let Some(record) = self.lock().records.get_mut(fingerprint) {
            record.missing_since = None;
        }
        Ok(())
    }

    fn tracked(&self) -> Result<Vec<(Fingerprint, HistoryRecord)>, HistoryError> {
        Ok(self
            .lock()
            .records
            .iter()
            .map(|(fp, record)| (fp.clone(), record.clone()))
            .collect())
    }
}
