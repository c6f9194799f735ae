//! In-memory encoder double.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::encoder::{EncodeJob, EncodeOutcome, Encoder, EncoderError};

/// Encoder that writes placeholder bytes instead of transcoding.
///
/// Records every job it receives and tracks how many encodes ran at once,
/// so tests can assert on dispatch behavior.
pub struct MockEncoder {
    jobs: Mutex<Vec<EncodeJob>>,
    fail_suffixes: Mutex<Vec<String>>,
    delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockEncoder {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail_suffixes: Mutex::new(Vec::new()),
            delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Makes encodes fail for any input path ending in `suffix`.
    pub fn fail_on(&self, suffix: &str) {
        self.fail_suffixes
            .lock()
            .expect("mock lock poisoned")
            .push(suffix.to_string());
    }

    /// Adds an artificial per-encode delay.
    pub fn set_delay_ms(&self, ms: u64) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Successfully completed jobs, in completion order.
    pub fn jobs(&self) -> Vec<EncodeJob> {
        self.jobs.lock().expect("mock lock poisoned").clone()
    }

    /// Highest number of encodes observed running at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn should_fail(&self, job: &EncodeJob) -> bool {
        let input = job.input_path.to_string_lossy();
        self.fail_suffixes
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .any(|s| input.ends_with(s.as_str()))
    }
}

impl Default for MockEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Encoder for MockEncoder {
    fn id(&self) -> &str {
        "mock-encoder"
    }

    async fn encode(&self, job: EncodeJob) -> Result<EncodeOutcome, EncoderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        }

        let result = if self.should_fail(&job) {
            Err(EncoderError::encode_failed("mock failure", None))
        } else {
            if let Some(parent) = job.output_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let body = format!(
                "encoded:{}:{}",
                job.input_path.display(),
                job.quality.spec()
            );
            tokio::fs::write(&job.output_path, body.as_bytes()).await?;
            self.jobs
                .lock()
                .expect("mock lock poisoned")
                .push(job.clone());
            Ok(EncodeOutcome {
                output_path: job.output_path.clone(),
                output_size_bytes: body.len() as u64,
                duration_ms: delay,
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn validate(&self) -> Result<(), EncoderError> {
        Ok(())
    }
}
