//! Worker configuration.

use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};
use crate::retry::BackoffPolicy;

/// Upper bound on parallel in-flight chunk calls per job.
///
/// Backoff is the only admission control against the provider's rate
/// limit, so parallel fan-out stays small.
pub const MAX_PARALLEL_CHUNKS_CAP: usize = 5;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Parallel in-flight chunk calls per job (element extraction only)
    pub max_parallel_chunks: usize,
    /// Timeout for one remote call attempt
    pub chunk_timeout: Duration,
    /// Timeout for the whole job, processing and aggregation
    pub job_timeout: Duration,
    /// Overlap margin as a fraction of the chunk duration
    pub overlap_fraction: f64,
    /// Remote call attempts per chunk, including the first
    pub retry_max_attempts: u32,
    /// Base delay for exponential backoff
    pub retry_base_delay: Duration,
    /// Maximum delay between attempts
    pub retry_max_delay: Duration,
    /// Character budget of the carry-forward context between chunks
    pub context_chars: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_parallel_chunks: 3,
            chunk_timeout: Duration::from_secs(600),
            job_timeout: Duration::from_secs(7200),
            overlap_fraction: 0.10,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(2000),
            retry_max_delay: Duration::from_secs(60),
            context_chars: 1200,
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            max_parallel_chunks: env_or("VLENS_MAX_PARALLEL_CHUNKS", defaults.max_parallel_chunks),
            chunk_timeout: Duration::from_secs(env_or(
                "VLENS_CHUNK_TIMEOUT_SECS",
                defaults.chunk_timeout.as_secs(),
            )),
            job_timeout: Duration::from_secs(env_or(
                "VLENS_JOB_TIMEOUT_SECS",
                defaults.job_timeout.as_secs(),
            )),
            overlap_fraction: env_or("VLENS_OVERLAP_FRACTION", defaults.overlap_fraction),
            retry_max_attempts: env_or("VLENS_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_base_delay: Duration::from_millis(env_or(
                "VLENS_RETRY_BASE_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )),
            retry_max_delay: Duration::from_millis(env_or(
                "VLENS_RETRY_MAX_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )),
            context_chars: env_or("VLENS_CONTEXT_CHARS", defaults.context_chars),
        };
        config.validate()
    }

    /// Reject inconsistent settings and clamp parallelism into `1..=5`.
    pub fn validate(mut self) -> WorkerResult<Self> {
        if !(0.0..0.5).contains(&self.overlap_fraction) {
            return Err(WorkerError::config_error(format!(
                "overlap fraction {} outside [0, 0.5)",
                self.overlap_fraction
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(WorkerError::config_error("retry attempts must be at least 1"));
        }
        if self.chunk_timeout.is_zero() || self.job_timeout.is_zero() {
            return Err(WorkerError::config_error("timeouts must be non-zero"));
        }
        self.max_parallel_chunks = self.max_parallel_chunks.clamp(1, MAX_PARALLEL_CHUNKS_CAP);
        Ok(self)
    }

    /// Backoff policy for remote calls, with random jitter.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.retry_max_attempts)
            .with_base_delay(self.retry_base_delay)
            .with_max_delay(self.retry_max_delay)
            .with_attempt_timeout(self.chunk_timeout)
    }
}
