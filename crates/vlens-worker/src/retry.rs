//! Backoff policy for remote model calls.
//!
//! Transient errors (rate limiting, model warm-up, per-attempt timeouts) are
//! retried with exponential backoff plus jitter up to a fixed attempt
//! ceiling. Permanent errors fail on the first attempt. Sleeping and jitter
//! are injected so the policy can be exercised without real delays.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info_span, warn, Instrument};
use vlens_ai_client::AnalysisError;

use crate::metrics::record_retry;

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real-time sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

/// Maps a capped backoff delay to the delay actually slept.
pub type JitterFn = Arc<dyn Fn(Duration) -> Duration + Send + Sync>;

/// Equal jitter: half the delay fixed, half random.
fn equal_jitter(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = half.as_millis() as u64;
    let extra = if spread > 0 {
        rand::rng().random_range(0..=spread)
    } else {
        0
    };
    half + Duration::from_millis(extra)
}

/// Retry configuration for remote calls.
#[derive(Clone)]
pub struct BackoffPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
    /// Cap on the computed delay (provider Retry-After is honored as sent).
    pub max_delay: Duration,
    /// Per-attempt timeout, surfaced as a transient error.
    pub attempt_timeout: Option<Duration>,
    jitter: JitterFn,
    sleeper: Arc<dyn Sleeper>,
}

impl fmt::Debug for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(60),
            attempt_timeout: None,
            jitter: Arc::new(equal_jitter),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = jitter;
        self
    }

    /// Deterministic delays, for tests and replay.
    pub fn without_jitter(self) -> Self {
        self.with_jitter(Arc::new(|d| d))
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Delay after the `attempt`-th failed attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32, retry_after_ms: Option<u64>) -> Duration {
        if let Some(after) = retry_after_ms {
            return Duration::from_millis(after);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        (self.jitter)(delay)
    }
}

/// Result of a retried remote call.
#[derive(Debug)]
pub enum RetryResult<T> {
    /// Operation succeeded.
    Success { value: T, attempts: u32 },
    /// Permanent error, or transient error after the attempt ceiling.
    Failed { error: AnalysisError, attempts: u32 },
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            RetryResult::Success { attempts, .. } | RetryResult::Failed { attempts, .. } => *attempts,
        }
    }

    pub fn into_result(self) -> Result<T, AnalysisError> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Execute a remote call under `policy`.
pub async fn retry_remote<F, Fut, T>(policy: &BackoffPolicy, operation: &str, op: F) -> RetryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AnalysisError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let span = info_span!("remote_call", operation = %operation, attempt);

        let outcome = match policy.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, op()).instrument(span).await {
                Ok(result) => result,
                Err(_) => Err(AnalysisError::Timeout(format!(
                    "no response within {}s",
                    limit.as_secs_f64()
                ))),
            },
            None => op().instrument(span).await,
        };

        match outcome {
            Ok(value) => {
                return RetryResult::Success {
                    value,
                    attempts: attempt,
                }
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt, e.retry_after_ms());
                warn!(
                    operation = %operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Transient remote error, retrying: {}",
                    e
                );
                record_retry(e.class());
                policy.sleeper.sleep(delay).await;
            }
            Err(e) => {
                debug!(
                    operation = %operation,
                    attempt,
                    transient = e.is_transient(),
                    "Remote call failed for good: {}",
                    e
                );
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(sleeper: Arc<RecordingSleeper>) -> BackoffPolicy {
        BackoffPolicy::new(3)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(250))
            .without_jitter()
            .with_sleeper(sleeper)
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy(Arc::new(RecordingSleeper::new()));
        assert_eq!(policy.delay_for_attempt(1, None), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2, None), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3, None), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(40, None), Duration::from_millis(250));
    }

    #[test]
    fn test_retry_after_is_honored() {
        let policy = policy(Arc::new(RecordingSleeper::new()));
        assert_eq!(policy.delay_for_attempt(1, Some(5000)), Duration::from_millis(5000));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        for _ in 0..100 {
            let d = equal_jitter(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_ceiling() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = policy(sleeper.clone());
        let calls = AtomicU32::new(0);

        let result: RetryResult<()> = retry_remote(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(AnalysisError::RateLimited {
                    retry_after_ms: None,
                })
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts(), 3);
        assert!(matches!(
            result,
            RetryResult::Failed {
                error: AnalysisError::RateLimited { .. },
                attempts: 3
            }
        ));
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_permanent_error_fails_immediately() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = policy(sleeper.clone());
        let calls = AtomicU32::new(0);

        let result: RetryResult<()> = retry_remote(&policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AnalysisError::Unauthorized("bad key".into())) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!result.is_success());
        assert!(sleeper.delays().is_empty());
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = policy(sleeper.clone());
        let calls = AtomicU32::new(0);

        let result = retry_remote(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AnalysisError::ModelWarming("cold".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.attempts(), 2);
        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(sleeper.delays().len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retried() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = policy(sleeper.clone()).with_attempt_timeout(Duration::from_millis(20));
        let calls = AtomicU32::new(0);

        let result = retry_remote(&policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, AnalysisError>("done")
            }
        })
        .await;

        assert_eq!(result.attempts(), 2);
        assert_eq!(result.into_result().unwrap(), "done");
    }
}
