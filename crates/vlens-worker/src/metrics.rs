//! Pipeline metrics.
//!
//! Recording is a no-op until a recorder is installed; the binary installs
//! a Prometheus recorder via [`init_metrics`].

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use vlens_models::{ErrorClass, TokenUsage};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Chunk analysis calls by outcome (succeeded/failed).
    pub const CHUNK_CALLS_TOTAL: &str = "vlens_chunk_calls_total";

    /// Retry attempts by error class.
    pub const CHUNK_RETRIES_TOTAL: &str = "vlens_chunk_retries_total";

    /// Tokens billed by direction (input/output).
    pub const TOKENS_TOTAL: &str = "vlens_tokens_total";

    /// Finished jobs by outcome (completed/failed).
    pub const JOBS_TOTAL: &str = "vlens_jobs_total";

    /// Wall-clock job duration in seconds.
    pub const JOB_DURATION_SECONDS: &str = "vlens_job_duration_seconds";
}

/// Install the Prometheus recorder.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record the final outcome of one chunk call.
pub fn record_chunk_call(success: bool) {
    let outcome = if success { "succeeded" } else { "failed" };
    counter!(names::CHUNK_CALLS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a retry attempt.
pub fn record_retry(class: ErrorClass) {
    counter!(names::CHUNK_RETRIES_TOTAL, "class" => class.as_str()).increment(1);
}

/// Record billed tokens.
pub fn record_tokens(usage: TokenUsage) {
    counter!(names::TOKENS_TOTAL, "direction" => "input").increment(usage.input_tokens);
    counter!(names::TOKENS_TOTAL, "direction" => "output").increment(usage.output_tokens);
}

/// Record a finished job.
pub fn record_job(success: bool, duration_secs: f64) {
    let outcome = if success { "completed" } else { "failed" };
    counter!(names::JOBS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "outcome" => outcome).record(duration_secs);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::CHUNK_CALLS_TOTAL.starts_with("vlens_"));
        assert!(names::CHUNK_RETRIES_TOTAL.contains("retries"));
        assert!(names::JOB_DURATION_SECONDS.ends_with("_seconds"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_chunk_call(true);
        record_retry(ErrorClass::RateLimited);
        record_tokens(TokenUsage::new(10, 5));
        record_job(false, 1.5);
    }
}
