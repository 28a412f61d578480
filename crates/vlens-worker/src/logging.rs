//! Structured job logging.
//!
//! Every event of an analysis job carries the job ID and model; chunk
//! events add `chunk_index` so a single chunk can be followed through
//! retries, completion and failure.

use tracing::{error, info, warn, Span};
use vlens_models::{ChunkDescriptor, ChunkError, JobId, JobResult, ModelTier, VideoJob};

use crate::error::WorkerError;

/// Logger bound to one analysis job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: JobId,
    model: ModelTier,
    total_duration_seconds: u32,
}

impl JobLogger {
    pub fn for_job(job: &VideoJob) -> Self {
        Self {
            job_id: job.job_id.clone(),
            model: job.model,
            total_duration_seconds: job.total_duration_seconds,
        }
    }

    pub fn log_start(&self, analyses: usize) {
        info!(
            job_id = %self.job_id,
            model = %self.model,
            duration_seconds = self.total_duration_seconds,
            analyses,
            "Job started"
        );
    }

    /// Chunk plan and the execution mode chosen for it.
    pub fn log_planned(&self, chunk_count: usize, mode: &str, total_calls: u32) {
        info!(
            job_id = %self.job_id,
            chunks = chunk_count,
            mode,
            total_calls,
            "Job planned"
        );
    }

    pub fn log_chunk_done(&self, chunk: &ChunkDescriptor, completed: u32, total: u32) {
        info!(
            job_id = %self.job_id,
            chunk_index = chunk.index,
            core_start = chunk.core_start_seconds,
            core_end = chunk.core_end_seconds,
            completed,
            total,
            "Chunk done"
        );
    }

    /// A failed chunk aborts the whole job.
    pub fn log_chunk_failed(&self, error: &ChunkError, chunk_index: u32) {
        warn!(
            job_id = %self.job_id,
            chunk_index,
            class = %error.class,
            attempts = error.attempts,
            "Chunk failed, aborting job: {}", error.message
        );
    }

    pub fn log_completion(&self, result: &JobResult, elapsed_seconds: f64) {
        info!(
            job_id = %self.job_id,
            chunks = result.metadata.chunk_count,
            chapters = result.chapters.len(),
            total_tokens = result.metadata.total_tokens,
            elapsed_seconds,
            "Job completed"
        );
    }

    pub fn log_failure(&self, err: &WorkerError, elapsed_seconds: f64) {
        error!(
            job_id = %self.job_id,
            planning = err.is_planning_error(),
            class = ?err.error_class(),
            elapsed_seconds,
            "Job failed: {}", err
        );
    }

    /// Span wrapping every event of the job.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "analysis_job",
            job_id = %self.job_id,
            model = %self.model
        )
    }
}
