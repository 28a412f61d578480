//! In-process job status and results surface.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};
use vlens_models::{JobId, JobResult, JobStatus, JobStatusSnapshot, VideoJob};

#[derive(Debug)]
struct JobEntry {
    snapshot: JobStatusSnapshot,
    result: Option<JobResult>,
}

/// Tracks every submitted job through the pipeline states.
///
/// A result is only stored together with the COMPLETED transition, so a
/// failed job never exposes chapters or elements.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job in PLANNING. Re-submitting a known ID keeps the
    /// existing entry.
    pub async fn submit(&self, job: &VideoJob) -> JobId {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            warn!(job_id = %job.job_id, "Job already registered");
        } else {
            jobs.insert(
                job.job_id.clone(),
                JobEntry {
                    snapshot: JobStatusSnapshot::new(job.job_id.clone()),
                    result: None,
                },
            );
        }
        job.job_id.clone()
    }

    pub async fn status(&self, job_id: &JobId) -> Option<JobStatusSnapshot> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.snapshot.clone())
    }

    /// Result of a COMPLETED job.
    pub async fn result(&self, job_id: &JobId) -> Option<JobResult> {
        let jobs = self.jobs.read().await;
        let entry = jobs.get(job_id)?;
        match entry.snapshot.status {
            JobStatus::Completed => entry.result.clone(),
            _ => None,
        }
    }

    /// Move a job to a non-terminal state. Returns whether it was applied.
    pub async fn update(&self, job_id: &JobId, status: JobStatus) -> bool {
        if status.is_terminal() {
            warn!(job_id = %job_id, "Terminal states go through complete/fail");
            return false;
        }
        self.transition(job_id, status, None).await
    }

    pub async fn complete(&self, job_id: &JobId, result: JobResult) -> bool {
        self.transition(job_id, JobStatus::Completed, Some(result))
            .await
    }

    pub async fn fail(&self, job_id: &JobId, error: impl ToString) -> bool {
        self.transition(
            job_id,
            JobStatus::Failed {
                error: error.to_string(),
            },
            None,
        )
        .await
    }

    async fn transition(&self, job_id: &JobId, status: JobStatus, result: Option<JobResult>) -> bool {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            warn!(job_id = %job_id, "Status update for unknown job");
            return false;
        };
        debug!(job_id = %job_id, from = %entry.snapshot.status, to = %status, "Job transition");
        if !entry.snapshot.transition(status) {
            return false;
        }
        entry.result = result;
        true
    }
}
