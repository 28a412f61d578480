//! Job status for progress tracking and polling.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Pipeline state of a job.
///
/// `Planning -> Processing -> Aggregating -> Completed`, with `Failed`
/// reachable from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Planning,
    Processing {
        chunks_completed: u32,
        chunks_total: u32,
    },
    Aggregating,
    Completed,
    Failed {
        error: String,
    },
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Planning => "planning",
            JobStatus::Processing { .. } => "processing",
            JobStatus::Aggregating => "aggregating",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Processing {
                chunks_completed,
                chunks_total,
            } => write!(f, "processing ({}/{})", chunks_completed, chunks_total),
            JobStatus::Failed { error } => write!(f, "failed: {}", error),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Point-in-time view of a job for polling clients.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobStatusSnapshot {
    pub job_id: JobId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Sequence number for event ordering (monotonically increasing)
    pub event_seq: u64,
}

impl JobStatusSnapshot {
    pub fn new(job_id: JobId) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            status: JobStatus::Planning,
            created_at: now,
            updated_at: now,
            event_seq: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `status` unless the job already reached a terminal state.
    ///
    /// Returns whether the transition was applied.
    pub fn transition(&mut self, status: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        self.event_seq += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_transitions() {
        let mut snapshot = JobStatusSnapshot::new(JobId::from_string("job-1"));
        assert_eq!(snapshot.status, JobStatus::Planning);

        assert!(snapshot.transition(JobStatus::Processing {
            chunks_completed: 1,
            chunks_total: 3
        }));
        assert_eq!(snapshot.status.to_string(), "processing (1/3)");
        assert!(snapshot.transition(JobStatus::Aggregating));
        assert!(snapshot.transition(JobStatus::Completed));
        assert_eq!(snapshot.event_seq, 3);

        // Terminal states are sticky
        assert!(!snapshot.transition(JobStatus::Aggregating));
        assert_eq!(snapshot.status, JobStatus::Completed);
    }

    #[test]
    fn test_failed_serialization() {
        let status = JobStatus::Failed {
            error: "chunk 2 failed".into(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "FAILED");
        assert_eq!(json["error"], "chunk 2 failed");
        assert!(status.is_terminal());
    }
}
