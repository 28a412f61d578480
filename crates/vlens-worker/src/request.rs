//! Job request accepted by the worker binary.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use vlens_models::{AnalysisKind, JobId, ModelTier, VideoJob, VideoSource};

use crate::error::WorkerResult;

fn default_mime_type() -> String {
    "video/mp4".to_string()
}

/// Submission payload: `{video_reference, total_duration_seconds, model, requested_analyses}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Caller-assigned ID; generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    /// URI of the uploaded video (e.g. a Gemini Files API URI)
    pub video_uri: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub total_duration_seconds: u32,
    /// Model API id, e.g. `gemini-2.5-flash`
    pub model: String,
    pub requested_analyses: BTreeSet<AnalysisKind>,
}

impl JobRequest {
    /// Resolve the model and build the job.
    pub fn into_job(self) -> WorkerResult<VideoJob> {
        let model: ModelTier = self.model.parse()?;
        let source = VideoSource {
            uri: self.video_uri,
            mime_type: self.mime_type,
        };
        let job = VideoJob::new(
            source,
            self.total_duration_seconds,
            model,
            self.requested_analyses,
        );
        Ok(match self.job_id {
            Some(id) => job.with_id(JobId::from_string(id)),
            None => job,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkerError;

    #[test]
    fn test_request_into_job() {
        let request: JobRequest = serde_json::from_str(
            r#"{
                "job_id": "job-7",
                "video_uri": "https://generativelanguage.googleapis.com/v1beta/files/abc",
                "total_duration_seconds": 3600,
                "model": "gemini-2.5-pro",
                "requested_analyses": ["summary", "elements"]
            }"#,
        )
        .unwrap();

        let job = request.into_job().unwrap();
        assert_eq!(job.job_id.as_str(), "job-7");
        assert_eq!(job.model, ModelTier::Gemini25Pro);
        assert_eq!(job.source.mime_type, "video/mp4");
        assert!(job.wants(AnalysisKind::Elements));
        assert!(!job.wants(AnalysisKind::Chapters));
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let request = JobRequest {
            job_id: None,
            video_uri: "files/abc".into(),
            mime_type: default_mime_type(),
            total_duration_seconds: 60,
            model: "claude-vision".into(),
            requested_analyses: BTreeSet::from([AnalysisKind::Summary]),
        };
        assert_eq!(
            request.into_job().unwrap_err(),
            WorkerError::UnsupportedModel("claude-vision".into())
        );
    }
}
