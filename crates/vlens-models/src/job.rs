//! Analysis job definitions.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ModelTier;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from a caller-assigned string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of analysis a job asks for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Narrative summary of the whole video
    Summary,
    /// Titled, timestamped chapters
    Chapters,
    /// Equipment, topics and people
    Elements,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => "summary",
            AnalysisKind::Chapters => "chapters",
            AnalysisKind::Elements => "elements",
        }
    }

    /// Kinds whose quality depends on narrative continuity across chunks.
    pub fn needs_continuity(&self) -> bool {
        matches!(self, AnalysisKind::Summary | AnalysisKind::Chapters)
    }
}

/// Reference to the uploaded source video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VideoSource {
    /// URI understood by the analysis backend (e.g. a Gemini Files API URI)
    pub uri: String,
    /// MIME type of the source file
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "video/mp4".to_string()
}

impl VideoSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: default_mime_type(),
        }
    }
}

/// One analysis request for one video.
///
/// Immutable once chunk planning starts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct VideoJob {
    /// Caller-assigned job ID
    pub job_id: JobId,

    /// Source video reference
    pub source: VideoSource,

    /// Total video duration in whole seconds
    pub total_duration_seconds: u32,

    /// Model tier to analyze with
    pub model: ModelTier,

    /// Requested analyses
    pub requested_analyses: BTreeSet<AnalysisKind>,

    /// Submission timestamp
    pub created_at: DateTime<Utc>,
}

impl VideoJob {
    /// Create a job with a fresh ID.
    pub fn new(
        source: VideoSource,
        total_duration_seconds: u32,
        model: ModelTier,
        requested_analyses: impl IntoIterator<Item = AnalysisKind>,
    ) -> Self {
        Self {
            job_id: JobId::new(),
            source,
            total_duration_seconds,
            model,
            requested_analyses: requested_analyses.into_iter().collect(),
            created_at: Utc::now(),
        }
    }

    /// Replace the generated ID with a caller-assigned one.
    pub fn with_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn wants(&self, kind: AnalysisKind) -> bool {
        self.requested_analyses.contains(&kind)
    }

    /// Requested kinds that need sequential processing.
    pub fn continuity_kinds(&self) -> BTreeSet<AnalysisKind> {
        self.requested_analyses
            .iter()
            .copied()
            .filter(AnalysisKind::needs_continuity)
            .collect()
    }
}
