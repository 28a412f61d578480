//! Shared data models for the VideoLens pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis jobs and the model tiers they run against
//! - Chunk descriptors and per-chunk results
//! - Chapters and element/topic/people detections
//! - Job-level results and status snapshots
//! - Timestamp parsing for model output

pub mod chapter;
pub mod chunk;
pub mod element;
pub mod job;
pub mod job_status;
pub mod model_tier;
pub mod result;
pub mod timestamp;

// Re-export common types
pub use chapter::Chapter;
pub use chunk::{ChunkDescriptor, ChunkError, ChunkPayload, ChunkResult, ErrorClass};
pub use element::{
    normalize_key, ElementsPayload, EquipmentDetection, Importance, PeopleSummary, SpeakerSegment,
    TimeRange, TopicDetection,
};
pub use job::{AnalysisKind, JobId, VideoJob, VideoSource};
pub use job_status::{JobStatus, JobStatusSnapshot};
pub use model_tier::{ModelTier, UnsupportedModelError};
pub use result::{JobMetadata, JobResult, TokenUsage};
