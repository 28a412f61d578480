//! Collaborator contracts driven by the pipeline.

use async_trait::async_trait;
use vlens_models::{ModelTier, VideoSource};

use crate::error::AnalysisResult;
use crate::types::{AnalysisRequest, AnalysisResponse, ContentHandle};

/// Remote multimodal model.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Analyze a video range according to `request.instructions`.
    async fn invoke_analysis(&self, request: &AnalysisRequest) -> AnalysisResult<AnalysisResponse>;

    /// Text-only call used to synthesize a job summary from chunk summaries.
    async fn invoke_text_synthesis(
        &self,
        model: ModelTier,
        prompt: &str,
    ) -> AnalysisResult<AnalysisResponse>;
}

/// Turns a time range of a source video into something the backend accepts.
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract_media_range(
        &self,
        source: &VideoSource,
        start_seconds: u32,
        end_seconds: u32,
    ) -> AnalysisResult<ContentHandle>;
}
