//! Request/response types of the remote analysis contract.

use serde::{Deserialize, Serialize};
use vlens_models::{ModelTier, TokenUsage};

/// Reference to a sub-range of a source video, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHandle {
    pub uri: String,
    pub mime_type: String,
    /// Offset into the source where the clip starts
    pub start_offset_seconds: u32,
    /// Offset into the source where the clip ends
    pub end_offset_seconds: u32,
}

impl ContentHandle {
    pub fn duration_seconds(&self) -> u32 {
        self.end_offset_seconds
            .saturating_sub(self.start_offset_seconds)
    }
}

/// One multimodal analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub model: ModelTier,
    pub content: ContentHandle,
    pub instructions: String,
    pub max_output_tokens: u32,
}

/// Text returned by the model plus the usage it was billed for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisResponse {
    pub text: String,
    pub usage: TokenUsage,
}

impl AnalysisResponse {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }

    /// Response text with a surrounding markdown code fence removed.
    pub fn json_body(&self) -> &str {
        strip_code_fence(&self.text)
    }
}

/// Remove a ```` ```json ```` / ```` ``` ```` fence around model output.
pub fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}
