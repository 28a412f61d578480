//! Gemini client for video range analysis and text synthesis.
//!
//! Video ranges are not cut locally: the uploaded file is referenced by URI
//! and clipped server-side through `videoMetadata` start/end offsets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vlens_models::{ModelTier, TokenUsage, VideoSource};

use crate::backend::{AnalysisBackend, MediaExtractor};
use crate::error::{AnalysisError, AnalysisResult};
use crate::types::{AnalysisRequest, AnalysisResponse, ContentHandle};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const SYNTHESIS_MAX_OUTPUT_TOKENS: u32 = 8192;

const JSON_MIME_TYPE: &str = "application/json";
const TEXT_MIME_TYPE: &str = "text/plain";

/// Gemini connection settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    /// Scheme and host, without the `/v1beta` path
    pub api_base: String,
    /// Transport-level timeout for a single HTTP call
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(900),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> AnalysisResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| AnalysisError::Unauthorized("GEMINI_API_KEY not set".to_string()))?;

        let mut config = Self::new(api_key);
        if let Ok(base) = std::env::var("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(secs) = std::env::var("GEMINI_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

/// Gemini API client.
pub struct GeminiClient {
    config: GeminiConfig,
    client: Client,
}

/// Gemini API request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    #[serde(rename_all = "camelCase")]
    File {
        file_data: FileData,
        video_metadata: VideoMetadata,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoMetadata {
    start_offset: String,
    end_offset: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    max_output_tokens: u32,
    temperature: f32,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    thoughts_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> AnalysisResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AnalysisError::unknown(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create a client from `GEMINI_*` environment variables.
    pub fn from_env() -> AnalysisResult<Self> {
        Self::new(GeminiConfig::from_env()?)
    }

    fn endpoint(&self, model: ModelTier) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base,
            model.as_str()
        )
    }

    /// Call Gemini API. `response_mime_type` selects JSON mode for chunk
    /// analysis and plain prose for synthesis.
    async fn generate(
        &self,
        model: ModelTier,
        parts: Vec<Part>,
        max_output_tokens: u32,
        response_mime_type: &'static str,
    ) -> AnalysisResult<AnalysisResponse> {
        let request = GeminiRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig {
                response_mime_type,
                max_output_tokens,
                temperature: 0.2,
            },
        };

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::from_http_status(
                status.as_u16(),
                &body,
                retry_after_ms,
            ));
        }

        let body: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::malformed(format!("Failed to parse Gemini response: {}", e)))?;

        let usage = body
            .usage_metadata
            .as_ref()
            .map(|u| {
                TokenUsage::new(
                    u.prompt_token_count,
                    u.candidates_token_count + u.thoughts_token_count,
                )
            })
            .unwrap_or_default();

        if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(AnalysisError::invalid_request(format!(
                "Prompt blocked: {}",
                reason
            )));
        }

        let candidate = body
            .candidates
            .first()
            .ok_or_else(|| AnalysisError::malformed("No candidates in Gemini response"))?;

        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| &c.parts)
            .filter(|p| !p.thought)
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.trim().is_empty() {
            return Err(AnalysisError::malformed(format!(
                "Empty Gemini response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        debug!(
            model = %model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Gemini call succeeded"
        );

        Ok(AnalysisResponse::new(text, usage))
    }
}

#[async_trait]
impl AnalysisBackend for GeminiClient {
    async fn invoke_analysis(&self, request: &AnalysisRequest) -> AnalysisResult<AnalysisResponse> {
        let content = &request.content;
        info!(
            model = %request.model,
            uri = %content.uri,
            start = content.start_offset_seconds,
            end = content.end_offset_seconds,
            "Submitting video range to Gemini"
        );

        let parts = vec![
            Part::File {
                file_data: FileData {
                    mime_type: content.mime_type.clone(),
                    file_uri: content.uri.clone(),
                },
                video_metadata: VideoMetadata {
                    start_offset: format!("{}s", content.start_offset_seconds),
                    end_offset: format!("{}s", content.end_offset_seconds),
                },
            },
            Part::Text {
                text: request.instructions.clone(),
            },
        ];

        self.generate(request.model, parts, request.max_output_tokens, JSON_MIME_TYPE)
            .await
    }

    async fn invoke_text_synthesis(
        &self,
        model: ModelTier,
        prompt: &str,
    ) -> AnalysisResult<AnalysisResponse> {
        let parts = vec![Part::Text {
            text: prompt.to_string(),
        }];
        let max_output_tokens = SYNTHESIS_MAX_OUTPUT_TOKENS.min(model.max_output_tokens());
        self.generate(model, parts, max_output_tokens, TEXT_MIME_TYPE)
            .await
    }
}

/// Media extractor that references the uploaded file with clip offsets.
#[derive(Debug, Clone, Default)]
pub struct OffsetClipExtractor;

#[async_trait]
impl MediaExtractor for OffsetClipExtractor {
    async fn extract_media_range(
        &self,
        source: &VideoSource,
        start_seconds: u32,
        end_seconds: u32,
    ) -> AnalysisResult<ContentHandle> {
        if end_seconds <= start_seconds {
            return Err(AnalysisError::invalid_request(format!(
                "Empty media range [{}, {})",
                start_seconds, end_seconds
            )));
        }
        if source.uri.trim().is_empty() {
            return Err(AnalysisError::invalid_request("Video source URI is empty"));
        }

        Ok(ContentHandle {
            uri: source.uri.clone(),
            mime_type: source.mime_type.clone(),
            start_offset_seconds: start_seconds,
            end_offset_seconds: end_seconds,
        })
    }
}
