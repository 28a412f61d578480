//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use vlens_ai_client::{AnalysisBackend, AnalysisRequest, AnalysisResponse, AnalysisResult};
use vlens_models::{AnalysisKind, ModelTier, TokenUsage, VideoJob, VideoSource};

type AnalysisScript = dyn Fn(&AnalysisRequest, u32) -> AnalysisResult<AnalysisResponse> + Send + Sync;
type SynthesisScript = dyn Fn(&str) -> AnalysisResult<AnalysisResponse> + Send + Sync;

/// Backend answering from closures. The analysis closure gets the request
/// and the 0-based call number.
pub struct ScriptedBackend {
    analysis: Box<AnalysisScript>,
    synthesis: Box<SynthesisScript>,
    calls: AtomicU32,
    requests: Mutex<Vec<AnalysisRequest>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(
        analysis: impl Fn(&AnalysisRequest, u32) -> AnalysisResult<AnalysisResponse> + Send + Sync + 'static,
    ) -> Self {
        Self {
            analysis: Box::new(analysis),
            synthesis: Box::new(|_| Ok(AnalysisResponse::new("Synthesized summary", TokenUsage::new(50, 10)))),
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_synthesis(
        mut self,
        synthesis: impl Fn(&str) -> AnalysisResult<AnalysisResponse> + Send + Sync + 'static,
    ) -> Self {
        self.synthesis = Box::new(synthesis);
        self
    }

    pub fn analysis_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn synthesis_prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn invoke_analysis(&self, request: &AnalysisRequest) -> AnalysisResult<AnalysisResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.analysis)(request, n)
    }

    async fn invoke_text_synthesis(
        &self,
        _model: ModelTier,
        prompt: &str,
    ) -> AnalysisResult<AnalysisResponse> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.synthesis)(prompt)
    }
}

/// Response with a fixed usage of 100 input and 20 output tokens.
pub fn response(text: &str) -> AnalysisResponse {
    AnalysisResponse::new(text, TokenUsage::new(100, 20))
}

/// Job over `files/test` asking for every analysis kind.
pub fn job(total_duration_seconds: u32) -> VideoJob {
    VideoJob::new(
        VideoSource::new("files/test"),
        total_duration_seconds,
        ModelTier::Gemini25Flash,
        [
            AnalysisKind::Summary,
            AnalysisKind::Chapters,
            AnalysisKind::Elements,
        ],
    )
}
