//! Per-chunk analysis.
//!
//! The processor never returns an error: every outcome, including media
//! extraction failures and unparseable model output, becomes a
//! [`ChunkResult`].

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use vlens_ai_client::{AnalysisBackend, AnalysisError, AnalysisRequest, MediaExtractor};
use vlens_models::{
    normalize_key, AnalysisKind, ChunkDescriptor, ChunkError, ChunkPayload, ChunkResult,
    ElementsPayload, TokenUsage, VideoJob,
};

use crate::metrics::{record_chunk_call, record_tokens};
use crate::prompt::{build_chunk_instructions, CarryForward};
use crate::retry::{retry_remote, BackoffPolicy, RetryResult};

/// What to analyze in one chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTask<'a> {
    pub job: &'a VideoJob,
    pub chunk: &'a ChunkDescriptor,
    pub chunk_count: usize,
    /// Kinds requested from this pass, a subset of the job's kinds
    pub kinds: &'a BTreeSet<AnalysisKind>,
    /// Previous chunk's condensed output, sequential passes only
    pub context: Option<&'a CarryForward>,
}

/// Drives one chunk through extraction, the remote call and parsing.
#[derive(Clone)]
pub struct ChunkProcessor {
    backend: Arc<dyn AnalysisBackend>,
    extractor: Arc<dyn MediaExtractor>,
    policy: BackoffPolicy,
}

impl ChunkProcessor {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        extractor: Arc<dyn MediaExtractor>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            backend,
            extractor,
            policy,
        }
    }

    pub fn with_policy(self, policy: BackoffPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Analyze one chunk.
    pub async fn process(&self, task: ChunkTask<'_>) -> ChunkResult {
        let chunk = task.chunk;
        let job_id = task.job.job_id.as_str();

        let content = match self
            .extractor
            .extract_media_range(
                &task.job.source,
                chunk.extract_start_seconds,
                chunk.extract_end_seconds,
            )
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!(job_id, chunk_index = chunk.index, "Media extraction failed: {}", e);
                return failed(chunk.index, e, 0, TokenUsage::default());
            }
        };

        let request = AnalysisRequest {
            model: task.job.model,
            content,
            instructions: build_chunk_instructions(
                chunk,
                task.chunk_count,
                task.job.total_duration_seconds,
                task.kinds,
                task.context,
            ),
            max_output_tokens: task.job.model.max_output_tokens(),
        };

        debug!(job_id, chunk_index = chunk.index, "Analyzing {}", chunk);

        let backend = &self.backend;
        let (response, attempts) = match retry_remote(&self.policy, "chunk_analysis", || {
            backend.invoke_analysis(&request)
        })
        .await
        {
            RetryResult::Success { value, attempts } => (value, attempts),
            RetryResult::Failed { error, attempts } => {
                warn!(
                    job_id,
                    chunk_index = chunk.index,
                    attempts,
                    "Chunk analysis failed: {}",
                    error
                );
                return failed(chunk.index, error, attempts, TokenUsage::default());
            }
        };

        record_tokens(response.usage);

        let mut payload: ChunkPayload = match serde_json::from_str(response.json_body()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(job_id, chunk_index = chunk.index, "Unparseable chunk output: {}", e);
                return failed(
                    chunk.index,
                    AnalysisError::malformed(format!("chunk output is not valid JSON: {}", e)),
                    attempts,
                    response.usage,
                );
            }
        };

        retain_requested(&mut payload, task.kinds);
        if missing_summary(&payload, task.kinds) {
            warn!(job_id, chunk_index = chunk.index, "Chunk output has no summary");
            return failed(
                chunk.index,
                AnalysisError::malformed("chunk output has no summary"),
                attempts,
                response.usage,
            );
        }
        if correct_relative_offsets(&mut payload, chunk) {
            warn!(
                job_id,
                chunk_index = chunk.index,
                offset = chunk.extract_start_seconds,
                "Model returned clip-relative timestamps, shifted to absolute"
            );
        }
        sanitize_elements(&mut payload, task.job.total_duration_seconds as f64);

        info!(
            job_id,
            chunk_index = chunk.index,
            attempts,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            chapters = payload.chapters.len(),
            "Chunk analyzed"
        );
        record_chunk_call(true);

        ChunkResult::Succeeded {
            index: chunk.index,
            payload,
            usage: response.usage,
        }
    }
}

fn failed(index: u32, error: AnalysisError, attempts: u32, usage: TokenUsage) -> ChunkResult {
    record_chunk_call(false);
    ChunkResult::Failed {
        index,
        error: ChunkError {
            class: error.class(),
            message: error.to_string(),
            attempts,
        },
        usage,
    }
}

/// Drop sections the pass did not ask for.
fn retain_requested(payload: &mut ChunkPayload, kinds: &BTreeSet<AnalysisKind>) {
    if !kinds.contains(&AnalysisKind::Summary) {
        payload.summary = None;
    }
    if !kinds.contains(&AnalysisKind::Chapters) {
        payload.chapters.clear();
    }
    if !kinds.contains(&AnalysisKind::Elements) {
        payload.elements = None;
    } else if payload.elements.is_none() {
        payload.elements = Some(ElementsPayload::default());
    }
}

fn missing_summary(payload: &ChunkPayload, kinds: &BTreeSet<AnalysisKind>) -> bool {
    kinds.contains(&AnalysisKind::Summary)
        && payload
            .summary
            .as_deref()
            .map_or(true, |s| s.trim().is_empty())
}

/// Shift a payload whose timestamps are all relative to the clip.
///
/// Applies only to chunks that start past 0, when every timestamp lies
/// before the clip start and within the clip length. Returns whether the
/// payload was shifted.
fn correct_relative_offsets(payload: &mut ChunkPayload, chunk: &ChunkDescriptor) -> bool {
    let offset = chunk.extract_start_seconds as f64;
    if offset <= 0.0 {
        return false;
    }
    let clip_len = chunk.extract_duration_seconds() as f64;

    let times: Vec<f64> = payload
        .chapters
        .iter()
        .flat_map(|c| [c.start_seconds, c.end_seconds])
        .chain(payload.elements.iter().flat_map(|e| e.timestamps()))
        .collect();

    if times.is_empty() || !times.iter().all(|&t| t < offset && (0.0..=clip_len).contains(&t)) {
        return false;
    }

    for chapter in &mut payload.chapters {
        chapter.shift(offset);
    }
    if let Some(elements) = &mut payload.elements {
        elements.shift(offset);
    }
    true
}

/// Clamp element ranges into the video and drop unusable detections.
fn sanitize_elements(payload: &mut ChunkPayload, total: f64) {
    let Some(elements) = &mut payload.elements else {
        return;
    };

    for item in &mut elements.equipment {
        item.time_ranges = item
            .time_ranges
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.clamped(0.0, total))
            .collect();
    }
    elements.equipment.retain(|e| !normalize_key(&e.name).is_empty());

    for topic in &mut elements.topics {
        topic.time_ranges = topic
            .time_ranges
            .iter()
            .filter(|r| r.is_valid())
            .map(|r| r.clamped(0.0, total))
            .collect();
    }
    elements.topics.retain(|t| !normalize_key(&t.topic).is_empty());

    elements.people.speakers.retain(|s| {
        s.start_seconds.is_finite() && s.end_seconds.is_finite() && s.end_seconds >= s.start_seconds
    });
    for segment in &mut elements.people.speakers {
        segment.start_seconds = segment.start_seconds.clamp(0.0, total);
        segment.end_seconds = segment.end_seconds.clamp(0.0, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use crate::testing::{job, response, ScriptedBackend};
    use std::time::Duration;
    use vlens_ai_client::OffsetClipExtractor;
    use vlens_models::{Chapter, ErrorClass, TimeRange};

    fn chunk() -> ChunkDescriptor {
        ChunkDescriptor {
            index: 1,
            core_start_seconds: 1500,
            core_end_seconds: 3000,
            extract_start_seconds: 1350,
            extract_end_seconds: 3150,
        }
    }

    fn processor(backend: Arc<ScriptedBackend>, sleeper: Arc<RecordingSleeper>) -> ChunkProcessor {
        ChunkProcessor::new(
            backend,
            Arc::new(OffsetClipExtractor),
            BackoffPolicy::new(3)
                .with_base_delay(Duration::from_millis(10))
                .without_jitter()
                .with_sleeper(sleeper),
        )
    }

    fn all_kinds() -> BTreeSet<AnalysisKind> {
        BTreeSet::from([
            AnalysisKind::Summary,
            AnalysisKind::Chapters,
            AnalysisKind::Elements,
        ])
    }

    #[tokio::test]
    async fn test_successful_chunk() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Ok(response(
                r#"```json
{"summary": "Part two", "chapters": [{"title": "Setup", "start_seconds": "00:26:40", "end_seconds": 1800}]}
```"#,
            ))
        }));
        let processor = processor(backend.clone(), Arc::new(RecordingSleeper::new()));
        let job = job(3600);
        let chunk = chunk();
        let kinds = all_kinds();

        let result = processor
            .process(ChunkTask {
                job: &job,
                chunk: &chunk,
                chunk_count: 3,
                kinds: &kinds,
                context: None,
            })
            .await;

        let payload = result.payload().unwrap();
        assert_eq!(payload.summary.as_deref(), Some("Part two"));
        assert_eq!(payload.chapters[0].start_seconds, 1600.0);
        assert!(payload.elements.is_some());
        assert_eq!(result.usage(), TokenUsage::new(100, 20));

        let request = &backend.requests()[0];
        assert_eq!(request.content.start_offset_seconds, 1350);
        assert_eq!(request.content.end_offset_seconds, 3150);
        assert!(request.instructions.contains("Add 1350 seconds"));
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_retries() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Err(AnalysisError::RateLimited {
                retry_after_ms: None,
            })
        }));
        let sleeper = Arc::new(RecordingSleeper::new());
        let processor = processor(backend.clone(), sleeper.clone());
        let job = job(3600);
        let chunk = chunk();
        let kinds = all_kinds();

        let result = processor
            .process(ChunkTask {
                job: &job,
                chunk: &chunk,
                chunk_count: 3,
                kinds: &kinds,
                context: None,
            })
            .await;

        let error = result.error().unwrap();
        assert_eq!(error.class, ErrorClass::RateLimited);
        assert_eq!(error.attempts, 3);
        assert_eq!(backend.analysis_calls(), 3);
        assert_eq!(sleeper.delays().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_output_fails_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok(response("I cannot do that"))));
        let processor = processor(backend.clone(), Arc::new(RecordingSleeper::new()));
        let job = job(3600);
        let chunk = chunk();
        let kinds = all_kinds();

        let result = processor
            .process(ChunkTask {
                job: &job,
                chunk: &chunk,
                chunk_count: 3,
                kinds: &kinds,
                context: None,
            })
            .await;

        assert_eq!(result.error().unwrap().class, ErrorClass::MalformedResponse);
        assert_eq!(result.usage(), TokenUsage::new(100, 20));
        assert_eq!(backend.analysis_calls(), 1);
    }

    #[tokio::test]
    async fn test_requested_summary_must_be_present() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Ok(response(r#"{"summary": "  ", "chapters": []}"#))
        }));
        let processor = processor(backend.clone(), Arc::new(RecordingSleeper::new()));
        let job = job(3600);
        let chunk = chunk();
        let kinds = BTreeSet::from([AnalysisKind::Summary, AnalysisKind::Chapters]);

        let result = processor
            .process(ChunkTask {
                job: &job,
                chunk: &chunk,
                chunk_count: 3,
                kinds: &kinds,
                context: None,
            })
            .await;

        let error = result.error().unwrap();
        assert_eq!(error.class, ErrorClass::MalformedResponse);
        assert_eq!(error.attempts, 1);
        assert_eq!(result.usage(), TokenUsage::new(100, 20));
    }

    #[test]
    fn test_relative_offsets_are_corrected() {
        let mut payload = ChunkPayload {
            chapters: vec![Chapter::new("A", 30.0, 400.0)],
            elements: Some(ElementsPayload {
                topics: vec![vlens_models::TopicDetection {
                    topic: "Lighting".into(),
                    time_ranges: vec![TimeRange::new(100.0, 200.0)],
                    importance: Default::default(),
                    mention_count: 1,
                }],
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(correct_relative_offsets(&mut payload, &chunk()));
        assert_eq!(payload.chapters[0].start_seconds, 1380.0);
        let elements = payload.elements.unwrap();
        assert_eq!(elements.topics[0].time_ranges[0], TimeRange::new(1450.0, 1550.0));
    }

    #[test]
    fn test_absolute_offsets_are_kept() {
        let mut payload = ChunkPayload {
            chapters: vec![Chapter::new("A", 1200.0, 1400.0), Chapter::new("B", 1400.0, 2000.0)],
            ..Default::default()
        };
        assert!(!correct_relative_offsets(&mut payload, &chunk()));
        assert_eq!(payload.chapters[0].start_seconds, 1200.0);
    }

    #[test]
    fn test_sanitize_drops_inverted_ranges() {
        let mut payload = ChunkPayload {
            elements: Some(ElementsPayload {
                equipment: vec![
                    vlens_models::EquipmentDetection {
                        name: "Tripod".into(),
                        time_ranges: vec![TimeRange::new(50.0, 40.0), TimeRange::new(3500.0, 3700.0)],
                        discussed: true,
                        mention_count: 2,
                    },
                    vlens_models::EquipmentDetection {
                        name: " -- ".into(),
                        time_ranges: vec![],
                        discussed: false,
                        mention_count: 1,
                    },
                ],
                ..Default::default()
            }),
            ..Default::default()
        };

        sanitize_elements(&mut payload, 3600.0);
        let elements = payload.elements.unwrap();
        assert_eq!(elements.equipment.len(), 1);
        assert_eq!(elements.equipment[0].time_ranges, vec![TimeRange::new(3500.0, 3600.0)]);
    }

    #[test]
    fn test_unrequested_sections_are_dropped() {
        let mut payload = ChunkPayload {
            summary: Some("s".into()),
            chapters: vec![Chapter::new("A", 0.0, 10.0)],
            elements: None,
        };
        retain_requested(&mut payload, &BTreeSet::from([AnalysisKind::Elements]));
        assert!(payload.summary.is_none());
        assert!(payload.chapters.is_empty());
        assert_eq!(payload.elements, Some(ElementsPayload::default()));
    }
}
