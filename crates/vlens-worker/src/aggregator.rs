//! Cross-chunk reconciliation.
//!
//! Runs only once every chunk of a job succeeded. Chapters are attributed
//! to the chunk owning their start, element detections are grouped by
//! normalized name with their time ranges unioned, and per-chunk summaries
//! are fused by a text-only synthesis call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};
use vlens_ai_client::AnalysisBackend;
use vlens_models::{
    normalize_key, AnalysisKind, Chapter, ChunkDescriptor, ChunkPayload, ElementsPayload, ErrorClass,
    EquipmentDetection, JobMetadata, JobResult, PeopleSummary, SpeakerSegment, TimeRange,
    TokenUsage, TopicDetection, VideoJob,
};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_tokens;
use crate::prompt::build_synthesis_prompt;
use crate::retry::{retry_remote, BackoffPolicy, RetryResult};

/// Chapters whose starts are closer than this are the same event.
pub const CHAPTER_COLLISION_SECONDS: f64 = 1.0;

/// Successful output of one chunk, ready to merge.
#[derive(Debug, Clone)]
pub struct ChunkOutput {
    pub chunk: ChunkDescriptor,
    pub payload: ChunkPayload,
}

/// Merges chunk outputs into a job result.
#[derive(Clone)]
pub struct Aggregator {
    backend: Arc<dyn AnalysisBackend>,
    policy: BackoffPolicy,
}

impl Aggregator {
    pub fn new(backend: Arc<dyn AnalysisBackend>, policy: BackoffPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn with_policy(self, policy: BackoffPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Build the job result from the outputs of every chunk, in index order.
    ///
    /// `chunk_usage` is the usage of all chunk calls; the synthesis call is
    /// added on top.
    pub async fn aggregate(
        &self,
        job: &VideoJob,
        outputs: &[ChunkOutput],
        chunk_usage: TokenUsage,
        started: Instant,
    ) -> WorkerResult<JobResult> {
        let total = job.total_duration_seconds as f64;
        let multi_chunk = outputs.len() > 1;
        let mut usage = chunk_usage;

        let chapters = if job.wants(AnalysisKind::Chapters) {
            merge_chapters(outputs, total)?
        } else {
            Vec::new()
        };

        let elements = job.wants(AnalysisKind::Elements).then(|| {
            let parts: Vec<&ElementsPayload> = outputs
                .iter()
                .filter_map(|o| o.payload.elements.as_ref())
                .collect();
            merge_elements(&parts, multi_chunk)
        });

        let summary = if !job.wants(AnalysisKind::Summary) {
            None
        } else if multi_chunk {
            let (text, synthesis_usage) = self.synthesize_summary(job, outputs).await?;
            usage += synthesis_usage;
            Some(text)
        } else {
            let parts = chunk_summaries(outputs)?;
            parts.first().map(|(_, text)| text.trim().to_string())
        };

        info!(
            job_id = %job.job_id,
            chunks = outputs.len(),
            chapters = chapters.len(),
            total_tokens = usage.total(),
            "Aggregated job result"
        );

        Ok(JobResult {
            job_id: job.job_id.clone(),
            summary,
            chapters,
            elements,
            metadata: JobMetadata {
                model: job.model,
                chunk_count: outputs.len() as u32,
                usage,
                total_tokens: usage.total(),
                processing_time_seconds: started.elapsed().as_secs_f64(),
                completed_at: Utc::now(),
            },
        })
    }

    async fn synthesize_summary(
        &self,
        job: &VideoJob,
        outputs: &[ChunkOutput],
    ) -> WorkerResult<(String, TokenUsage)> {
        let parts = chunk_summaries(outputs)?;
        let prompt = build_synthesis_prompt(&parts);
        let backend = &self.backend;
        match retry_remote(&self.policy, "summary_synthesis", || {
            backend.invoke_text_synthesis(job.model, &prompt)
        })
        .await
        {
            RetryResult::Success { value, attempts } => {
                record_tokens(value.usage);
                let text = value.text.trim();
                if text.is_empty() {
                    warn!(job_id = %job.job_id, "Summary synthesis returned no text");
                    return Err(WorkerError::SynthesisFailed {
                        class: ErrorClass::MalformedResponse,
                        message: format!("empty synthesized summary (after {} attempt(s))", attempts),
                    });
                }
                Ok((text.to_string(), value.usage))
            }
            RetryResult::Failed { error, attempts } => Err(WorkerError::SynthesisFailed {
                class: error.class(),
                message: format!("{} (after {} attempt(s))", error, attempts),
            }),
        }
    }
}

/// Per-chunk summaries in index order. Every chunk must carry one.
fn chunk_summaries(outputs: &[ChunkOutput]) -> WorkerResult<Vec<(&ChunkDescriptor, &str)>> {
    outputs
        .iter()
        .map(|o| {
            o.payload
                .summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| (&o.chunk, s))
                .ok_or_else(|| {
                    WorkerError::merge_invariant(format!("chunk {} has no summary", o.chunk.index))
                })
        })
        .collect()
}

/// Index of the chunk owning `seconds`: the one whose core contains it,
/// else the nearest core (lower index on ties).
fn owner_of(chunks: &[&ChunkDescriptor], seconds: f64) -> Option<u32> {
    if let Some(chunk) = chunks.iter().find(|c| c.core_contains(seconds)) {
        return Some(chunk.index);
    }
    chunks
        .iter()
        .min_by(|a, b| {
            a.core_distance(seconds)
                .total_cmp(&b.core_distance(seconds))
                .then(a.index.cmp(&b.index))
        })
        .map(|c| c.index)
}

/// Merge the chapters of all chunks.
///
/// A chapter survives only when reported by the chunk owning its start;
/// copies from other chunks are dropped before any boundary check.
/// Survivors are sorted by start, collisions within one second keep the
/// longer summary, and indices are reassigned `1..=N`.
pub fn merge_chapters(outputs: &[ChunkOutput], total: f64) -> WorkerResult<Vec<Chapter>> {
    let chunks: Vec<&ChunkDescriptor> = outputs.iter().map(|o| &o.chunk).collect();
    let mut kept = Vec::new();

    for output in outputs {
        for chapter in &output.payload.chapters {
            // A start that is not a number cannot be attributed to any chunk.
            if !chapter.start_seconds.is_finite() {
                return Err(non_numeric(chapter, output.chunk.index));
            }
            if owner_of(&chunks, chapter.start_seconds) != Some(output.chunk.index) {
                continue;
            }
            if !chapter.end_seconds.is_finite() {
                return Err(non_numeric(chapter, output.chunk.index));
            }
            if chapter.end_seconds < chapter.start_seconds {
                return Err(WorkerError::merge_invariant(format!(
                    "chapter '{}' from chunk {} ends at {}s before it starts at {}s",
                    chapter.title, output.chunk.index, chapter.end_seconds, chapter.start_seconds
                )));
            }
            let mut chapter = chapter.clone();
            chapter.start_seconds = chapter.start_seconds.clamp(0.0, total);
            chapter.end_seconds = chapter.end_seconds.clamp(chapter.start_seconds, total);
            kept.push(chapter);
        }
    }

    kept.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));

    let mut merged: Vec<Chapter> = Vec::with_capacity(kept.len());
    for chapter in kept {
        match merged.last_mut() {
            Some(last) if chapter.start_seconds - last.start_seconds < CHAPTER_COLLISION_SECONDS => {
                if chapter.summary.chars().count() > last.summary.chars().count() {
                    *last = chapter;
                }
            }
            _ => merged.push(chapter),
        }
    }

    for (i, chapter) in merged.iter_mut().enumerate() {
        chapter.index = i as u32 + 1;
    }
    Ok(merged)
}

fn non_numeric(chapter: &Chapter, chunk_index: u32) -> WorkerError {
    WorkerError::merge_invariant(format!(
        "chapter '{}' from chunk {} has a non-numeric boundary",
        chapter.title, chunk_index
    ))
}

/// Union of ranges; touching or overlapping ranges become one.
pub fn union_ranges(ranges: impl IntoIterator<Item = TimeRange>) -> Vec<TimeRange> {
    let mut ranges: Vec<TimeRange> = ranges.into_iter().filter(TimeRange::is_valid).collect();
    ranges.sort_by(|a, b| a.start().total_cmp(&b.start()));

    let mut out: Vec<TimeRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if range.start() <= last.end() => {
                *last = TimeRange::new(last.start(), last.end().max(range.end()));
            }
            _ => out.push(range),
        }
    }
    out
}

/// Merge element detections of all chunks, in chunk order.
///
/// With `multi_chunk`, speaker labels are renumbered in order of first
/// appearance and identity is flagged unverified, since labels are only
/// consistent within one chunk.
pub fn merge_elements(parts: &[&ElementsPayload], multi_chunk: bool) -> ElementsPayload {
    let mut equipment: Vec<EquipmentDetection> = Vec::new();
    let mut equipment_keys: HashMap<String, usize> = HashMap::new();
    let mut topics: Vec<TopicDetection> = Vec::new();
    let mut topic_keys: HashMap<String, usize> = HashMap::new();
    let mut people = PeopleSummary::default();

    for part in parts {
        for item in &part.equipment {
            let key = normalize_key(&item.name);
            match equipment_keys.get(&key) {
                Some(&i) => {
                    let entry = &mut equipment[i];
                    entry.time_ranges.extend(item.time_ranges.iter().copied());
                    entry.discussed |= item.discussed;
                    entry.mention_count += item.mention_count;
                }
                None => {
                    equipment_keys.insert(key, equipment.len());
                    equipment.push(item.clone());
                }
            }
        }

        for topic in &part.topics {
            let key = normalize_key(&topic.topic);
            match topic_keys.get(&key) {
                Some(&i) => {
                    let entry = &mut topics[i];
                    entry.time_ranges.extend(topic.time_ranges.iter().copied());
                    entry.importance = entry.importance.max(topic.importance);
                    entry.mention_count += topic.mention_count;
                }
                None => {
                    topic_keys.insert(key, topics.len());
                    topics.push(topic.clone());
                }
            }
        }

        people.max_count = people.max_count.max(part.people.max_count);
        people
            .speakers
            .extend(part.people.speakers.iter().cloned());
    }

    for entry in &mut equipment {
        entry.time_ranges = union_ranges(std::mem::take(&mut entry.time_ranges));
    }
    for entry in &mut topics {
        entry.time_ranges = union_ranges(std::mem::take(&mut entry.time_ranges));
    }

    people
        .speakers
        .sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
    if multi_chunk {
        people.speakers = relabel_speakers(people.speakers);
        people.speaker_identity_verified = false;
    }

    ElementsPayload {
        equipment,
        topics,
        people,
    }
}

/// Renumber speakers "Speaker N" by first appearance and fuse overlapping
/// segments of the same speaker. Expects segments sorted by start.
fn relabel_speakers(segments: Vec<SpeakerSegment>) -> Vec<SpeakerSegment> {
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut last_segment: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<SpeakerSegment> = Vec::with_capacity(segments.len());

    for segment in segments {
        let next = labels.len() + 1;
        let label = labels
            .entry(normalize_key(&segment.speaker_id))
            .or_insert_with(|| format!("Speaker {}", next))
            .clone();

        if let Some(&i) = last_segment.get(&label) {
            if segment.start_seconds <= out[i].end_seconds {
                out[i].end_seconds = out[i].end_seconds.max(segment.end_seconds);
                continue;
            }
        }

        last_segment.insert(label.clone(), out.len());
        out.push(SpeakerSegment {
            speaker_id: label,
            ..segment
        });
    }
    out
}
