//! Job orchestration.
//!
//! Drives a job through `PLANNING -> PROCESSING -> AGGREGATING -> COMPLETED`.
//! Narrative kinds (summary, chapters) run chunk after chunk with carried
//! context; element extraction fans out across chunks. The first failed
//! chunk aborts the job and drops every other chunk result.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, warn, Instrument};
use vlens_ai_client::{AnalysisBackend, MediaExtractor};
use vlens_models::{
    AnalysisKind, ChunkDescriptor, ChunkPayload, ChunkResult, JobId, JobResult, JobStatus,
    TokenUsage, VideoJob,
};

use crate::aggregator::{Aggregator, ChunkOutput};
use crate::budget::budget_for;
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics::record_job;
use crate::planner::plan;
use crate::processor::{ChunkProcessor, ChunkTask};
use crate::prompt::CarryForward;
use crate::registry::JobRegistry;
use crate::retry::BackoffPolicy;

/// How the chunks of a job are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// The video fits one call; no aggregation.
    SingleCall,
    /// Strict index order with carried context.
    Sequential,
    /// Concurrent dispatch, elements only.
    Parallel,
    /// A sequential narrative pass alongside a parallel elements pass.
    Hybrid,
}

impl ExecutionMode {
    pub fn select(job: &VideoJob, chunk_count: usize) -> Self {
        if chunk_count <= 1 {
            return ExecutionMode::SingleCall;
        }
        let narrative = !job.continuity_kinds().is_empty();
        let elements = job.wants(AnalysisKind::Elements);
        match (narrative, elements) {
            (true, true) => ExecutionMode::Hybrid,
            (true, false) => ExecutionMode::Sequential,
            _ => ExecutionMode::Parallel,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::SingleCall => "single_call",
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Parallel => "parallel",
            ExecutionMode::Hybrid => "hybrid",
        }
    }

    /// Chunk calls made for a job with `chunk_count` chunks.
    pub fn total_calls(&self, chunk_count: usize) -> u32 {
        match self {
            ExecutionMode::Hybrid => chunk_count as u32 * 2,
            _ => chunk_count as u32,
        }
    }
}

/// Successful output of one pass, one entry per chunk in index order.
type PassOutput = Vec<(ChunkPayload, TokenUsage)>;

/// Publishes PROCESSING progress as chunk calls finish.
struct Progress<'a> {
    registry: &'a JobRegistry,
    job_id: &'a JobId,
    logger: &'a JobLogger,
    completed: AtomicU32,
    total: u32,
}

impl Progress<'_> {
    async fn chunk_done(&self, chunk: &ChunkDescriptor) {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        self.registry
            .update(
                self.job_id,
                JobStatus::Processing {
                    chunks_completed: completed,
                    chunks_total: self.total,
                },
            )
            .await;
        self.logger.log_chunk_done(chunk, completed, self.total);
    }
}

/// Runs analysis jobs end to end.
#[derive(Clone)]
pub struct Orchestrator {
    processor: ChunkProcessor,
    aggregator: Aggregator,
    registry: JobRegistry,
    config: WorkerConfig,
    /// Background jobs started by `submit`, until they finish
    running: Arc<Mutex<HashMap<JobId, AbortHandle>>>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn AnalysisBackend>,
        extractor: Arc<dyn MediaExtractor>,
        config: WorkerConfig,
        registry: JobRegistry,
    ) -> Self {
        let policy = config.backoff_policy();
        Self {
            processor: ChunkProcessor::new(backend.clone(), extractor, policy.clone()),
            aggregator: Aggregator::new(backend, policy),
            registry,
            config,
            running: Arc::default(),
        }
    }

    /// Replace the backoff policy of chunk and synthesis calls.
    pub fn with_policy(self, policy: BackoffPolicy) -> Self {
        Self {
            processor: self.processor.with_policy(policy.clone()),
            aggregator: self.aggregator.with_policy(policy),
            registry: self.registry,
            config: self.config,
            running: self.running,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Register `job` and run it in the background. Progress and the
    /// result are available from [`Self::registry`].
    pub async fn submit(&self, job: VideoJob) -> JobId {
        let job_id = self.registry.submit(&job).await;
        let this = self.clone();
        let task_id = job_id.clone();

        // Held across the spawn so the task cannot deregister before it is
        // registered.
        let mut running = self.running.lock().await;
        let handle = tokio::spawn(async move {
            if let Err(e) = this.drive(job).await {
                debug!(job_id = %task_id, "Background job ended with error: {}", e);
            }
            this.running.lock().await.remove(&task_id);
        });
        running.insert(job_id.clone(), handle.abort_handle());
        job_id
    }

    /// Cancel a job started with [`Self::submit`].
    ///
    /// In-flight chunk calls are dropped, their results discarded, and the
    /// job moves to FAILED. Returns `false` when the job is not running.
    pub async fn cancel(&self, job_id: &JobId) -> bool {
        let Some(handle) = self.running.lock().await.remove(job_id) else {
            return false;
        };
        handle.abort();
        let cancelled = self.registry.fail(job_id, WorkerError::Cancelled).await;
        if cancelled {
            warn!(job_id = %job_id, "Job cancelled");
        }
        cancelled
    }

    /// Register `job` and run it to completion.
    pub async fn run(&self, job: VideoJob) -> WorkerResult<JobResult> {
        self.registry.submit(&job).await;
        self.drive(job).await
    }

    async fn drive(&self, job: VideoJob) -> WorkerResult<JobResult> {
        let logger = JobLogger::for_job(&job);
        let span = logger.create_span();
        let started = Instant::now();

        let outcome = self
            .plan_and_execute(&job, &logger, started)
            .instrument(span)
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(result) => {
                self.registry.complete(&job.job_id, result.clone()).await;
                record_job(true, elapsed);
                logger.log_completion(&result, elapsed);
                Ok(result)
            }
            Err(e) => {
                let reason = if e.is_planning_error() {
                    format!("Planning failed: {}", e)
                } else {
                    e.to_string()
                };
                self.registry.fail(&job.job_id, reason).await;
                record_job(false, elapsed);
                logger.log_failure(&e, elapsed);
                Err(e)
            }
        }
    }

    async fn plan_and_execute(
        &self,
        job: &VideoJob,
        logger: &JobLogger,
        started: Instant,
    ) -> WorkerResult<JobResult> {
        logger.log_start(job.requested_analyses.len());

        let chunks = self.plan(job)?;
        let timeout = self.config.job_timeout;
        match tokio::time::timeout(timeout, self.execute(job, &chunks, logger, started)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::JobTimeout(timeout.as_secs())),
        }
    }

    fn plan(&self, job: &VideoJob) -> WorkerResult<Vec<ChunkDescriptor>> {
        if job.requested_analyses.is_empty() {
            return Err(WorkerError::config_error("no analyses requested"));
        }
        let budget = budget_for(job.model, self.config.overlap_fraction)?;
        plan(job.total_duration_seconds, &budget)
    }

    async fn execute(
        &self,
        job: &VideoJob,
        chunks: &[ChunkDescriptor],
        logger: &JobLogger,
        started: Instant,
    ) -> WorkerResult<JobResult> {
        let mode = ExecutionMode::select(job, chunks.len());
        let progress = Progress {
            registry: &self.registry,
            job_id: &job.job_id,
            logger,
            completed: AtomicU32::new(0),
            total: mode.total_calls(chunks.len()),
        };

        logger.log_planned(chunks.len(), mode.as_str(), progress.total);
        self.registry
            .update(
                &job.job_id,
                JobStatus::Processing {
                    chunks_completed: 0,
                    chunks_total: progress.total,
                },
            )
            .await;

        let narrative_kinds = job.continuity_kinds();
        let element_kinds = BTreeSet::from([AnalysisKind::Elements]);
        let limit = self.config.max_parallel_chunks;

        let outputs: PassOutput = match mode {
            ExecutionMode::SingleCall => {
                self.run_sequential(job, chunks, &job.requested_analyses, &progress)
                    .await?
            }
            ExecutionMode::Sequential => {
                self.run_sequential(job, chunks, &narrative_kinds, &progress)
                    .await?
            }
            ExecutionMode::Parallel => {
                self.run_parallel(job, chunks, &element_kinds, limit, &progress)
                    .await?
            }
            ExecutionMode::Hybrid => {
                // The narrative pass holds one slot of the parallel budget.
                let (narrative, elements) = tokio::try_join!(
                    self.run_sequential(job, chunks, &narrative_kinds, &progress),
                    self.run_parallel(
                        job,
                        chunks,
                        &element_kinds,
                        limit.saturating_sub(1).max(1),
                        &progress
                    ),
                )?;
                narrative
                    .into_iter()
                    .zip(elements)
                    .map(|((mut payload, usage), (extra, extra_usage))| {
                        payload.elements = extra.elements;
                        (payload, usage + extra_usage)
                    })
                    .collect()
            }
        };

        let chunk_usage: TokenUsage = outputs.iter().map(|(_, usage)| *usage).sum();
        let outputs: Vec<ChunkOutput> = chunks
            .iter()
            .zip(outputs)
            .map(|(chunk, (payload, _))| ChunkOutput {
                chunk: *chunk,
                payload,
            })
            .collect();

        if mode != ExecutionMode::SingleCall {
            self.registry
                .update(&job.job_id, JobStatus::Aggregating)
                .await;
        }
        self.aggregator
            .aggregate(job, &outputs, chunk_usage, started)
            .await
    }

    /// Process chunks strictly in index order, carrying context forward.
    async fn run_sequential(
        &self,
        job: &VideoJob,
        chunks: &[ChunkDescriptor],
        kinds: &BTreeSet<AnalysisKind>,
        progress: &Progress<'_>,
    ) -> WorkerResult<PassOutput> {
        let mut outputs = Vec::with_capacity(chunks.len());
        let mut context: Option<CarryForward> = None;

        for chunk in chunks {
            let result = self
                .processor
                .process(ChunkTask {
                    job,
                    chunk,
                    chunk_count: chunks.len(),
                    kinds,
                    context: context.as_ref(),
                })
                .await;

            match result {
                ChunkResult::Succeeded { payload, usage, .. } => {
                    progress.chunk_done(chunk).await;
                    context = Some(CarryForward::from_payload(&payload, self.config.context_chars));
                    outputs.push((payload, usage));
                }
                ChunkResult::Failed { index, error, .. } => {
                    progress.logger.log_chunk_failed(&error, index);
                    return Err(WorkerError::chunk_failed(index, &error));
                }
            }
        }
        Ok(outputs)
    }

    /// Process chunks with up to `limit` calls in flight, collecting results
    /// by index. Returning early drops the in-flight calls.
    async fn run_parallel(
        &self,
        job: &VideoJob,
        chunks: &[ChunkDescriptor],
        kinds: &BTreeSet<AnalysisKind>,
        limit: usize,
        progress: &Progress<'_>,
    ) -> WorkerResult<PassOutput> {
        let mut slots: Vec<Option<(ChunkPayload, TokenUsage)>> = vec![None; chunks.len()];

        let calls: Vec<_> = chunks
            .iter()
            .map(|chunk| self.process_detached(job, chunk, chunks.len(), kinds))
            .collect();
        let mut results = stream::iter(calls).buffer_unordered(limit.max(1));

        while let Some((chunk, result)) = results.next().await {
            match result {
                ChunkResult::Succeeded { payload, usage, .. } => {
                    progress.chunk_done(chunk).await;
                    let slot = slots.get_mut(chunk.index as usize).ok_or_else(|| {
                        WorkerError::merge_invariant(format!("chunk index {} out of range", chunk.index))
                    })?;
                    *slot = Some((payload, usage));
                }
                ChunkResult::Failed { index, error, .. } => {
                    progress.logger.log_chunk_failed(&error, index);
                    return Err(WorkerError::chunk_failed(index, &error));
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| WorkerError::merge_invariant(format!("no result for chunk {}", i)))
            })
            .collect()
    }

    /// One chunk call without carried context, tagged with its chunk.
    async fn process_detached<'a>(
        &self,
        job: &VideoJob,
        chunk: &'a ChunkDescriptor,
        chunk_count: usize,
        kinds: &BTreeSet<AnalysisKind>,
    ) -> (&'a ChunkDescriptor, ChunkResult) {
        let result = self
            .processor
            .process(ChunkTask {
                job,
                chunk,
                chunk_count,
                kinds,
                context: None,
            })
            .await;
        (chunk, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use crate::testing::{job, response, ScriptedBackend};
    use std::time::Duration;
    use vlens_ai_client::{AnalysisError, OffsetClipExtractor};
    use vlens_models::{ErrorClass, ModelTier, VideoSource};

    fn orchestrator(backend: Arc<ScriptedBackend>) -> Orchestrator {
        let config = WorkerConfig {
            max_parallel_chunks: 3,
            ..Default::default()
        };
        Orchestrator::new(backend, Arc::new(OffsetClipExtractor), config, JobRegistry::new()).with_policy(
            BackoffPolicy::new(3)
                .with_base_delay(Duration::from_millis(1))
                .without_jitter()
                .with_sleeper(Arc::new(RecordingSleeper::new())),
        )
    }

    fn job_with(kinds: &[AnalysisKind], total: u32) -> VideoJob {
        VideoJob::new(
            VideoSource::new("files/test"),
            total,
            ModelTier::Gemini25Flash,
            kinds.iter().copied(),
        )
    }

    #[test]
    fn test_mode_selection() {
        let all = job(7200);
        assert_eq!(ExecutionMode::select(&all, 1), ExecutionMode::SingleCall);
        assert_eq!(ExecutionMode::select(&all, 3), ExecutionMode::Hybrid);
        assert_eq!(
            ExecutionMode::select(&job_with(&[AnalysisKind::Chapters], 7200), 3),
            ExecutionMode::Sequential
        );
        assert_eq!(
            ExecutionMode::select(&job_with(&[AnalysisKind::Elements], 7200), 3),
            ExecutionMode::Parallel
        );
        assert_eq!(ExecutionMode::Hybrid.total_calls(3), 6);
    }

    #[tokio::test]
    async fn test_single_chunk_skips_synthesis() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| {
            Ok(response(
                r#"{"summary": "Short video", "chapters": [{"title": "All", "start_seconds": 0, "end_seconds": 300}], "elements": {}}"#,
            ))
        }));
        let orchestrator = orchestrator(backend.clone());

        let result = orchestrator.run(job(300)).await.unwrap();

        assert_eq!(result.summary.as_deref(), Some("Short video"));
        assert_eq!(result.chapters[0].index, 1);
        assert_eq!(result.metadata.chunk_count, 1);
        assert_eq!(result.metadata.total_tokens, 120);
        assert_eq!(backend.analysis_calls(), 1);
        assert!(backend.synthesis_prompts().is_empty());
        assert!(result.elements.unwrap().people.speaker_identity_verified);
    }

    #[tokio::test]
    async fn test_sequential_pass_carries_context() {
        let backend = Arc::new(ScriptedBackend::new(|request, _| {
            let start = request.content.start_offset_seconds;
            Ok(response(&format!(
                r#"{{"summary": "Part starting at {start}", "chapters": []}}"#
            )))
        }));
        let orchestrator = orchestrator(backend.clone());

        let result = orchestrator
            .run(job_with(&[AnalysisKind::Summary], 6000))
            .await
            .unwrap();

        let requests = backend.requests();
        assert_eq!(requests.len(), 3);
        let offsets: Vec<u32> = requests.iter().map(|r| r.content.start_offset_seconds).collect();
        assert_eq!(offsets, vec![0, 2025, 4275]);
        assert!(!requests[0].instructions.contains("CONTEXT FROM THE PREVIOUS PART"));
        assert!(requests[1].instructions.contains("Part starting at 0"));
        assert!(requests[2].instructions.contains("Part starting at 2025"));

        assert_eq!(result.summary.as_deref(), Some("Synthesized summary"));
        assert_eq!(result.metadata.total_tokens, 3 * 120 + 60);
    }

    #[tokio::test]
    async fn test_synthesis_failure_fails_job() {
        let backend = Arc::new(
            ScriptedBackend::new(|_, _| Ok(response(r#"{"summary": "part"}"#)))
                .with_synthesis(|_| Err(AnalysisError::Unauthorized("revoked".into()))),
        );
        let orchestrator = orchestrator(backend);
        let job = job_with(&[AnalysisKind::Summary], 6000);
        let job_id = job.job_id.clone();

        let err = orchestrator.run(job).await.unwrap_err();

        assert!(matches!(err, WorkerError::SynthesisFailed { .. }));
        assert!(orchestrator.registry().result(&job_id).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_duration_fails_in_planning() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok(response("{}"))));
        let orchestrator = orchestrator(backend.clone());

        let job = job(0);
        let job_id = job.job_id.clone();

        let err = orchestrator.run(job).await.unwrap_err();

        assert_eq!(err, WorkerError::InvalidDuration(0));
        assert_eq!(backend.analysis_calls(), 0);
        let snapshot = orchestrator.registry().status(&job_id).await.unwrap();
        assert_eq!(
            snapshot.status,
            JobStatus::Failed {
                error: "Planning failed: Invalid duration: 0s (must be at least 1s)".into()
            }
        );
        assert_eq!(snapshot.event_seq, 1);
    }

    #[tokio::test]
    async fn test_chunk_without_summary_fails_summary_job() {
        let backend = Arc::new(ScriptedBackend::new(|_, _| Ok(response("{}"))));
        let orchestrator = orchestrator(backend.clone());
        let job = job_with(&[AnalysisKind::Summary], 6000);
        let job_id = job.job_id.clone();

        let err = orchestrator.run(job).await.unwrap_err();

        assert_eq!(err.error_class(), Some(ErrorClass::MalformedResponse));
        assert!(matches!(err, WorkerError::ChunkFailed { index: 0, .. }));
        assert_eq!(backend.analysis_calls(), 1);
        assert!(backend.synthesis_prompts().is_empty());
        assert!(orchestrator.registry().result(&job_id).await.is_none());
        assert!(matches!(
            orchestrator.registry().status(&job_id).await.unwrap().status,
            JobStatus::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_synthesis_fails_job() {
        let backend = Arc::new(
            ScriptedBackend::new(|_, _| Ok(response(r#"{"summary": "part"}"#)))
                .with_synthesis(|_| Ok(response("  \n"))),
        );
        let orchestrator = orchestrator(backend);

        let err = orchestrator
            .run(job_with(&[AnalysisKind::Summary], 6000))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            WorkerError::SynthesisFailed {
                class: ErrorClass::MalformedResponse,
                message: "empty synthesized summary (after 1 attempt(s))".into(),
            }
        );
    }
}
