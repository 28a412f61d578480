//! Chunked long-video analysis worker.
//!
//! This crate provides:
//! - Per-model duration budgets and chunk planning
//! - Backoff/retry policy for remote model calls
//! - Per-chunk processing with carry-forward context
//! - Sequential, parallel and hybrid job orchestration
//! - Cross-chunk aggregation of summaries, chapters and elements
//! - In-process job status and results registry

pub mod aggregator;
pub mod budget;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod prompt;
pub mod registry;
pub mod request;
pub mod retry;

#[cfg(test)]
mod testing;

pub use aggregator::{Aggregator, ChunkOutput};
pub use budget::{budget_for, ChunkBudget};
pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use orchestrator::{ExecutionMode, Orchestrator};
pub use planner::plan;
pub use processor::{ChunkProcessor, ChunkTask};
pub use registry::JobRegistry;
pub use request::JobRequest;
pub use retry::{BackoffPolicy, RecordingSleeper, RetryResult, Sleeper, TokioSleeper};
