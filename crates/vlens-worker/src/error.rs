//! Worker error types.

use thiserror::Error;
use vlens_models::{ChunkError, ErrorClass, UnsupportedModelError};

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Job-level failure. The `Display` text is what status polling reports.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkerError {
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("Invalid duration: {0}s (must be at least 1s)")]
    InvalidDuration(u32),

    #[error("Chunk {index} failed with {class}: {message}")]
    ChunkFailed {
        index: u32,
        class: ErrorClass,
        message: String,
    },

    #[error("Summary synthesis failed with {class}: {message}")]
    SynthesisFailed { class: ErrorClass, message: String },

    #[error("Merge invariant violated: {0}")]
    MergeInvariant(String),

    #[error("Job timed out after {0}s")]
    JobTimeout(u64),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    pub fn chunk_failed(index: u32, error: &ChunkError) -> Self {
        Self::ChunkFailed {
            index,
            class: error.class,
            message: format!("{} (after {} attempt(s))", error.message, error.attempts),
        }
    }

    pub fn merge_invariant(msg: impl Into<String>) -> Self {
        Self::MergeInvariant(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Planning errors never leave the PLANNING state.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            WorkerError::UnsupportedModel(_) | WorkerError::InvalidDuration(_) | WorkerError::Config(_)
        )
    }

    /// Remote error class behind this failure, when there is one.
    pub fn error_class(&self) -> Option<ErrorClass> {
        match self {
            WorkerError::ChunkFailed { class, .. } | WorkerError::SynthesisFailed { class, .. } => {
                Some(*class)
            }
            _ => None,
        }
    }
}

impl From<UnsupportedModelError> for WorkerError {
    fn from(err: UnsupportedModelError) -> Self {
        WorkerError::UnsupportedModel(err.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_failure_reason_names_index_and_class() {
        let err = WorkerError::chunk_failed(
            2,
            &ChunkError {
                class: ErrorClass::RateLimited,
                message: "Rate limited by provider".into(),
                attempts: 3,
            },
        );

        assert_eq!(
            err.to_string(),
            "Chunk 2 failed with RateLimited: Rate limited by provider (after 3 attempt(s))"
        );
        assert_eq!(err.error_class(), Some(ErrorClass::RateLimited));
        assert!(!err.is_planning_error());
    }

    #[test]
    fn test_planning_errors() {
        assert!(WorkerError::InvalidDuration(0).is_planning_error());
        assert!(WorkerError::from(UnsupportedModelError("x".into())).is_planning_error());
        assert!(!WorkerError::JobTimeout(60).is_planning_error());
        assert!(!WorkerError::Cancelled.is_planning_error());
    }
}
