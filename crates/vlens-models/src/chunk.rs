//! Chunk descriptors and per-chunk results.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Chapter, ElementsPayload, TokenUsage};

/// One planned unit of work.
///
/// `core_*` is the half-open interval this chunk owns; the cores of a job
/// tile `[0, total)` exactly. `extract_*` is the core widened by the overlap
/// margin and is what the model actually sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ChunkDescriptor {
    pub index: u32,
    pub core_start_seconds: u32,
    pub core_end_seconds: u32,
    pub extract_start_seconds: u32,
    pub extract_end_seconds: u32,
}

impl ChunkDescriptor {
    pub fn core_contains(&self, seconds: f64) -> bool {
        seconds >= self.core_start_seconds as f64 && seconds < self.core_end_seconds as f64
    }

    /// Distance from `seconds` to the core interval, 0 when inside.
    pub fn core_distance(&self, seconds: f64) -> f64 {
        let start = self.core_start_seconds as f64;
        let end = self.core_end_seconds as f64;
        if seconds < start {
            start - seconds
        } else if seconds >= end {
            seconds - end
        } else {
            0.0
        }
    }

    pub fn core_duration_seconds(&self) -> u32 {
        self.core_end_seconds - self.core_start_seconds
    }

    pub fn extract_duration_seconds(&self) -> u32 {
        self.extract_end_seconds - self.extract_start_seconds
    }

    /// Whether the ordering invariant `extract_start <= core_start <= core_end <= extract_end` holds.
    pub fn is_well_formed(&self) -> bool {
        self.extract_start_seconds <= self.core_start_seconds
            && self.core_start_seconds <= self.core_end_seconds
            && self.core_end_seconds <= self.extract_end_seconds
    }
}

impl fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk {} core [{}, {}) extract [{}, {})",
            self.index,
            self.core_start_seconds,
            self.core_end_seconds,
            self.extract_start_seconds,
            self.extract_end_seconds
        )
    }
}

/// Error class of a failed remote call, as reported in job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorClass {
    RateLimited,
    ModelWarming,
    Timeout,
    InvalidRequest,
    Unauthorized,
    MalformedResponse,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "RateLimited",
            ErrorClass::ModelWarming => "ModelWarming",
            ErrorClass::Timeout => "Timeout",
            ErrorClass::InvalidRequest => "InvalidRequest",
            ErrorClass::Unauthorized => "Unauthorized",
            ErrorClass::MalformedResponse => "MalformedResponse",
            ErrorClass::Unknown => "Unknown",
        }
    }

    /// Transient classes are retried with backoff; the rest fail at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorClass::RateLimited | ErrorClass::ModelWarming | ErrorClass::Timeout
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error of a failed chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkError {
    pub class: ErrorClass,
    pub message: String,
    /// Remote call attempts made before giving up
    pub attempts: u32,
}

impl fmt::Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.class, self.attempts, self.message
        )
    }
}

/// Analysis payload returned for one chunk.
///
/// Every timestamp is absolute to the whole video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkPayload {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub elements: Option<ElementsPayload>,
}

/// Outcome of processing one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkResult {
    Succeeded {
        index: u32,
        payload: ChunkPayload,
        usage: TokenUsage,
    },
    Failed {
        index: u32,
        error: ChunkError,
        usage: TokenUsage,
    },
}

impl ChunkResult {
    pub fn index(&self) -> u32 {
        match self {
            ChunkResult::Succeeded { index, .. } | ChunkResult::Failed { index, .. } => *index,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        match self {
            ChunkResult::Succeeded { usage, .. } | ChunkResult::Failed { usage, .. } => *usage,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChunkResult::Succeeded { .. })
    }

    pub fn payload(&self) -> Option<&ChunkPayload> {
        match self {
            ChunkResult::Succeeded { payload, .. } => Some(payload),
            ChunkResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ChunkError> {
        match self {
            ChunkResult::Succeeded { .. } => None,
            ChunkResult::Failed { error, .. } => Some(error),
        }
    }
}
