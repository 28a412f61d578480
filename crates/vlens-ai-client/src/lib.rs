//! Remote analysis collaborators.
//!
//! This crate provides:
//! - The `AnalysisBackend` and `MediaExtractor` contracts the pipeline drives
//! - The remote error taxonomy with transient/permanent classification
//! - A Gemini REST implementation of both contracts

pub mod backend;
pub mod error;
pub mod gemini;
pub mod types;

pub use backend::{AnalysisBackend, MediaExtractor};
pub use error::{AnalysisError, AnalysisResult};
pub use gemini::{GeminiClient, GeminiConfig, OffsetClipExtractor};
pub use types::{AnalysisRequest, AnalysisResponse, ContentHandle};
