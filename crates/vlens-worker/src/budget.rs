//! Per-model duration budgets.

use vlens_models::ModelTier;

use crate::error::{WorkerError, WorkerResult};

/// How much video one call may carry, and how a longer video is cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkBudget {
    /// Longest video processed in a single call
    pub max_duration_seconds: u32,
    /// Core length of one chunk
    pub chunk_duration_seconds: u32,
    /// Context margin added at each chunk boundary
    pub overlap_seconds: u32,
}

impl ChunkBudget {
    pub fn new(max_duration_seconds: u32, chunk_duration_seconds: u32, overlap_seconds: u32) -> Self {
        Self {
            max_duration_seconds,
            chunk_duration_seconds,
            overlap_seconds,
        }
    }
}

/// Budget for `model` with an overlap of `overlap_fraction` of the chunk duration.
pub fn budget_for(model: ModelTier, overlap_fraction: f64) -> WorkerResult<ChunkBudget> {
    if !(0.0..0.5).contains(&overlap_fraction) {
        return Err(WorkerError::config_error(format!(
            "overlap fraction {} outside [0, 0.5)",
            overlap_fraction
        )));
    }
    let chunk = model.chunk_duration_seconds();
    Ok(ChunkBudget {
        max_duration_seconds: model.max_duration_seconds(),
        chunk_duration_seconds: chunk,
        overlap_seconds: (chunk as f64 * overlap_fraction).round() as u32,
    })
}

/// Budget for a model given by its API id.
pub fn budget_for_model_id(model_id: &str, overlap_fraction: f64) -> WorkerResult<ChunkBudget> {
    let model: ModelTier = model_id.parse()?;
    budget_for(model, overlap_fraction)
}
