//! Chunk planning.
//!
//! Cores tile `[0, total)` exactly; extracts widen each core by the overlap
//! margin, clamped to the video.

use vlens_models::ChunkDescriptor;

use crate::budget::ChunkBudget;
use crate::error::{WorkerError, WorkerResult};

/// Cut a video of `total_duration_seconds` into chunks for `budget`.
pub fn plan(total_duration_seconds: u32, budget: &ChunkBudget) -> WorkerResult<Vec<ChunkDescriptor>> {
    if total_duration_seconds < 1 {
        return Err(WorkerError::InvalidDuration(total_duration_seconds));
    }

    if total_duration_seconds <= budget.max_duration_seconds {
        return Ok(vec![ChunkDescriptor {
            index: 0,
            core_start_seconds: 0,
            core_end_seconds: total_duration_seconds,
            extract_start_seconds: 0,
            extract_end_seconds: total_duration_seconds,
        }]);
    }

    if budget.chunk_duration_seconds == 0 {
        return Err(WorkerError::config_error("chunk duration must be non-zero"));
    }

    let mut chunks = Vec::with_capacity(
        total_duration_seconds.div_ceil(budget.chunk_duration_seconds) as usize,
    );
    let mut cursor = 0u32;
    let mut index = 0u32;

    while cursor < total_duration_seconds {
        let core_end = cursor
            .saturating_add(budget.chunk_duration_seconds)
            .min(total_duration_seconds);
        chunks.push(ChunkDescriptor {
            index,
            core_start_seconds: cursor,
            core_end_seconds: core_end,
            extract_start_seconds: cursor.saturating_sub(budget.overlap_seconds),
            extract_end_seconds: core_end
                .saturating_add(budget.overlap_seconds)
                .min(total_duration_seconds),
        });
        cursor = core_end;
        index += 1;
    }

    Ok(chunks)
}
