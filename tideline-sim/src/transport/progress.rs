//! Deterministic progress counters for body delivery.

use crate::deterministic::DeterministicRng;

/// Upper bound on progress events per body.
pub const MAX_PROGRESS_EVENTS: u64 = 64;

/// Returns the `loaded` value of each progress event for a body of `total` bytes.
///
/// Values strictly increase and end at `total`. An empty body yields a single
/// `0`. Chunk sizes are drawn from `rng` between the size needed to stay under
/// [`MAX_PROGRESS_EVENTS`] and `max_chunk`.
pub fn progress_marks(rng: &mut DeterministicRng, total: u64, max_chunk: u64) -> Vec<u64> {
    if total == 0 {
        return vec![0];
    }

    let min_chunk = total.div_ceil(MAX_PROGRESS_EVENTS).max(1);
    let max_chunk = max_chunk.max(min_chunk);

    let mut marks = Vec::new();
    let mut loaded = 0;
    while loaded < total {
        let chunk = rng.random_range(min_chunk, max_chunk.saturating_add(1));
        loaded = loaded.saturating_add(chunk).min(total);
        marks.push(loaded);
    }
    marks
}
