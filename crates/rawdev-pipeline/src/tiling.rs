//! Splitting a render into tiles under a memory ceiling.
//!
//! The chain is cut into segments: maximal runs of tileable kernels, and
//! each non-tileable kernel on its own. Tiled segments cover their output
//! with a grid of cores; each core is padded by the segment's summed
//! kernel overlap so that pixels near a core edge see the same
//! neighborhood as in an untiled render.

use std::ops::Range;

use crate::roi::Plan;
use crate::types::{EngineConfig, Region};

/// Bytes one pixel costs in a step: RGBA `f32` input plus output.
pub const BYTES_PER_PIXEL_STEP: usize = 2 * 4 * std::mem::size_of::<f32>();

/// A run of consecutive kernels executed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Kernel indices covered.
    pub range: Range<usize>,
    /// Whether the run goes tile by tile.
    pub tiled: bool,
}

/// Whether `plan` must be split to stay under the configured ceiling.
#[must_use]
pub fn needs_tiling(plan: &Plan, config: &EngineConfig) -> bool {
    config.tiling && plan.peak_bytes(4) > config.tile_memory_limit
}

/// Cut a chain into segments from each kernel's tileable flag.
#[must_use]
pub fn segments(tileable: &[bool]) -> Vec<Segment> {
    let mut out: Vec<Segment> = Vec::new();
    for (index, &tiled) in tileable.iter().enumerate() {
        match out.last_mut() {
            Some(last) if tiled && last.tiled => last.range.end = index + 1,
            _ => out.push(Segment {
                range: index..index + 1,
                tiled,
            }),
        }
    }
    out
}

/// Side of a square tile core.
///
/// Sized so that a padded tile's input and output fit `limit`, never below
/// `min_side`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn core_side(limit: usize, min_side: u32, overlap: u32) -> u32 {
    let padded = ((limit / BYTES_PER_PIXEL_STEP) as f64).sqrt() as u64;
    let core = padded.saturating_sub(2 * u64::from(overlap));
    u32::try_from(core).unwrap_or(u32::MAX).max(min_side.max(1))
}

/// Cover `area` with cores of at most `side x side` pixels, row by row.
#[must_use]
pub fn grid(area: &Region, side: u32) -> Vec<Region> {
    let side = i64::from(side.max(1));
    let mut cores = Vec::new();
    let mut top = i64::from(area.y);
    while top < area.bottom() {
        let bottom = (top + side).min(area.bottom());
        let mut left = i64::from(area.x);
        while left < area.right() {
            let right = (left + side).min(area.right());
            cores.push(Region::from_edges(left, top, right, bottom, area.scale));
            left = right;
        }
        top = bottom;
    }
    cores
}
