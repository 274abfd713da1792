//! Rectangular crop with optional aspect ratio.
//!
//! The rectangle is stored as fractions of the frame reaching the module:
//! `cx`/`cy` are the left and top edges, `cw`/`ch` the right and bottom
//! edges. A ratio of `ratio_d:ratio_n` (width to height) trims the
//! rectangle around its center; a negative `ratio_d` selects the flipped
//! orientation.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::Passthrough;
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind, decode_legacy, restrict};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::roi::align_to_ratio;
use crate::types::Region;

const NAME: &str = "crop";

/// Smallest crop extent, as a fraction of the frame.
const MIN_CROP_SIZE: f64 = 0.01;

static FIELDS: [FieldDesc; 6] = [
    FieldDesc::float("cx", 0.0, 0.0, 1.0),
    FieldDesc::float("cy", 0.0, 0.0, 1.0),
    FieldDesc::float("cw", 1.0, 0.0, 1.0),
    FieldDesc::float("ch", 1.0, 0.0, 1.0),
    FieldDesc::int("ratio_n", -1, -10000, 10000),
    FieldDesc::int("ratio_d", -1, -10000, 10000),
];
static LAYOUT: ParamLayout = ParamLayout::new(3, &FIELDS);

static V1: ParamLayout = ParamLayout::new(1, &FIELDS);

static V2_FIELDS: [FieldDesc; 7] = [
    FieldDesc::float("cx", 0.0, 0.0, 1.0),
    FieldDesc::float("cy", 0.0, 0.0, 1.0),
    FieldDesc::float("cw", 1.0, 0.0, 1.0),
    FieldDesc::float("ch", 1.0, 0.0, 1.0),
    FieldDesc::int("ratio_n", -1, -10000, 10000),
    FieldDesc::int("ratio_d", -1, -10000, 10000),
    FieldDesc::boolean("aligned", false),
];
static V2: ParamLayout = ParamLayout::new(2, &V2_FIELDS);

/// Cuts the frame down to a rectangle.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crop;

impl ModuleKind for Crop {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING | ModuleFlags::ONE_INSTANCE | ModuleFlags::DISTORT
    }

    fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
        match version {
            1 => Some(&V1),
            2 => Some(&V2),
            _ => None,
        }
    }

    fn legacy_upgrade(&self, old_version: u32, old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
        let prev = decode_legacy(self, old_version, old)?;
        let (mut next, version) = match old_version {
            1 => (V2.default_record(), 2),
            _ => (LAYOUT.default_record(), 3),
        };
        next.copy_matching(&prev);
        Ok((next.into_bytes(), version))
    }

    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let frame = ctx.frame;
        let mut rect = crop_rect(&frame, params);
        if let Some((w, h)) = aspect_terms(params.int("ratio_d"), params.int("ratio_n")) {
            rect = align_to_ratio(&rect, w, h);
        }
        if rect.same_rect(&frame) {
            return Ok(Box::new(Passthrough));
        }
        tracing::trace!(module = NAME, ?rect, "committed");
        Ok(Box::new(CropKernel { rect }))
    }
}

/// The unaligned crop rectangle inside `frame`.
#[allow(clippy::cast_possible_truncation)]
fn crop_rect(frame: &Region, params: &ParamRecord) -> Region {
    let axis = |origin: i32, extent: u32, start: f32, end: f32| -> (i64, i64) {
        let extent = f64::from(extent);
        let start = f64::from(start);
        let start = if start.is_finite() { start.clamp(0.0, 1.0 - MIN_CROP_SIZE) } else { 0.0 };
        let end = f64::from(end);
        let end = if end.is_finite() { end.min(1.0).max(start + MIN_CROP_SIZE) } else { 1.0 };
        let lo = (start * extent).round() as i64;
        let hi = ((end * extent).round() as i64).max(lo + 1);
        (i64::from(origin) + lo, i64::from(origin) + hi)
    };
    let (left, right) = axis(frame.x, frame.width, params.float("cx"), params.float("cw"));
    let (top, bottom) = axis(frame.y, frame.height, params.float("cy"), params.float("ch"));
    Region::from_edges(left, top, right, bottom, frame.scale).clamp_to(frame)
}

/// Width and height terms of the stored ratio, `None` for a free crop.
fn aspect_terms(ratio_d: i32, ratio_n: i32) -> Option<(u32, u32)> {
    let n = u32::try_from(ratio_n).ok().filter(|&n| n > 0)?;
    match ratio_d {
        d if d > 0 => Some((d.unsigned_abs(), n)),
        d if d < 0 => Some((n, d.unsigned_abs())),
        _ => None,
    }
}

struct CropKernel {
    rect: Region,
}

impl Kernel for CropKernel {
    fn compute_input_region(&self, requested_output: &Region) -> Region {
        restrict(requested_output, &self.rect)
    }

    fn compute_output_region(&self, resolved_input: &Region) -> Region {
        restrict(resolved_input, &self.rect)
    }

    fn process(&self, input: &PixelBuffer, output: &Region) -> Result<PixelBuffer, ModuleError> {
        Ok(input.extract(output)?)
    }
}
