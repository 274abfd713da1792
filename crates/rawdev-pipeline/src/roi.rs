//! Region-of-interest resolution across the module chain.
//!
//! Two passes over the committed kernels of the enabled modules:
//!
//! 1. **Backward**, last to first: each kernel maps the region it is asked
//!    to produce to the region it must receive.
//! 2. **Forward**, first to last: starting from the region the first kernel
//!    needs (clamped to what is available), each kernel reports the region
//!    it actually produces. This pass is authoritative for buffer sizes.
//!
//! Cropping kernels share the aspect-ratio alignment helpers defined here.

use crate::error::EngineError;
use crate::module::Kernel;
use crate::types::{Dimensions, Region};

/// Largest reduced ratio term that is aligned exactly.
pub const MAX_ALIGNER: u32 = 16;

/// Resolved regions of one kernel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepRegions {
    /// Region the backward pass asked this kernel to consume.
    pub requested_input: Region,
    /// Region the kernel receives.
    pub input: Region,
    /// Region the kernel produces.
    pub output: Region,
}

/// Result of resolving a request against a run of kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Region fed to the first kernel (taken from the source or from the
    /// previous buffer).
    pub source: Region,
    /// Regions per kernel, in chain order.
    pub steps: Vec<StepRegions>,
    /// Region produced by the last kernel (equal to `source` when there
    /// are no kernels).
    pub output: Region,
}

impl Plan {
    /// Estimated peak bytes of any single step: its input plus its output
    /// buffer, `channels` samples of four bytes per pixel. Saturates at
    /// `usize::MAX`.
    #[must_use]
    pub fn peak_bytes(&self, channels: usize) -> usize {
        let bytes = |r: &Region| {
            r.area()
                .saturating_mul(channels)
                .saturating_mul(std::mem::size_of::<f32>())
        };
        self.steps
            .iter()
            .map(|s| bytes(&s.input).saturating_add(bytes(&s.output)))
            .max()
            .unwrap_or_else(|| bytes(&self.source))
    }
}

/// Resolve `requested` through `kernels`.
///
/// The backward result for the first kernel is clamped to `available`
/// (the region the source or the previous buffer can supply) before the
/// forward pass begins.
#[must_use]
pub fn resolve(kernels: &[&dyn Kernel], requested: &Region, available: &Region) -> Plan {
    let mut requested_inputs = vec![*requested; kernels.len()];
    let mut want = *requested;
    for (slot, kernel) in requested_inputs.iter_mut().zip(kernels).rev() {
        want = kernel.compute_input_region(&want);
        *slot = want;
    }

    let source = want.clamp_to(available);
    let mut input = source;
    let mut steps = Vec::with_capacity(kernels.len());
    for (kernel, requested_input) in kernels.iter().zip(requested_inputs) {
        if !input.same_rect(&requested_input) {
            tracing::trace!(?requested_input, actual = ?input, "forward pass adjusted input");
        }
        let output = kernel.compute_output_region(&input);
        steps.push(StepRegions {
            requested_input,
            input,
            output,
        });
        input = output;
    }
    Plan {
        source,
        steps,
        output: input,
    }
}

/// Validate a scale factor and the full frame it produces.
///
/// # Errors
///
/// [`EngineError::InvalidArgument`] if `scale` is not a positive finite
/// number or the scaled frame would be narrower than one pixel.
pub fn full_request(dims: Dimensions, scale: f32) -> Result<Region, EngineError> {
    check_scale(scale)?;
    check_extent(i64::from(dims.width), i64::from(dims.height), scale)?;
    Ok(dims.scaled(scale).full_region(scale))
}

/// Turn a caller's full-resolution rectangle into a region at `scale`.
///
/// The rectangle is clamped to the image before scaling. The result is
/// `floor(x·s), floor(y·s), floor(w·s), floor(h·s)` for requests inside
/// the image; a request entirely outside collapses onto the nearest edge
/// pixel.
///
/// # Errors
///
/// [`EngineError::InvalidArgument`] if `scale` is not positive and
/// finite, or `width·scale` or `height·scale` is below one.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn region_request(
    dims: Dimensions,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    scale: f32,
) -> Result<Region, EngineError> {
    check_scale(scale)?;
    check_extent(i64::from(width), i64::from(height), scale)?;

    let (w, h) = (i64::from(dims.width), i64::from(dims.height));
    let x0 = i64::from(x).clamp(0, w);
    let y0 = i64::from(y).clamp(0, h);
    let x1 = (i64::from(x) + i64::from(width)).clamp(0, w);
    let y1 = (i64::from(y) + i64::from(height)).clamp(0, h);

    let s = f64::from(scale);
    let sx = (x0 as f64 * s).floor() as i64;
    let sy = (y0 as f64 * s).floor() as i64;
    let sw = ((x1 - x0).max(0) as f64 * s).floor() as i64;
    let sh = ((y1 - y0).max(0) as f64 * s).floor() as i64;

    let frame = dims.scaled(scale).full_region(scale);
    Ok(Region::from_edges(sx, sy, sx + sw.max(1), sy + sh.max(1), scale).clamp_to(&frame))
}

fn check_scale(scale: f32) -> Result<(), EngineError> {
    if scale.is_finite() && scale > 0.0 {
        Ok(())
    } else {
        Err(EngineError::invalid(format!(
            "scale must be positive and finite, got {scale}"
        )))
    }
}

#[allow(clippy::cast_precision_loss)]
fn check_extent(width: i64, height: i64, scale: f32) -> Result<(), EngineError> {
    let s = f64::from(scale);
    if (width as f64) * s < 1.0 || (height as f64) * s < 1.0 {
        return Err(EngineError::invalid(format!(
            "region {width}x{height} at scale {scale} is smaller than one pixel"
        )));
    }
    Ok(())
}

// ───────────────────────── aspect alignment ──────────────────────────

/// Reduce a `w:h` ratio by common factors 7 down to 2.
///
/// Returns the reduced terms when both are at most [`MAX_ALIGNER`] and the
/// ratio is not `1:1`; such ratios can be matched exactly by trimming to a
/// whole multiple of the terms. Others return `None`.
#[must_use]
pub fn reduce_aligners(w: u32, h: u32) -> Option<(u32, u32)> {
    let mut aw = w.max(1);
    let mut ah = h.max(1);
    for factor in (2..=7).rev() {
        while aw % factor == 0 && ah % factor == 0 {
            aw /= factor;
            ah /= factor;
        }
    }
    (aw <= MAX_ALIGNER && ah <= MAX_ALIGNER && (aw > 1 || ah > 1)).then_some((aw, ah))
}

/// Trim `rect` to the aspect ratio `ratio_w:ratio_h`, centered.
///
/// Small reducible ratios give an exact multiple of the reduced terms;
/// anything else is trimmed to the nearest whole pixel of the float ratio.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn align_to_ratio(rect: &Region, ratio_w: u32, ratio_h: u32) -> Region {
    if ratio_w == 0 || ratio_h == 0 {
        return *rect;
    }
    let (w, h) = (i64::from(rect.width), i64::from(rect.height));

    let exact = reduce_aligners(ratio_w, ratio_h).and_then(|(aw, ah)| {
        let (aw, ah) = (i64::from(aw), i64::from(ah));
        let k = (w / aw).min(h / ah);
        (k > 0).then_some((k * aw, k * ah))
    });

    let (new_w, new_h) = exact.unwrap_or_else(|| {
        let ratio = f64::from(ratio_w) / f64::from(ratio_h);
        if (w as f64) / (h as f64) > ratio {
            (((h as f64) * ratio).round().max(1.0) as i64, h)
        } else {
            (w, ((w as f64) / ratio).round().max(1.0) as i64)
        }
    });

    let left = i64::from(rect.x) + (w - new_w) / 2;
    let top = i64::from(rect.y) + (h - new_h) / 2;
    Region::from_edges(left, top, left + new_w, top + new_h, rect.scale)
}
