//! Unsharp mask on luminance.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, luminance};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "sharpen";

static FIELDS: [FieldDesc; 3] = [
    FieldDesc::float("radius", 2.0, 0.0, 99.0),
    FieldDesc::float("amount", 0.5, 0.0, 2.0),
    FieldDesc::float("threshold", 0.5, 0.0, 100.0),
];
static LAYOUT: ParamLayout = ParamLayout::new(1, &FIELDS);

/// Adds back the difference between luminance and its box blur.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sharpen;

impl ModuleKind for Sharpen {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::float_cmp
    )]
    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let radius = params.float("radius").clamp(0.0, 99.0) * ctx.scale;
        let amount = params.float("amount");
        let radius = if radius.is_finite() { radius.ceil() as u32 } else { 0 };
        if radius == 0 || amount == 0.0 || !amount.is_finite() {
            return Ok(Box::new(Passthrough));
        }
        Ok(Box::new(SharpenKernel {
            radius,
            amount,
            threshold: params.float("threshold").max(0.0) / 100.0,
        }))
    }
}

struct SharpenKernel {
    radius: u32,
    amount: f32,
    threshold: f32,
}

impl Kernel for SharpenKernel {
    fn overlap(&self) -> u32 {
        self.radius
    }

    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        input.require_channels(NAME, 4)?;
        let width = input.region().width as usize;
        let height = input.region().height as usize;
        let lum: Vec<f32> = input
            .data()
            .chunks_exact(4)
            .map(|px| luminance([px[0], px[1], px[2]]))
            .collect();
        let blurred = box_blur(&lum, width, height, self.radius as usize);

        let mut out = PixelBuffer::new(*input.region(), 4)?;
        for ((src, dst), (l, b)) in input
            .data()
            .chunks_exact(4)
            .zip(out.data_mut().chunks_exact_mut(4))
            .zip(lum.iter().zip(&blurred))
        {
            dst.copy_from_slice(src);
            let detail = l - b;
            if detail.abs() <= self.threshold {
                continue;
            }
            let boost = self.amount * (detail - self.threshold.copysign(detail));
            for v in &mut dst[..3] {
                *v += boost;
            }
        }
        Ok(out)
    }
}

/// Separable box blur of radius `r`, clamping reads at the plane edges.
#[allow(clippy::cast_precision_loss)]
fn box_blur(plane: &[f32], width: usize, height: usize, r: usize) -> Vec<f32> {
    let norm = (2 * r + 1) as f32;
    let mut rows = vec![0.0; plane.len()];
    for y in 0..height {
        let row = &plane[y * width..(y + 1) * width];
        for x in 0..width {
            let sum: f32 = (0..=2 * r)
                .map(|k| row[(x + k).saturating_sub(r).min(width - 1)])
                .sum();
            rows[y * width + x] = sum / norm;
        }
    }
    let mut out = vec![0.0; plane.len()];
    for y in 0..height {
        for x in 0..width {
            let sum: f32 = (0..=2 * r)
                .map(|k| rows[(y + k).saturating_sub(r).min(height - 1) * width + x])
                .sum();
            out[y * width + x] = sum / norm;
        }
    }
    out
}
