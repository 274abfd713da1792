//! Expansion of single-channel sensor data to RGBA.
//!
//! Sources reach the pipeline already demosaiced or as plain luminance.
//! This stage turns the latter into gray RGBA so that every later stage
//! sees four channels; color sources pass straight through. The method
//! fields are kept so histories written against real sensor data still
//! round-trip.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::Passthrough;
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "demosaic";

static FIELDS: [FieldDesc; 6] = [
    FieldDesc::int("green_eq", 0, 0, 3),
    FieldDesc::float("median_thrs", 0.0, 0.0, 1.0),
    FieldDesc::int("color_smoothing", 0, 0, 5),
    FieldDesc::int("demosaicing_method", 0, 0, 7),
    FieldDesc::int("lmmse_refine", 1, 0, 4),
    FieldDesc::float("dual_thrs", 0.2, 0.0, 1.0),
];
static LAYOUT: ParamLayout = ParamLayout::new(6, &FIELDS);

/// Promotes monochrome input to RGBA.
#[derive(Debug, Clone, Copy, Default)]
pub struct Demosaic;

impl ModuleKind for Demosaic {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING | ModuleFlags::ONE_INSTANCE
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        if ctx.image.channels() != 1 {
            return Ok(Box::new(Passthrough));
        }
        tracing::trace!(
            module = NAME,
            method = params.int("demosaicing_method"),
            "expanding monochrome source"
        );
        Ok(Box::new(Expand))
    }
}

struct Expand;

impl Kernel for Expand {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        if input.channels() == 4 {
            return Ok(input.clone());
        }
        input.require_channels(NAME, 1)?;
        let mut out = PixelBuffer::new(*input.region(), 4)?;
        for (v, px) in input.data().iter().zip(out.data_mut().chunks_exact_mut(4)) {
            px.copy_from_slice(&[*v, *v, *v, 1.0]);
        }
        Ok(out)
    }
}
