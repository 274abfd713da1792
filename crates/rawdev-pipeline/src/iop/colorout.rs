//! Output color profile.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, mat3_mul};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "colorout";

const TYPE_SRGB: i32 = 0;
const TYPE_LIN_REC2020: i32 = 1;

const REC709_TO_REC2020: [[f32; 3]; 3] = [
    [0.6274, 0.3293, 0.0433],
    [0.0691, 0.9195, 0.0114],
    [0.0164, 0.0880, 0.8956],
];

static FIELDS: [FieldDesc; 2] = [
    FieldDesc::int("type", TYPE_SRGB, 0, 1),
    FieldDesc::int("intent", 0, 0, 3),
];
static LAYOUT: ParamLayout = ParamLayout::new(5, &FIELDS);

/// Converts the working space to the output primaries.
///
/// sRGB shares the working primaries, so only the wide-gamut output does
/// any work here; the transfer curve is applied by the render engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorOut;

impl ModuleKind for ColorOut {
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
        _ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        match params.int("type") {
            TYPE_SRGB => Ok(Box::new(Passthrough)),
            TYPE_LIN_REC2020 => Ok(Box::new(ColorOutKernel {
                matrix: REC709_TO_REC2020,
            })),
            other => Err(ModuleError::Failed {
                module: NAME,
                reason: format!("unsupported output profile type {other}"),
            }),
        }
    }
}

struct ColorOutKernel {
    matrix: [[f32; 3]; 3],
}

impl Kernel for ColorOutKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        input.map_rgba(NAME, |_, _, px| {
            let [r, g, b] = mat3_mul(&self.matrix, [px[0], px[1], px[2]]);
            [r, g, b, px[3]]
        })
    }
}
