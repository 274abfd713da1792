//! Input color profile.
//!
//! Converts the source's primaries into the linear Rec. 709 working space.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, mat3_mul};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "colorin";

/// Source already in the working space.
const TYPE_LIN_REC709: i32 = 0;
/// Source in linear Rec. 2020.
const TYPE_LIN_REC2020: i32 = 1;

const REC2020_TO_REC709: [[f32; 3]; 3] = [
    [1.6605, -0.5876, -0.0728],
    [-0.1246, 1.1329, -0.0083],
    [-0.0182, -0.1006, 1.1187],
];

static FIELDS: [FieldDesc; 3] = [
    FieldDesc::int("type", TYPE_LIN_REC709, 0, 1),
    FieldDesc::int("intent", 0, 0, 3),
    FieldDesc::int("normalize", 0, 0, 1),
];
static LAYOUT: ParamLayout = ParamLayout::new(7, &FIELDS);

/// Input profile conversion with optional gamut clipping.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColorIn;

impl ModuleKind for ColorIn {
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
        let matrix = match params.int("type") {
            TYPE_LIN_REC709 => None,
            TYPE_LIN_REC2020 => Some(REC2020_TO_REC709),
            other => {
                return Err(ModuleError::Failed {
                    module: NAME,
                    reason: format!("unsupported input profile type {other}"),
                });
            }
        };
        let clip = params.int("normalize") != 0;
        if matrix.is_none() && !clip {
            return Ok(Box::new(Passthrough));
        }
        Ok(Box::new(ColorInKernel { matrix, clip }))
    }
}

struct ColorInKernel {
    matrix: Option<[[f32; 3]; 3]>,
    clip: bool,
}

impl Kernel for ColorInKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        input.map_rgba(NAME, |_, _, px| {
            let rgb = [px[0], px[1], px[2]];
            let mut rgb = self.matrix.as_ref().map_or(rgb, |m| mat3_mul(m, rgb));
            if self.clip {
                rgb = rgb.map(|v| v.max(0.0));
            }
            [rgb[0], rgb[1], rgb[2], px[3]]
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::iop::testing::{commit, flat, run};
    use crate::params::ParamValue;
    use crate::source::SourceImage;

    #[test]
    fn working_space_passes_through() {
        let img = flat(1, 1, [0.5; 3]);
        assert!(commit(&ColorIn, &ColorIn.default_params(), &img).is_passthrough());
    }

    #[test]
    fn rec2020_keeps_white() {
        let img = flat(1, 1, [1.0; 3]);
        let mut p = ColorIn.default_params();
        p.set("type", ParamValue::Int(TYPE_LIN_REC2020)).unwrap();
        let out = run(&ColorIn, &p, &img);
        for v in &out.pixel(0, 0)[..3] {
            assert!((v - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn normalize_clips_negatives() {
        let img = SourceImage::from_linear(1, 1, 3, vec![-0.5, 0.5, 0.25]).unwrap();
        let mut p = ColorIn.default_params();
        p.set("normalize", ParamValue::Int(1)).unwrap();
        let out = run(&ColorIn, &p, &img);
        assert_eq!(out.pixel(0, 0), &[0.0, 0.5, 0.25, 1.0]);
    }

    #[test]
    fn unknown_type_fails() {
        let img = flat(1, 1, [0.5; 3]);
        let mut p = ColorIn.default_params();
        p.set("type", ParamValue::Int(5)).unwrap();
        let ctx = crate::iop::testing::context(&img);
        assert!(ColorIn.commit_params(&p, &ctx).is_err());
    }
}
