//! Sensor margins and black/white point normalization.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, map_color};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind, restrict};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "rawprepare";

/// Full scale of the stored black and white points.
const RAW_RANGE: f32 = 65535.0;

static FIELDS: [FieldDesc; 7] = [
    FieldDesc::int("left", 0, 0, 10000),
    FieldDesc::int("top", 0, 0, 10000),
    FieldDesc::int("right", 0, 0, 10000),
    FieldDesc::int("bottom", 0, 0, 10000),
    FieldDesc::uint("raw_black_level", 0, 0, 65535),
    FieldDesc::uint("raw_white_point", 65535, 0, 65535),
    FieldDesc::int("flat_field", 0, 0, 1),
];
static LAYOUT: ParamLayout = ParamLayout::new(2, &FIELDS);

/// Crops sensor margins and rescales `[black, white]` to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPrepare;

impl ModuleKind for RawPrepare {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING | ModuleFlags::ONE_INSTANCE | ModuleFlags::DISTORT
    }

    fn default_enabled(&self) -> bool {
        true
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let margin = |name: &str| (f64::from(params.int(name)) * f64::from(ctx.scale)).round() as i64;
        let frame = ctx.frame;
        let rect = Region::from_edges(
            i64::from(frame.x) + margin("left"),
            i64::from(frame.y) + margin("top"),
            frame.right() - margin("right"),
            frame.bottom() - margin("bottom"),
            frame.scale,
        )
        .clamp_to(&frame);

        let black = params.uint("raw_black_level");
        let white = params.uint("raw_white_point");
        if white <= black {
            return Err(ModuleError::Failed {
                module: NAME,
                reason: format!("white point {white} is not above black level {black}"),
            });
        }
        if params.int("flat_field") != 0 {
            tracing::warn!(module = NAME, "flat field correction needs raw data, ignored");
        }

        let identity = black == 0 && white == 65535;
        if identity && rect.same_rect(&frame) {
            return Ok(Box::new(Passthrough));
        }
        Ok(Box::new(RawPrepareKernel {
            rect,
            black: black as f32 / RAW_RANGE,
            gain: RAW_RANGE / (white - black) as f32,
            identity,
        }))
    }
}

struct RawPrepareKernel {
    rect: Region,
    black: f32,
    gain: f32,
    identity: bool,
}

impl Kernel for RawPrepareKernel {
    fn compute_input_region(&self, requested_output: &Region) -> Region {
        restrict(requested_output, &self.rect)
    }

    fn compute_output_region(&self, resolved_input: &Region) -> Region {
        restrict(resolved_input, &self.rect)
    }

    fn process(&self, input: &PixelBuffer, output: &Region) -> Result<PixelBuffer, ModuleError> {
        let cropped = input.extract(output)?;
        if self.identity {
            return Ok(cropped);
        }
        let (black, gain) = (self.black, self.gain);
        map_color(&cropped, |v| (v - black) * gain)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::iop::testing::{commit, flat, rect, run};
    use crate::params::ParamValue;

    #[test]
    fn defaults_are_passthrough() {
        let img = flat(8, 8, [0.5; 3]);
        assert!(commit(&RawPrepare, &RawPrepare.default_params(), &img).is_passthrough());
    }

    #[test]
    fn margins_crop_the_frame() {
        let img = flat(20, 10, [0.5; 3]);
        let mut p = RawPrepare.default_params();
        p.set("left", ParamValue::Int(2)).unwrap();
        p.set("bottom", ParamValue::Int(3)).unwrap();
        let k = commit(&RawPrepare, &p, &img);
        let out = k.compute_output_region(&Region::new(0, 0, 20, 10, 1.0));
        assert_eq!(rect(&out), (2, 0, 18, 7));
        assert!(!k.is_passthrough());
    }

    #[test]
    fn normalizes_black_and_white() {
        let img = flat(2, 2, [0.5; 3]);
        let mut p = RawPrepare.default_params();
        p.set("raw_black_level", ParamValue::UInt(16383)).unwrap();
        p.set("raw_white_point", ParamValue::UInt(49151)).unwrap();
        let out = run(&RawPrepare, &p, &img);
        let expected = (0.5 - 16383.0 / 65535.0) * 65535.0 / 32768.0;
        assert!((out.pixel(0, 0)[0] - expected).abs() < 1e-5);
        assert!((out.pixel(0, 0)[3] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn inverted_points_fail() {
        let img = flat(2, 2, [0.5; 3]);
        let mut p = RawPrepare.default_params();
        p.set("raw_white_point", ParamValue::UInt(0)).unwrap();
        let ctx = crate::iop::testing::context(&img);
        assert!(matches!(
            RawPrepare.commit_params(&p, &ctx),
            Err(ModuleError::Failed { .. })
        ));
    }
}
