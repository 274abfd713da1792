//! Exposure and black point.
//!
//! In manual mode the stored EV is used as is. In deflicker mode the EV is
//! derived from the source image: the chosen percentile of per-pixel
//! maximum channel values is moved to the target level.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, map_color};
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind, decode_legacy, set_field};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::source::SourceImage;
use crate::types::Region;

const NAME: &str = "exposure";

/// `mode` value selecting the deflicker computation.
const MODE_DEFLICKER: i32 = 1;

/// Pixels sampled for the deflicker percentile.
const DEFLICKER_SAMPLES: usize = 1 << 16;

/// Smallest linear value fed to `log2` when deflickering.
const DEFLICKER_FLOOR: f32 = 1.0 / 65536.0;

static FIELDS: [FieldDesc; 7] = [
    FieldDesc::int("mode", 0, 0, 1),
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::float("deflicker_percentile", 50.0, 0.0, 100.0),
    FieldDesc::float("deflicker_target_level", -4.0, -18.0, 18.0),
    FieldDesc::boolean("compensate_exposure_bias", false),
    FieldDesc::boolean("compensate_hilite_pres", true),
];
static LAYOUT: ParamLayout = ParamLayout::new(7, &FIELDS);

// ───────────────────────── historical layouts ─────────────────────────

static V2_FIELDS: [FieldDesc; 3] = [
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::float("gain", 1.0, 0.0, 4.0),
];
static V2: ParamLayout = ParamLayout::new(2, &V2_FIELDS);

static V3_FIELDS: [FieldDesc; 5] = [
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::boolean("deflicker", false),
    FieldDesc::float("deflicker_percentile", 50.0, 0.0, 100.0),
    FieldDesc::float("deflicker_target_level", -4.0, -18.0, 18.0),
];
static V3: ParamLayout = ParamLayout::new(3, &V3_FIELDS);

static V4_FIELDS: [FieldDesc; 6] = [
    FieldDesc::int("mode", 0, 0, 1),
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::float("deflicker_percentile", 50.0, 0.0, 100.0),
    FieldDesc::float("deflicker_target_level", -4.0, -18.0, 18.0),
    FieldDesc::int("deflicker_histogram_source", 0, 0, 1),
];
static V4: ParamLayout = ParamLayout::new(4, &V4_FIELDS);

static V5_FIELDS: [FieldDesc; 5] = [
    FieldDesc::int("mode", 0, 0, 1),
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::float("deflicker_percentile", 50.0, 0.0, 100.0),
    FieldDesc::float("deflicker_target_level", -4.0, -18.0, 18.0),
];
static V5: ParamLayout = ParamLayout::new(5, &V5_FIELDS);

static V6_FIELDS: [FieldDesc; 6] = [
    FieldDesc::int("mode", 0, 0, 1),
    FieldDesc::float("black", 0.0, -1.0, 1.0),
    FieldDesc::float("exposure", 0.0, -18.0, 18.0),
    FieldDesc::float("deflicker_percentile", 50.0, 0.0, 100.0),
    FieldDesc::float("deflicker_target_level", -4.0, -18.0, 18.0),
    FieldDesc::boolean("compensate_exposure_bias", false),
];
static V6: ParamLayout = ParamLayout::new(6, &V6_FIELDS);

/// Linear exposure and black point correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct Exposure;

impl ModuleKind for Exposure {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING
    }

    fn default_enabled(&self) -> bool {
        true
    }

    fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
        match version {
            2 => Some(&V2),
            3 => Some(&V3),
            4 => Some(&V4),
            5 => Some(&V5),
            6 => Some(&V6),
            _ => None,
        }
    }

    fn legacy_upgrade(&self, old_version: u32, old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
        let prev = decode_legacy(self, old_version, old)?;
        if old_version == 6 {
            let mut next = LAYOUT.default_record();
            next.copy_matching(&prev);
            // Highlight preservation was not compensated before version 7.
            set_field(NAME, &mut next, "compensate_hilite_pres", false)?;
            return Ok((next.into_bytes(), 7));
        }

        // Versions 2 to 5 all land on 6; `gain` and the histogram source
        // are dropped.
        let mut next = V6.default_record();
        next.copy_matching(&prev);
        if old_version == 3 {
            set_field(NAME, &mut next, "mode", i32::from(prev.flag("deflicker")))?;
        }
        Ok((next.into_bytes(), 6))
    }

    #[allow(clippy::float_cmp)]
    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let mut exposure = if params.int("mode") == MODE_DEFLICKER {
            deflicker_exposure(
                ctx.image,
                params.float("deflicker_percentile"),
                params.float("deflicker_target_level"),
            )
        } else {
            params.float("exposure")
        };
        if params.flag("compensate_exposure_bias") {
            exposure -= ctx.image.metadata().exposure_bias.unwrap_or(0.0);
        }

        let black = params.float("black");
        if black == 0.0 && exposure == 0.0 {
            return Ok(Box::new(Passthrough));
        }

        let white = (-exposure).exp2();
        let range = white - black;
        if !range.is_finite() || range.abs() < f32::EPSILON {
            return Err(ModuleError::Failed {
                module: NAME,
                reason: format!("black point {black} meets white point {white}"),
            });
        }
        tracing::trace!(module = NAME, exposure, black, "committed");
        Ok(Box::new(ExposureKernel {
            black,
            scale: range.recip(),
        }))
    }
}

/// EV that moves the `percentile` of the image's max-channel values to
/// `target` EV.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn deflicker_exposure(image: &SourceImage, percentile: f32, target: f32) -> f32 {
    let channels = image.channels();
    let pixels = image.samples().len() / channels;
    let step = pixels.div_ceil(DEFLICKER_SAMPLES).max(1);
    let mut values: Vec<f32> = image
        .samples()
        .chunks_exact(channels)
        .step_by(step)
        .map(|px| px.iter().take(3).copied().fold(f32::MIN, f32::max))
        .collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f32::total_cmp);
    let rank = (percentile.clamp(0.0, 100.0) / 100.0 * (values.len() - 1) as f32).round();
    let value = values[rank as usize].max(DEFLICKER_FLOOR);
    target - value.log2()
}

struct ExposureKernel {
    black: f32,
    scale: f32,
}

impl Kernel for ExposureKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        let (black, scale) = (self.black, self.scale);
        map_color(input, |v| (v - black) * scale)
    }
}
