//! Black, gray and white levels.
//!
//! Manual mode maps the stored `levels` triplet. Automatic mode derives
//! the triplet from luminance percentiles of the whole input buffer, so
//! the kernel cannot run tile by tile.
//!
//! The input buffer is what the render asked for: a full render measures
//! the whole frame, a region render measures only that region (at the
//! scale it is rendered at). Automatic levels therefore tone the same
//! pixel differently in a region render and a full render. The
//! percentiles see the output of every module before this one.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::{Passthrough, luminance, map_color};
use crate::module::{CommitContext, Kernel, ModuleKind, decode_legacy};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "levels";

const MODE_MANUAL: i32 = 0;
const MODE_AUTOMATIC: i32 = 1;

static FIELDS: [FieldDesc; 7] = [
    FieldDesc::int("mode", MODE_MANUAL, 0, 1),
    FieldDesc::float("black", 0.0, -100.0, 100.0),
    FieldDesc::float("gray", 50.0, 0.0, 100.0),
    FieldDesc::float("white", 100.0, 0.0, 100.0),
    FieldDesc::float("levels[0]", 0.0, 0.0, 1.0),
    FieldDesc::float("levels[1]", 0.5, 0.0, 1.0),
    FieldDesc::float("levels[2]", 1.0, 0.0, 1.0),
];
static LAYOUT: ParamLayout = ParamLayout::new(2, &FIELDS);

static V1_FIELDS: [FieldDesc; 4] = [
    FieldDesc::float("levels[0]", 0.0, 0.0, 1.0),
    FieldDesc::float("levels[1]", 0.5, 0.0, 1.0),
    FieldDesc::float("levels[2]", 1.0, 0.0, 1.0),
    FieldDesc::int("levels_preset", 0, 0, 10),
];
static V1: ParamLayout = ParamLayout::new(1, &V1_FIELDS);

/// Remaps tones so the black, gray and white levels land on 0, 0.5, 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct Levels;

impl ModuleKind for Levels {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
        (version == 1).then_some(&V1)
    }

    fn legacy_upgrade(&self, old_version: u32, old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
        let prev = decode_legacy(self, old_version, old)?;
        let mut next = LAYOUT.default_record();
        next.copy_matching(&prev);
        Ok((next.into_bytes(), 2))
    }

    #[allow(clippy::float_cmp)]
    fn commit_params(
        &self,
        params: &ParamRecord,
        _ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        match params.int("mode") {
            MODE_AUTOMATIC => Ok(Box::new(LevelsKernel::Automatic {
                percentiles: [
                    params.float("black"),
                    params.float("gray"),
                    params.float("white"),
                ],
            })),
            MODE_MANUAL => {
                let levels = [
                    params.float("levels[0]"),
                    params.float("levels[1]"),
                    params.float("levels[2]"),
                ];
                if levels == [0.0, 0.5, 1.0] {
                    return Ok(Box::new(Passthrough));
                }
                Ok(Box::new(LevelsKernel::Manual(ToneMap::new(levels)?)))
            }
            other => Err(ModuleError::Failed {
                module: NAME,
                reason: format!("unknown mode {other}"),
            }),
        }
    }
}

/// The mapping for one levels triplet.
#[derive(Debug, Clone, Copy)]
struct ToneMap {
    black: f32,
    range: f32,
    gamma: f32,
}

impl ToneMap {
    fn new([black, gray, white]: [f32; 3]) -> Result<Self, ModuleError> {
        let range = white - black;
        let mid = (gray - black) / range;
        if !(range > f32::EPSILON && mid > 0.0 && mid < 1.0) {
            return Err(ModuleError::Failed {
                module: NAME,
                reason: format!("levels {black}, {gray}, {white} are not increasing"),
            });
        }
        Ok(Self {
            black,
            range,
            gamma: 0.5f32.ln() / mid.ln(),
        })
    }

    fn apply(self, v: f32) -> f32 {
        if v <= self.black {
            0.0
        } else {
            ((v - self.black) / self.range).powf(self.gamma)
        }
    }
}

enum LevelsKernel {
    Manual(ToneMap),
    Automatic { percentiles: [f32; 3] },
}

impl Kernel for LevelsKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        let map = match self {
            Self::Manual(map) => *map,
            Self::Automatic { percentiles } => {
                let levels = auto_levels(input, *percentiles);
                match ToneMap::new(levels) {
                    Ok(map) => map,
                    Err(error) => {
                        tracing::debug!(module = NAME, %error, "flat input, levels left as is");
                        return Ok(input.clone());
                    }
                }
            }
        };
        map_color(input, |v| map.apply(v))
    }
}

/// Luminance at each of three percentiles of `input`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn auto_levels(input: &PixelBuffer, percentiles: [f32; 3]) -> [f32; 3] {
    let mut lum: Vec<f32> = match input.channels() {
        1 => input.data().to_vec(),
        ch => input
            .data()
            .chunks_exact(ch)
            .map(|px| luminance([px[0], px[1], px[2]]))
            .collect(),
    };
    lum.sort_unstable_by(f32::total_cmp);
    let last = lum.len().saturating_sub(1);
    percentiles.map(|p| {
        let rank = (p.clamp(0.0, 100.0) / 100.0 * last as f32).round() as usize;
        lum.get(rank.min(last)).copied().unwrap_or(0.0)
    })
}
