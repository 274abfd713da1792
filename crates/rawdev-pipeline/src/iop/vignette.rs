//! Radial brightness and saturation falloff.
//!
//! Distances are measured in the frame reaching the module, so the
//! effect stays put under any render scale and tile layout.

use std::f32::consts::PI;

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::Passthrough;
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind, decode_legacy, set_field};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "vignette";

/// Lowest usable shape exponent.
const MIN_SHAPE: f32 = 0.05;

static FIELDS: [FieldDesc; 11] = [
    FieldDesc::float("scale", 80.0, 0.0, 100.0),
    FieldDesc::float("falloff_scale", 50.0, 0.0, 100.0),
    FieldDesc::float("brightness", -0.5, -1.0, 1.0),
    FieldDesc::float("saturation", -0.5, -1.0, 1.0),
    FieldDesc::float("center.x", 0.0, -1.0, 1.0),
    FieldDesc::float("center.y", 0.0, -1.0, 1.0),
    FieldDesc::boolean("autoratio", false),
    FieldDesc::float("whratio", 1.0, 0.0, 2.0),
    FieldDesc::float("shape", 1.0, 0.0, 5.0),
    FieldDesc::int("dithering", 0, 0, 2),
    FieldDesc::boolean("unbound", true),
];
static LAYOUT: ParamLayout = ParamLayout::new(4, &FIELDS);

static V3_FIELDS: [FieldDesc; 10] = [
    FieldDesc::float("scale", 80.0, 0.0, 100.0),
    FieldDesc::float("falloff_scale", 50.0, 0.0, 100.0),
    FieldDesc::float("brightness", -0.5, -1.0, 1.0),
    FieldDesc::float("saturation", -0.5, -1.0, 1.0),
    FieldDesc::float("center.x", 0.0, -1.0, 1.0),
    FieldDesc::float("center.y", 0.0, -1.0, 1.0),
    FieldDesc::boolean("autoratio", false),
    FieldDesc::float("whratio", 1.0, 0.0, 2.0),
    FieldDesc::float("shape", 1.0, 0.0, 5.0),
    FieldDesc::int("dithering", 0, 0, 2),
];
static V3: ParamLayout = ParamLayout::new(3, &V3_FIELDS);

static V2_FIELDS: [FieldDesc; 9] = [
    FieldDesc::float("scale", 80.0, 0.0, 100.0),
    FieldDesc::float("falloff_scale", 50.0, 0.0, 100.0),
    FieldDesc::float("brightness", -0.5, -1.0, 1.0),
    FieldDesc::float("saturation", -0.5, -1.0, 1.0),
    FieldDesc::float("center.x", 0.0, -1.0, 1.0),
    FieldDesc::float("center.y", 0.0, -1.0, 1.0),
    FieldDesc::boolean("autoratio", false),
    FieldDesc::float("whratio", 1.0, 0.0, 2.0),
    FieldDesc::float("shape", 1.0, 0.0, 5.0),
];
static V2: ParamLayout = ParamLayout::new(2, &V2_FIELDS);

/// Darkens or brightens toward the frame edges.
#[derive(Debug, Clone, Copy, Default)]
pub struct Vignette;

impl ModuleKind for Vignette {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING
    }

    fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
        match version {
            2 => Some(&V2),
            3 => Some(&V3),
            _ => None,
        }
    }

    fn legacy_upgrade(&self, old_version: u32, old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
        let prev = decode_legacy(self, old_version, old)?;
        let mut next = LAYOUT.default_record();
        next.copy_matching(&prev);
        // Older versions always clipped their output.
        set_field(NAME, &mut next, "unbound", false)?;
        Ok((next.into_bytes(), 4))
    }

    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let brightness = params.float("brightness");
        let saturation = params.float("saturation");
        if brightness == 0.0 && saturation == 0.0 {
            return Ok(Box::new(Passthrough));
        }

        let frame = ctx.frame;
        let (w, h) = (frame.width as f32, frame.height as f32);
        let (xscale, yscale) = if params.flag("autoratio") {
            (2.0 / w, 2.0 / h)
        } else {
            let basis = 2.0 / w.max(h);
            let whratio = params.float("whratio").clamp(0.01, 1.99);
            if whratio <= 1.0 {
                (basis / whratio, basis)
            } else {
                (basis, basis / (2.0 - whratio))
            }
        };
        let shape = params.float("shape").max(MIN_SHAPE);

        Ok(Box::new(VignetteKernel {
            origin_x: frame.x as f32 + w * 0.5 * (1.0 + params.float("center.x")),
            origin_y: frame.y as f32 + h * 0.5 * (1.0 + params.float("center.y")),
            xscale,
            yscale,
            inner: params.float("scale") / 100.0,
            falloff: (params.float("falloff_scale") / 100.0).max(1.0 / w.max(h)),
            exp1: 2.0 / shape,
            exp2: shape / 2.0,
            brightness,
            saturation,
            unbound: params.flag("unbound"),
        }))
    }
}

struct VignetteKernel {
    origin_x: f32,
    origin_y: f32,
    xscale: f32,
    yscale: f32,
    inner: f32,
    falloff: f32,
    exp1: f32,
    exp2: f32,
    brightness: f32,
    saturation: f32,
    unbound: bool,
}

impl VignetteKernel {
    /// Effect weight at frame pixel `(x, y)`, 0 inside, 1 fully outside.
    #[allow(clippy::cast_precision_loss)]
    fn weight(&self, x: i64, y: i64) -> f32 {
        let dx = ((x as f32 + 0.5 - self.origin_x) * self.xscale).abs();
        let dy = ((y as f32 + 0.5 - self.origin_y) * self.yscale).abs();
        let dist = (dx.powf(self.exp1) + dy.powf(self.exp1)).powf(self.exp2);
        if dist <= self.inner {
            0.0
        } else if dist >= self.inner + self.falloff {
            1.0
        } else {
            let t = (dist - self.inner) / self.falloff;
            0.5 - (PI * t).cos() * 0.5
        }
    }
}

impl Kernel for VignetteKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        input.map_rgba(NAME, |x, y, px| {
            let weight = self.weight(x, y);
            let mut rgb = [px[0], px[1], px[2]];
            if self.brightness < 0.0 {
                rgb = rgb.map(|v| v * self.brightness.mul_add(weight, 1.0));
            } else {
                rgb = rgb.map(|v| self.brightness.mul_add(weight, v));
            }
            let mean = (rgb[0] + rgb[1] + rgb[2]) / 3.0;
            let sat = self.saturation.mul_add(weight, 1.0);
            rgb = rgb.map(|v| (v - mean).mul_add(sat, mean));
            if !self.unbound {
                rgb = rgb.map(|v| v.clamp(0.0, 1.0));
            }
            [rgb[0], rgb[1], rgb[2], px[3]]
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::iop::testing::{commit, flat, run};
    use crate::params::ParamValue;

    #[test]
    fn darkens_corners_not_center() {
        let img = flat(41, 41, [0.5; 3]);
        let out = run(&Vignette, &Vignette.default_params(), &img);
        assert!((out.pixel(20, 20)[0] - 0.5).abs() < 1e-6);
        assert!(out.pixel(0, 0)[0] < 0.5);
        assert!(out.pixel(0, 0)[0] >= 0.25 - 1e-6);
    }

    #[test]
    fn zero_strength_is_passthrough() {
        let img = flat(4, 4, [0.5; 3]);
        let mut p = Vignette.default_params();
        p.set("brightness", ParamValue::Float(0.0)).unwrap();
        p.set("saturation", ParamValue::Float(0.0)).unwrap();
        assert!(commit(&Vignette, &p, &img).is_passthrough());
    }

    #[test]
    fn bound_output_is_clipped() {
        let img = flat(21, 21, [0.9; 3]);
        let mut p = Vignette.default_params();
        p.set("brightness", ParamValue::Float(1.0)).unwrap();
        p.set("unbound", ParamValue::Bool(false)).unwrap();
        let out = run(&Vignette, &p, &img);
        assert_eq!(out.pixel(0, 0)[0], 1.0);
    }

    #[test]
    fn upgrades_clip_output() {
        for (layout, version) in [(&V2, 2), (&V3, 3)] {
            let mut old = layout.default_record();
            old.set("scale", ParamValue::Float(60.0)).unwrap();
            let (blob, next) = Vignette.legacy_upgrade(version, old.as_bytes()).unwrap();
            assert_eq!(next, 4);
            let record = LAYOUT.decode(&blob).unwrap();
            assert_eq!(record.float("scale"), 60.0);
            assert!(!record.flag("unbound"));
        }
    }
}
