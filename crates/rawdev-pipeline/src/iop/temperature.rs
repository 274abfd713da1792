//! White balance as per-channel multipliers.

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::iop::Passthrough;
use crate::module::{CommitContext, Kernel, ModuleFlags, ModuleKind, decode_legacy, set_field};
use crate::params::{FieldDesc, ParamLayout, ParamRecord};
use crate::types::Region;

const NAME: &str = "temperature";

static FIELDS: [FieldDesc; 5] = [
    FieldDesc::float("red", 1.0, 0.0, 8.0),
    FieldDesc::float("green", 1.0, 0.0, 8.0),
    FieldDesc::float("blue", 1.0, 0.0, 8.0),
    FieldDesc::float("various", 1.0, 0.0, 8.0),
    FieldDesc::int("preset", 0, -1, 4),
];
static LAYOUT: ParamLayout = ParamLayout::new(4, &FIELDS);

static V2_FIELDS: [FieldDesc; 4] = [
    FieldDesc::float("temp_out", 5000.0, 2000.0, 50000.0),
    FieldDesc::float("coeffs[0]", 1.0, 0.0, 8.0),
    FieldDesc::float("coeffs[1]", 1.0, 0.0, 8.0),
    FieldDesc::float("coeffs[2]", 1.0, 0.0, 8.0),
];
static V2: ParamLayout = ParamLayout::new(2, &V2_FIELDS);

static V3_FIELDS: [FieldDesc; 4] = [
    FieldDesc::float("red", 1.0, 0.0, 8.0),
    FieldDesc::float("green", 1.0, 0.0, 8.0),
    FieldDesc::float("blue", 1.0, 0.0, 8.0),
    FieldDesc::float("various", 1.0, 0.0, 8.0),
];
static V3: ParamLayout = ParamLayout::new(3, &V3_FIELDS);

/// Multiplies red, green and blue by their coefficients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Temperature;

impl ModuleKind for Temperature {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &'static ParamLayout {
        &LAYOUT
    }

    fn flags(&self) -> ModuleFlags {
        ModuleFlags::ALLOW_TILING | ModuleFlags::ONE_INSTANCE
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
        match old_version {
            2 => {
                // The fourth coefficient did not exist yet.
                let mut next = V3.default_record();
                set_field(NAME, &mut next, "red", prev.float("coeffs[0]"))?;
                set_field(NAME, &mut next, "green", prev.float("coeffs[1]"))?;
                set_field(NAME, &mut next, "blue", prev.float("coeffs[2]"))?;
                set_field(NAME, &mut next, "various", f32::NAN)?;
                Ok((next.into_bytes(), 3))
            }
            _ => {
                let mut next = LAYOUT.default_record();
                next.copy_matching(&prev);
                // Coefficients from before presets existed are user-set.
                set_field(NAME, &mut next, "preset", -1)?;
                Ok((next.into_bytes(), 4))
            }
        }
    }

    fn commit_params(
        &self,
        params: &ParamRecord,
        _ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError> {
        let coeffs = [params.float("red"), params.float("green"), params.float("blue")];
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(ModuleError::Failed {
                module: NAME,
                reason: format!("non-finite coefficients {coeffs:?}"),
            });
        }
        if coeffs.iter().all(|&c| (c - 1.0).abs() < f32::EPSILON) {
            return Ok(Box::new(Passthrough));
        }
        Ok(Box::new(TemperatureKernel { coeffs }))
    }
}

struct TemperatureKernel {
    coeffs: [f32; 3],
}

impl Kernel for TemperatureKernel {
    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        let [r, g, b] = self.coeffs;
        input.map_rgba(NAME, |_, _, px| [px[0] * r, px[1] * g, px[2] * b, px[3]])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::iop::testing::{commit, flat, run};
    use crate::params::ParamValue;

    #[test]
    fn multiplies_channels() {
        let img = flat(2, 2, [0.25, 0.5, 0.125]);
        let mut p = Temperature.default_params();
        p.set("red", ParamValue::Float(2.0)).unwrap();
        p.set("blue", ParamValue::Float(4.0)).unwrap();
        let out = run(&Temperature, &p, &img);
        assert_eq!(out.pixel(1, 1), &[0.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn unit_coefficients_pass_through() {
        let img = flat(2, 2, [0.5; 3]);
        assert!(commit(&Temperature, &Temperature.default_params(), &img).is_passthrough());
    }

    #[test]
    fn upgrade_from_v2_reaches_v4() {
        let mut old = V2.default_record();
        old.set("coeffs[0]", ParamValue::Float(2.0)).unwrap();
        old.set("coeffs[2]", ParamValue::Float(1.5)).unwrap();

        let (v3, version) = Temperature.legacy_upgrade(2, old.as_bytes()).unwrap();
        assert_eq!(version, 3);
        let (v4, version) = Temperature.legacy_upgrade(3, &v3).unwrap();
        assert_eq!(version, 4);

        let record = LAYOUT.decode(&v4).unwrap();
        assert_eq!(record.float("red"), 2.0);
        assert_eq!(record.float("green"), 1.0);
        assert_eq!(record.float("blue"), 1.5);
        assert!(record.float("various").is_nan());
        assert_eq!(record.int("preset"), -1);
    }
}
