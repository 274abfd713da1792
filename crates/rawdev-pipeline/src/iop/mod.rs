//! Shipped image operations.
//!
//! Each submodule defines one [`ModuleKind`]: its parameter layouts (the
//! current one plus every historical one it can still read), its
//! migrations and the kernel it commits for a render.

mod colorin;
mod colorout;
mod crop;
mod demosaic;
mod exposure;
mod levels;
mod rawprepare;
mod sharpen;
mod temperature;
mod vignette;

pub use colorin::ColorIn;
pub use colorout::ColorOut;
pub use crop::Crop;
pub use demosaic::Demosaic;
pub use exposure::Exposure;
pub use levels::Levels;
pub use rawprepare::RawPrepare;
pub use sharpen::Sharpen;
pub use temperature::Temperature;
pub use vignette::Vignette;

use crate::buffer::PixelBuffer;
use crate::error::ModuleError;
use crate::module::{Kernel, ModuleKind};
use crate::types::Region;

/// Every shipped module kind, in `v5.0` chain order.
#[must_use]
pub fn builtin_modules() -> Vec<Box<dyn ModuleKind>> {
    vec![
        Box::new(RawPrepare),
        Box::new(Temperature),
        Box::new(Demosaic),
        Box::new(Exposure),
        Box::new(Crop),
        Box::new(ColorIn),
        Box::new(Sharpen),
        Box::new(Levels),
        Box::new(Vignette),
        Box::new(ColorOut),
    ]
}

/// Kernel of an instance whose parameters leave pixels untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Kernel for Passthrough {
    fn is_passthrough(&self) -> bool {
        true
    }

    fn process(&self, input: &PixelBuffer, _output: &Region) -> Result<PixelBuffer, ModuleError> {
        Ok(input.clone())
    }
}

/// Apply `f` to the color samples of `input`: every sample of a mono
/// buffer, RGB (not alpha) of an RGBA buffer.
pub(crate) fn map_color(
    input: &PixelBuffer,
    f: impl Fn(f32) -> f32,
) -> Result<PixelBuffer, ModuleError> {
    let channels = input.channels();
    let mut out = PixelBuffer::new(*input.region(), channels)?;
    for (src, dst) in input
        .data()
        .chunks_exact(channels)
        .zip(out.data_mut().chunks_exact_mut(channels))
    {
        dst.copy_from_slice(src);
        for v in dst.iter_mut().take(channels.min(3)) {
            *v = f(*v);
        }
    }
    Ok(out)
}

/// 3x3 matrix times an RGB triple.
pub(crate) fn mat3_mul(m: &[[f32; 3]; 3], rgb: [f32; 3]) -> [f32; 3] {
    [
        m[0][0].mul_add(rgb[0], m[0][1].mul_add(rgb[1], m[0][2] * rgb[2])),
        m[1][0].mul_add(rgb[0], m[1][1].mul_add(rgb[1], m[1][2] * rgb[2])),
        m[2][0].mul_add(rgb[0], m[2][1].mul_add(rgb[1], m[2][2] * rgb[2])),
    ]
}

/// Rec. 709 luminance.
pub(crate) fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126f32.mul_add(rgb[0], 0.7152f32.mul_add(rgb[1], 0.0722 * rgb[2]))
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_are_unique() {
        let kinds = builtin_modules();
        let mut names: Vec<_> = kinds.iter().map(|k| k.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), kinds.len());
    }

    #[test]
    fn defaults_match_current_version() {
        for kind in builtin_modules() {
            assert_eq!(kind.default_params().version(), kind.version(), "{}", kind.name());
        }
    }

    #[test]
    fn map_color_skips_alpha() {
        let buf = PixelBuffer::from_samples(
            Region::new(0, 0, 1, 1, 1.0),
            4,
            vec![0.5, 0.25, 1.0, 0.5],
        )
        .unwrap();
        let out = map_color(&buf, |v| v * 2.0).unwrap();
        assert_eq!(out.data(), &[1.0, 0.5, 2.0, 0.5]);
    }

    #[test]
    fn identity_matrix() {
        let id = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(mat3_mul(&id, [0.1, 0.2, 0.3]), [0.1, 0.2, 0.3]);
        assert!((luminance([1.0, 1.0, 1.0]) - 1.0).abs() < 1e-6);
    }
}
