//! Raster encoders backed by the `image` crate.

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba, RgbaImage};
use rawdev_pipeline::RenderResult;

use crate::ExportError;

/// JPEG quality used when the requested one is outside `1..=100`.
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// A file format the exporter can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// 8-bit RGBA PNG.
    Png,
    /// 16-bit RGBA PNG.
    Png16,
    /// Baseline JPEG at the given quality (alpha dropped).
    Jpeg {
        /// Quality in `1..=100`.
        quality: u8,
    },
    /// 8-bit RGBA TIFF.
    Tiff,
}

impl OutputFormat {
    /// Pick a format from a path's extension.
    ///
    /// `bits` selects 16-bit PNG when it is 16; other formats are 8-bit
    /// only. Returns `None` for unknown extensions.
    #[must_use]
    pub fn from_path(path: &Path, bits: u8, quality: u8) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" if bits == 16 => Some(Self::Png16),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg { quality }),
            "tif" | "tiff" => Some(Self::Tiff),
            _ => None,
        }
    }
}

/// Encode `result` in `format`.
///
/// # Errors
///
/// See the individual encoders.
pub fn encode(result: &RenderResult, format: OutputFormat) -> Result<Vec<u8>, ExportError> {
    match format {
        OutputFormat::Png => encode_png(result),
        OutputFormat::Png16 => encode_png16(result),
        OutputFormat::Jpeg { quality } => encode_jpeg(result, quality),
        OutputFormat::Tiff => encode_tiff(result),
    }
}

/// Encode as 8-bit RGBA PNG.
///
/// # Errors
///
/// Returns [`ExportError::Buffer`] if the render rows are short, or
/// [`ExportError::Encode`] if the encoder fails.
pub fn encode_png(result: &RenderResult) -> Result<Vec<u8>, ExportError> {
    write(&DynamicImage::ImageRgba8(rgba8(result)?), ImageFormat::Png)
}

/// Encode as 16-bit RGBA PNG, each byte widened by `v * 257`.
///
/// # Errors
///
/// As [`encode_png`].
pub fn encode_png16(result: &RenderResult) -> Result<Vec<u8>, ExportError> {
    let wide: Vec<u16> = packed(result)?
        .into_iter()
        .map(|v| u16::from(v) * 257)
        .collect();
    let image: ImageBuffer<Rgba<u16>, Vec<u16>> =
        ImageBuffer::from_raw(result.width(), result.height(), wide)
            .ok_or_else(|| ExportError::Buffer("16-bit buffer size mismatch".into()))?;
    write(&DynamicImage::ImageRgba16(image), ImageFormat::Png)
}

/// Encode as JPEG. Alpha is dropped.
///
/// A `quality` outside `1..=100` falls back to
/// [`DEFAULT_JPEG_QUALITY`].
///
/// # Errors
///
/// As [`encode_png`].
pub fn encode_jpeg(result: &RenderResult, quality: u8) -> Result<Vec<u8>, ExportError> {
    let quality = if (1..=100).contains(&quality) {
        quality
    } else {
        DEFAULT_JPEG_QUALITY
    };
    let rgb = DynamicImage::ImageRgba8(rgba8(result)?).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

/// Encode as 8-bit RGBA TIFF.
///
/// # Errors
///
/// As [`encode_png`].
pub fn encode_tiff(result: &RenderResult) -> Result<Vec<u8>, ExportError> {
    write(&DynamicImage::ImageRgba8(rgba8(result)?), ImageFormat::Tiff)
}

fn write(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, ExportError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

/// The pixel rows without stride padding.
fn packed(result: &RenderResult) -> Result<Vec<u8>, ExportError> {
    let row_len = result.width() as usize * 4;
    let mut out = Vec::with_capacity(row_len * result.height() as usize);
    for y in 0..result.height() {
        let row = result
            .row(y)
            .ok_or_else(|| ExportError::Buffer(format!("row {y} is missing")))?;
        out.extend_from_slice(row);
    }
    Ok(out)
}

fn rgba8(result: &RenderResult) -> Result<RgbaImage, ExportError> {
    RgbaImage::from_raw(result.width(), result.height(), packed(result)?)
        .ok_or_else(|| ExportError::Buffer("8-bit buffer size mismatch".into()))
}
