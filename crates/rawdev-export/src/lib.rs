//! rawdev-export: Pure raster encoders (sans-IO)
//!
//! Turns a [`RenderResult`] into PNG, 16-bit PNG, JPEG or TIFF bytes.
//! Writing the bytes somewhere is the caller's business.

mod raster;

pub use raster::{
    DEFAULT_JPEG_QUALITY, OutputFormat, encode, encode_jpeg, encode_png, encode_png16, encode_tiff,
};
pub use rawdev_pipeline::RenderResult;

/// Why an export failed.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The render's rows do not hold the pixels its dimensions promise.
    #[error("render buffer is inconsistent: {0}")]
    Buffer(String),

    /// The underlying encoder failed.
    #[error("encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
