//! Source images: linear float pixel data plus capture metadata.
//!
//! Raw sensor decoding lives outside this crate. Anything that can produce
//! a linear buffer implements [`ImageLoader`]; the built-in
//! [`StandardLoader`] decodes PNG, JPEG and TIFF through the `image` crate
//! and linearizes their sRGB-encoded samples.

use std::path::Path;

use image::DynamicImage;

use crate::error::{EngineError, FormatError};
use crate::types::Dimensions;

/// Capture metadata carried alongside the pixels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageMetadata {
    /// File name the image was loaded from.
    pub filename: Option<String>,
    /// Camera manufacturer.
    pub camera_maker: Option<String>,
    /// Camera model.
    pub camera_model: Option<String>,
    /// Exposure bias set on the camera, in EV.
    pub exposure_bias: Option<f32>,
}

impl ImageMetadata {
    /// `"<maker> <model>"`, or whichever of the two is known.
    #[must_use]
    pub fn camera(&self) -> Option<String> {
        match (&self.camera_maker, &self.camera_model) {
            (Some(maker), Some(model)) => Some(format!("{maker} {model}")),
            (Some(one), None) | (None, Some(one)) => Some(one.clone()),
            (None, None) => None,
        }
    }
}

/// A decoded source image in linear light.
///
/// Samples are interleaved `f32`, nominally in `[0, 1]`, with 1 (mono),
/// 3 (RGB) or 4 (RGBA) channels per pixel. Read-only once built, so one
/// image can back several pipelines on different threads.
#[derive(Debug, Clone)]
pub struct SourceImage {
    width: u32,
    height: u32,
    channels: usize,
    samples: Vec<f32>,
    metadata: ImageMetadata,
}

impl SourceImage {
    /// Wrap a linear buffer.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidArgument`] if a dimension is zero,
    /// `channels` is not 1, 3 or 4, or `samples` has the wrong length.
    pub fn from_linear(
        width: u32,
        height: u32,
        channels: usize,
        samples: Vec<f32>,
    ) -> Result<Self, EngineError> {
        if width == 0 || height == 0 {
            return Err(EngineError::invalid(format!(
                "image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if !matches!(channels, 1 | 3 | 4) {
            return Err(EngineError::invalid(format!(
                "image must have 1, 3 or 4 channels, got {channels}"
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels));
        if expected != Some(samples.len()) {
            let expected = expected.map_or_else(|| "more than usize::MAX".into(), |n| n.to_string());
            return Err(EngineError::invalid(format!(
                "expected {expected} samples for {width}x{height}x{channels}, got {}",
                samples.len()
            )));
        }
        Ok(Self {
            width,
            height,
            channels,
            samples,
            metadata: ImageMetadata::default(),
        })
    }

    /// Replace the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: ImageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Full-resolution dimensions.
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Interleaved samples, row-major.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Capture metadata.
    #[must_use]
    pub const fn metadata(&self) -> &ImageMetadata {
        &self.metadata
    }

    /// Whether the image actually holds pixels.
    #[must_use]
    pub fn has_pixels(&self) -> bool {
        !self.samples.is_empty()
    }

    /// The pixel at `(x, y)` expanded to RGBA (mono is replicated, missing
    /// alpha is 1). Coordinates are clamped into the image.
    #[must_use]
    pub fn rgba_at(&self, x: u32, y: u32) -> [f32; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let offset = (y * self.width as usize + x) * self.channels;
        let px = &self.samples[offset..offset + self.channels];
        match self.channels {
            1 => [px[0], px[0], px[0], 1.0],
            3 => [px[0], px[1], px[2], 1.0],
            _ => [px[0], px[1], px[2], px[3]],
        }
    }
}

/// Something that turns a file into a [`SourceImage`].
pub trait ImageLoader {
    /// Load the image at `path`.
    ///
    /// # Errors
    ///
    /// Implementations return [`EngineError::NotFound`] for a missing file,
    /// [`EngineError::Io`] for other read failures and
    /// [`EngineError::Format`] for undecodable content.
    fn load(&self, path: &Path) -> Result<SourceImage, EngineError>;
}

/// Loader for the formats the `image` crate decodes (PNG, JPEG, TIFF).
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardLoader;

impl ImageLoader for StandardLoader {
    fn load(&self, path: &Path) -> Result<SourceImage, EngineError> {
        load(path)
    }
}

/// Read and decode the file at `path`.
///
/// # Errors
///
/// See [`ImageLoader::load`].
pub fn load(path: &Path) -> Result<SourceImage, EngineError> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::from_io(e, path))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    decode(&bytes, filename)
}

/// Decode an encoded image held in memory.
///
/// 8- and 16-bit samples are treated as sRGB-encoded and linearized;
/// 32-bit float samples are taken as already linear. Gray images stay
/// single-channel.
///
/// # Errors
///
/// Returns [`EngineError::InvalidArgument`] if `bytes` is empty and
/// [`EngineError::Format`] if the data cannot be decoded.
pub fn decode(bytes: &[u8], filename: Option<String>) -> Result<SourceImage, EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::invalid("image data is empty"));
    }
    let decoded = image::load_from_memory(bytes).map_err(FormatError::Image)?;
    let (width, height) = (decoded.width(), decoded.height());

    let (channels, samples) = match decoded {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_) => {
            let gray = decoded.to_luma32f();
            (1, gray.into_raw().into_iter().map(srgb_to_linear).collect())
        }
        DynamicImage::ImageRgb32F(rgb) => (3, rgb.into_raw()),
        DynamicImage::ImageRgba32F(rgba) => (4, rgba.into_raw()),
        other => {
            let rgba = other.to_rgba32f();
            let samples = rgba
                .into_raw()
                .chunks_exact(4)
                .flat_map(|px| {
                    [
                        srgb_to_linear(px[0]),
                        srgb_to_linear(px[1]),
                        srgb_to_linear(px[2]),
                        px[3],
                    ]
                })
                .collect();
            (4, samples)
        }
    };

    let metadata = ImageMetadata {
        filename,
        ..ImageMetadata::default()
    };
    Ok(SourceImage::from_linear(width, height, channels, samples)?.with_metadata(metadata))
}

/// Inverse of the sRGB transfer function.
#[must_use]
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn encode_png(img: &image::RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        let encoder = image::codecs::png::PngEncoder::new(&mut buf);
        image::ImageEncoder::write_image(
            encoder,
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgba8,
        )
        .unwrap();
        buf
    }

    #[test]
    fn from_linear_validates_shape() {
        assert!(SourceImage::from_linear(0, 4, 4, vec![]).is_err());
        assert!(SourceImage::from_linear(2, 2, 2, vec![0.0; 8]).is_err());
        assert!(SourceImage::from_linear(2, 2, 3, vec![0.0; 11]).is_err());
        let img = SourceImage::from_linear(2, 2, 3, vec![0.5; 12]).unwrap();
        assert_eq!(img.dimensions(), Dimensions::new(2, 2));
        assert!(img.has_pixels());
    }

    #[test]
    fn rgba_at_expands_channels() {
        let mono = SourceImage::from_linear(1, 1, 1, vec![0.25]).unwrap();
        assert_eq!(mono.rgba_at(0, 0), [0.25, 0.25, 0.25, 1.0]);
        let rgb = SourceImage::from_linear(1, 1, 3, vec![0.1, 0.2, 0.3]).unwrap();
        assert_eq!(rgb.rgba_at(5, 5), [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn decode_png_linearizes() {
        let img = image::RgbaImage::from_fn(3, 2, |_, _| image::Rgba([255, 0, 188, 255]));
        let source = decode(&encode_png(&img), Some("x.png".into())).unwrap();
        assert_eq!(source.width(), 3);
        assert_eq!(source.height(), 2);
        assert_eq!(source.channels(), 4);
        let px = source.rgba_at(0, 0);
        assert!((px[0] - 1.0).abs() < 1e-6);
        assert_eq!(px[1], 0.0);
        // sRGB 188 is roughly 50% linear.
        assert!((px[2] - 0.5).abs() < 0.01, "got {}", px[2]);
        assert_eq!(source.metadata().filename.as_deref(), Some("x.png"));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode(&[], None),
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(matches!(
            decode(&[0xFF, 0xFE, 0x00, 0x01], None),
            Err(EngineError::Format(FormatError::Image(_)))
        ));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let err = load(Path::new("/definitely/not/here.png")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn standard_loader_reads_files_through_the_trait() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("IMG_0042.png");
        let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([255, 0, 0, 255]));
        std::fs::write(&path, encode_png(&img)).unwrap();

        let loader: &dyn ImageLoader = &StandardLoader;
        let loaded = loader.load(&path).unwrap();
        assert_eq!((loaded.width(), loaded.height(), loaded.channels()), (3, 2, 4));
        assert_eq!(loaded.metadata().filename.as_deref(), Some("IMG_0042.png"));
        assert_eq!(loaded.rgba_at(2, 1), [1.0, 0.0, 0.0, 1.0]);

        let err = loader.load(&dir.path().join("gone.png")).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[test]
    fn camera_string() {
        let meta = ImageMetadata {
            camera_maker: Some("Acme".into()),
            camera_model: Some("R1".into()),
            ..ImageMetadata::default()
        };
        assert_eq!(meta.camera().as_deref(), Some("Acme R1"));
        assert_eq!(ImageMetadata::default().camera(), None);
    }
}
