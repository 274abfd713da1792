//! Intermediate float pixel buffers.
//!
//! A [`PixelBuffer`] knows the [`Region`] it covers, so kernels can map
//! buffer-local pixels back to frame coordinates and the engine can copy
//! tiles into place without extra bookkeeping.

use crate::error::{AllocError, ModuleError};
use crate::source::SourceImage;
use crate::types::Region;

/// Interleaved `f32` pixels covering one [`Region`].
///
/// Holds either 1 (monochrome) or 4 (RGBA) channels per pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    region: Region,
    channels: usize,
    data: Vec<f32>,
}

impl PixelBuffer {
    /// A zero-filled buffer for `region`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the allocation cannot be satisfied.
    pub fn new(region: Region, channels: usize) -> Result<Self, AllocError> {
        let len = Self::sample_count(&region, channels)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| alloc_error(&region, len.saturating_mul(std::mem::size_of::<f32>())))?;
        data.resize(len, 0.0);
        Ok(Self {
            region,
            channels,
            data,
        })
    }

    /// Wrap existing samples; `None` if the length does not match.
    #[must_use]
    pub fn from_samples(region: Region, channels: usize, data: Vec<f32>) -> Option<Self> {
        (Some(data.len()) == region.area().checked_mul(channels)).then_some(Self {
            region,
            channels,
            data,
        })
    }

    /// Samples needed for `region` at `channels` per pixel.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the count or its byte size overflows.
    pub fn sample_count(region: &Region, channels: usize) -> Result<usize, AllocError> {
        region
            .area()
            .checked_mul(channels)
            .filter(|len| len.checked_mul(std::mem::size_of::<f32>()).is_some())
            .ok_or_else(|| alloc_error(region, usize::MAX))
    }

    /// Check that a buffer for `region` could be allocated right now,
    /// without keeping it.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if it could not.
    pub fn ensure_allocatable(region: &Region, channels: usize) -> Result<(), AllocError> {
        let len = Self::sample_count(region, channels)?;
        let mut trial: Vec<f32> = Vec::new();
        trial
            .try_reserve_exact(len)
            .map_err(|_| alloc_error(region, len.saturating_mul(std::mem::size_of::<f32>())))
    }

    /// Region covered.
    #[must_use]
    pub const fn region(&self) -> &Region {
        &self.region
    }

    /// Channels per pixel.
    #[must_use]
    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// All samples, row-major.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// All samples, mutable.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Size of the sample storage in bytes.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Samples of the pixel at buffer-local `(x, y)`.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> &[f32] {
        let offset = (y * self.region.width as usize + x) * self.channels;
        &self.data[offset..offset + self.channels]
    }

    /// Fail with [`ModuleError::UnsupportedFormat`] unless the buffer has
    /// `required` channels.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn require_channels(
        &self,
        module: &'static str,
        required: usize,
    ) -> Result<(), ModuleError> {
        if self.channels == required {
            Ok(())
        } else {
            Err(ModuleError::UnsupportedFormat {
                module,
                channels: self.channels,
                required,
            })
        }
    }

    /// Apply `f` to every RGBA pixel, producing a new buffer over the same
    /// region. `f` receives frame coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::UnsupportedFormat`] for non-RGBA input and
    /// [`ModuleError::Alloc`] if the output cannot be allocated.
    pub fn map_rgba(
        &self,
        module: &'static str,
        f: impl Fn(i64, i64, [f32; 4]) -> [f32; 4],
    ) -> Result<Self, ModuleError> {
        self.require_channels(module, 4)?;
        let mut out = Self::new(self.region, 4)?;
        let width = self.region.width as usize;
        for (index, (src, dst)) in self
            .data
            .chunks_exact(4)
            .zip(out.data.chunks_exact_mut(4))
            .enumerate()
        {
            let x = i64::from(self.region.x) + (index % width) as i64;
            let y = i64::from(self.region.y) + (index / width) as i64;
            dst.copy_from_slice(&f(x, y, [src[0], src[1], src[2], src[3]]));
        }
        Ok(out)
    }

    /// Copy of the part of `self` covered by `area`.
    ///
    /// `area` is clipped to the buffer first; the result covers the clip.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the copy cannot be allocated.
    pub fn extract(&self, area: &Region) -> Result<Self, AllocError> {
        let clipped = area.clamp_to(&self.region);
        let mut out = Self::new(clipped, self.channels)?;
        out.blit(self);
        Ok(out)
    }

    /// Copy the overlap of `src` and `self` from `src` into `self`.
    ///
    /// Both buffers must have the same channel count; otherwise nothing is
    /// copied.
    pub fn blit(&mut self, src: &Self) {
        if src.channels != self.channels {
            return;
        }
        let Some(overlap) = self.region.intersect(&src.region) else {
            return;
        };
        let ch = self.channels;
        let row_len = overlap.width as usize * ch;
        for row in 0..overlap.height as usize {
            let y = i64::from(overlap.y) + row as i64;
            let src_off = src.offset(i64::from(overlap.x), y);
            let dst_off = self.offset(i64::from(overlap.x), y);
            self.data[dst_off..dst_off + row_len]
                .copy_from_slice(&src.data[src_off..src_off + row_len]);
        }
    }

    /// Sample `region` of `image` at `region.scale`.
    ///
    /// Downscaling averages the source pixels under each output pixel;
    /// upscaling picks the nearest. Mono sources stay mono; RGB gains an
    /// opaque alpha channel.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] if the buffer cannot be allocated.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn import(image: &SourceImage, region: &Region) -> Result<Self, AllocError> {
        let channels = if image.channels() == 1 { 1 } else { 4 };
        let mut out = Self::new(*region, channels)?;
        let scale = f64::from(region.scale);
        let (src_w, src_h) = (i64::from(image.width()), i64::from(image.height()));

        let span = |pos: i64, limit: i64| -> (i64, i64) {
            if scale >= 1.0 {
                let s = (((pos as f64) + 0.5) / scale).floor() as i64;
                let s = s.clamp(0, limit - 1);
                (s, s + 1)
            } else {
                let start = ((pos as f64) / scale).floor() as i64;
                let end = (((pos + 1) as f64) / scale).floor() as i64;
                let start = start.clamp(0, limit - 1);
                (start, end.clamp(start + 1, limit))
            }
        };

        let width = region.width as usize;
        for (index, dst) in out.data.chunks_exact_mut(channels).enumerate() {
            let fx = i64::from(region.x) + (index % width) as i64;
            let fy = i64::from(region.y) + (index / width) as i64;
            let (x0, x1) = span(fx, src_w);
            let (y0, y1) = span(fy, src_h);
            let mut acc = [0.0f32; 4];
            for sy in y0..y1 {
                for sx in x0..x1 {
                    let px = image.rgba_at(sx as u32, sy as u32);
                    for (a, v) in acc.iter_mut().zip(px) {
                        *a += v;
                    }
                }
            }
            let n = ((x1 - x0) * (y1 - y0)) as f32;
            for (d, a) in dst.iter_mut().zip(acc) {
                *d = a / n;
            }
        }
        Ok(out)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn offset(&self, x: i64, y: i64) -> usize {
        let local_x = (x - i64::from(self.region.x)) as usize;
        let local_y = (y - i64::from(self.region.y)) as usize;
        (local_y * self.region.width as usize + local_x) * self.channels
    }
}

const fn alloc_error(region: &Region, bytes: usize) -> AllocError {
    AllocError {
        bytes,
        width: region.width,
        height: region.height,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> SourceImage {
        let mut samples = Vec::new();
        for y in 0..height {
            for x in 0..width {
                samples.extend([x as f32, y as f32, 0.5]);
            }
        }
        SourceImage::from_linear(width, height, 3, samples).unwrap()
    }

    #[test]
    fn oversized_buffers_fail_to_allocate() {
        let huge = Region::new(0, 0, u32::MAX, u32::MAX, 1.0);
        let err = PixelBuffer::new(huge, 4).unwrap_err();
        assert_eq!((err.width, err.height, err.bytes), (u32::MAX, u32::MAX, usize::MAX));
        assert!(PixelBuffer::ensure_allocatable(&huge, 1).is_err());
        assert!(PixelBuffer::from_samples(huge, 4, Vec::new()).is_none());

        let small = Region::new(0, 0, 4, 3, 1.0);
        assert_eq!(PixelBuffer::sample_count(&small, 4).unwrap(), 48);
        assert!(PixelBuffer::ensure_allocatable(&small, 4).is_ok());
    }

    #[test]
    fn import_at_full_scale_copies() {
        let img = gradient(8, 6);
        let buf = PixelBuffer::import(&img, &Region::new(2, 3, 4, 2, 1.0)).unwrap();
        assert_eq!(buf.channels(), 4);
        assert_eq!(buf.pixel(0, 0), &[2.0, 3.0, 0.5, 1.0]);
        assert_eq!(buf.pixel(3, 1), &[5.0, 4.0, 0.5, 1.0]);
    }

    #[test]
    fn import_half_scale_averages_blocks() {
        let img = gradient(8, 8);
        let buf = PixelBuffer::import(&img, &Region::new(0, 0, 4, 4, 0.5)).unwrap();
        // Output (1, 0) averages source x in 2..4, y in 0..2.
        assert_eq!(buf.pixel(1, 0), &[2.5, 0.5, 0.5, 1.0]);
    }

    #[test]
    fn import_mono_stays_mono() {
        let img = SourceImage::from_linear(2, 2, 1, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let buf = PixelBuffer::import(&img, &Region::new(0, 0, 2, 2, 1.0)).unwrap();
        assert_eq!(buf.channels(), 1);
        assert_eq!(buf.data(), &[0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn extract_and_blit_round_trip() {
        let img = gradient(10, 10);
        let full = PixelBuffer::import(&img, &Region::new(0, 0, 10, 10, 1.0)).unwrap();
        let part = full.extract(&Region::new(3, 4, 2, 3, 1.0)).unwrap();
        assert_eq!(part.region().width, 2);
        assert_eq!(part.pixel(0, 0), full.pixel(3, 4));

        let mut canvas = PixelBuffer::new(Region::new(0, 0, 10, 10, 1.0), 4).unwrap();
        canvas.blit(&part);
        assert_eq!(canvas.pixel(4, 6), full.pixel(4, 6));
        assert_eq!(canvas.pixel(0, 0), &[0.0; 4]);
    }

    #[test]
    fn map_rgba_sees_frame_coordinates() {
        let img = gradient(6, 6);
        let buf = PixelBuffer::import(&img, &Region::new(2, 1, 3, 3, 1.0)).unwrap();
        let out = buf
            .map_rgba("test", |x, y, px| [x as f32, y as f32, px[2], px[3]])
            .unwrap();
        assert_eq!(out.pixel(0, 0), &[2.0, 1.0, 0.5, 1.0]);
        assert_eq!(out.pixel(2, 2), &[4.0, 3.0, 0.5, 1.0]);
    }

    #[test]
    fn map_rgba_rejects_mono() {
        let img = SourceImage::from_linear(1, 1, 1, vec![0.5]).unwrap();
        let buf = PixelBuffer::import(&img, &Region::new(0, 0, 1, 1, 1.0)).unwrap();
        let err = buf.map_rgba("colorin", |_, _, px| px).unwrap_err();
        assert!(matches!(
            err,
            ModuleError::UnsupportedFormat {
                channels: 1,
                required: 4,
                ..
            }
        ));
    }
}
