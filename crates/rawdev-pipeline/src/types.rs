//! Shared geometry and configuration types.

use serde::{Deserialize, Serialize};

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create dimensions from a width and height.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Dimensions of a `width × height` frame sampled at `scale`.
    ///
    /// Each axis is `floor(extent * scale)`, never less than one pixel.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn scaled(self, scale: f32) -> Self {
        let w = (f64::from(self.width) * f64::from(scale)).floor().max(1.0);
        let h = (f64::from(self.height) * f64::from(scale)).floor().max(1.0);
        Self::new(w as u32, h as u32)
    }

    /// Number of pixels.
    #[must_use]
    pub const fn area(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// The full-frame region covering these dimensions at `scale`.
    #[must_use]
    pub const fn full_region(self, scale: f32) -> Region {
        Region::new(0, 0, self.width, self.height, scale)
    }
}

/// A rectangle in source-image pixel coordinates at a given scale.
///
/// `x`/`y` may be any position in the scaled frame; `width`/`height` are
/// always at least one after any clamping operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Scale relative to the full-resolution source.
    pub scale: f32,
}

impl Region {
    /// Create a region.
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32, scale: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale,
        }
    }

    /// Exclusive right edge.
    #[must_use]
    pub const fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    #[must_use]
    pub const fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Number of pixels.
    #[must_use]
    pub const fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Width and height as [`Dimensions`].
    #[must_use]
    pub const fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Whether `other` lies entirely inside `self`.
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Whether both regions cover the same pixels (scale ignored).
    #[must_use]
    pub const fn same_rect(&self, other: &Self) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
    }

    /// Overlap of two regions, or `None` if they are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let left = i64::from(self.x.max(other.x));
        let top = i64::from(self.y.max(other.y));
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Self::from_edges(left, top, right, bottom, self.scale))
    }

    /// Restrict `self` to `bounds`, keeping at least one pixel.
    ///
    /// A region disjoint from `bounds` collapses onto the nearest edge
    /// pixel of `bounds`.
    #[must_use]
    pub fn clamp_to(&self, bounds: &Self) -> Self {
        let max_x = bounds.right() - 1;
        let max_y = bounds.bottom() - 1;
        let left = i64::from(self.x).clamp(i64::from(bounds.x), max_x);
        let top = i64::from(self.y).clamp(i64::from(bounds.y), max_y);
        let right = self.right().clamp(left + 1, bounds.right());
        let bottom = self.bottom().clamp(top + 1, bounds.bottom());
        Self::from_edges(left, top, right, bottom, self.scale)
    }

    /// Grow by `margin` pixels on every side.
    #[must_use]
    pub fn expand(&self, margin: u32) -> Self {
        let m = i64::from(margin);
        Self::from_edges(
            i64::from(self.x) - m,
            i64::from(self.y) - m,
            self.right() + m,
            self.bottom() + m,
            self.scale,
        )
    }

    /// Build from edge coordinates, saturating into the field ranges.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_edges(left: i64, top: i64, right: i64, bottom: i64, scale: f32) -> Self {
        let x = left.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let y = top.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        let width = (right - left).clamp(1, i64::from(u32::MAX)) as u32;
        let height = (bottom - top).clamp(1, i64::from(u32::MAX)) as u32;
        Self::new(x, y, width, height, scale)
    }
}

/// Engine-wide configuration.
///
/// Deserializes with defaults for any missing key, so a partial JSON
/// object such as `{"tiling": false}` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Whether renders may be split into tiles.
    pub tiling: bool,

    /// Ceiling in bytes for the estimated peak of one processing step
    /// (input plus output buffer). Above it, tileable chain segments are
    /// processed tile by tile.
    pub tile_memory_limit: usize,

    /// Lower bound for the core edge of a tile in pixels, regardless of
    /// how small the memory limit is.
    pub min_tile_size: u32,
}

impl EngineConfig {
    /// Default for [`tiling`](Self::tiling).
    pub const DEFAULT_TILING: bool = true;

    /// Default for [`tile_memory_limit`](Self::tile_memory_limit): 512 MiB.
    pub const DEFAULT_TILE_MEMORY_LIMIT: usize = 512 * 1024 * 1024;

    /// Default for [`min_tile_size`](Self::min_tile_size).
    pub const DEFAULT_MIN_TILE_SIZE: u32 = 64;
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tiling: Self::DEFAULT_TILING,
            tile_memory_limit: Self::DEFAULT_TILE_MEMORY_LIMIT,
            min_tile_size: Self::DEFAULT_MIN_TILE_SIZE,
        }
    }
}
