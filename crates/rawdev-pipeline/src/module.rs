//! The capability contract every processing module implements.
//!
//! A module kind is described once, process-wide, by a [`ModuleKind`]:
//! its name, parameter layouts, defaults, flags and migrations. When a
//! render starts, each enabled instance commits its current parameters
//! through [`ModuleKind::commit_params`] into a [`Kernel`], the per-render
//! object that answers region queries and processes pixels.

use std::ops::BitOr;

use crate::buffer::PixelBuffer;
use crate::error::{ModuleError, ParamSetError};
use crate::params::{ParamLayout, ParamRecord, ParamValue};
use crate::source::SourceImage;
use crate::types::{Dimensions, Region};

/// Capability flags declared by a module kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ModuleFlags(u32);

impl ModuleFlags {
    /// No capabilities.
    pub const NONE: Self = Self(0);
    /// The kernel gives identical results when run tile by tile.
    pub const ALLOW_TILING: Self = Self(1);
    /// At most one instance per pipeline.
    pub const ONE_INSTANCE: Self = Self(1 << 1);
    /// The kernel changes geometry (its regions are not identity).
    pub const DISTORT: Self = Self(1 << 2);

    /// Whether every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of two flag sets.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for ModuleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// What a module sees while committing parameters for one render.
#[derive(Debug, Clone, Copy)]
pub struct CommitContext<'a> {
    /// The pipeline's source image.
    pub image: &'a SourceImage,
    /// Render scale.
    pub scale: f32,
    /// Full-frame dimensions at `scale`, before any module.
    pub full: Dimensions,
    /// The full frame as it reaches this module, after the geometry of
    /// every enabled module before it.
    pub frame: Region,
}

/// Descriptor-level behavior of one module kind.
///
/// Implementations are stateless; everything that varies per instance
/// lives in the [`ParamRecord`] handed to [`commit_params`](Self::commit_params).
pub trait ModuleKind: Send + Sync {
    /// Unique module name, as stored in history documents.
    fn name(&self) -> &'static str;

    /// Layout of the current parameter version.
    fn layout(&self) -> &'static ParamLayout;

    /// Current parameter version.
    fn version(&self) -> u32 {
        self.layout().version
    }

    /// Declared capabilities.
    fn flags(&self) -> ModuleFlags {
        ModuleFlags::NONE
    }

    /// Whether a fresh pipeline enables this module.
    fn default_enabled(&self) -> bool {
        false
    }

    /// Parameters of a fresh instance.
    fn default_params(&self) -> ParamRecord {
        self.layout().default_record()
    }

    /// Layout of an older parameter version, if this kind can read it.
    fn legacy_layout(&self, _version: u32) -> Option<&'static ParamLayout> {
        None
    }

    /// Convert a blob of parameter version `old_version` into a newer one.
    ///
    /// Returns the new blob and its version. The engine calls this
    /// repeatedly until the current version is reached.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::NoUpgradePath`] when `old_version` is not
    /// supported, or any error raised while decoding the old blob.
    fn legacy_upgrade(&self, old_version: u32, _old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
        Err(ModuleError::NoUpgradePath {
            module: self.name(),
            version: old_version,
        })
    }

    /// Turn the current parameters into a kernel for one render.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] if the parameters cannot be applied.
    fn commit_params(
        &self,
        params: &ParamRecord,
        ctx: &CommitContext<'_>,
    ) -> Result<Box<dyn Kernel>, ModuleError>;
}

/// Per-render processing object produced by [`ModuleKind::commit_params`].
///
/// Regions are in frame coordinates at the render scale. The default
/// region methods describe an identity-geometry module.
pub trait Kernel {
    /// The input region needed to produce `requested_output`.
    fn compute_input_region(&self, requested_output: &Region) -> Region {
        *requested_output
    }

    /// The output region actually produced from `resolved_input`.
    fn compute_output_region(&self, resolved_input: &Region) -> Region {
        *resolved_input
    }

    /// Pixels of neighborhood the kernel reads around each output pixel.
    ///
    /// Tiles are padded by the sum of overlaps so their cores match an
    /// untiled render.
    fn overlap(&self) -> u32 {
        0
    }

    /// Whether processing would return the input unchanged.
    ///
    /// The engine then hands the input buffer on without calling
    /// [`process`](Self::process).
    fn is_passthrough(&self) -> bool {
        false
    }

    /// Produce `output` from `input`.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] if the input format is unsupported or
    /// processing fails.
    fn process(&self, input: &PixelBuffer, output: &Region) -> Result<PixelBuffer, ModuleError>;
}

/// Decode `blob` with the historical layout `version` of `kind`.
///
/// Shared first step of every `legacy_upgrade` implementation.
///
/// # Errors
///
/// [`ModuleError::NoUpgradePath`] when the kind has no such layout,
/// [`ModuleError::BlobSize`] when the blob length does not match.
pub fn decode_legacy(
    kind: &dyn ModuleKind,
    version: u32,
    blob: &[u8],
) -> Result<ParamRecord, ModuleError> {
    let layout = kind
        .legacy_layout(version)
        .ok_or(ModuleError::NoUpgradePath {
            module: kind.name(),
            version,
        })?;
    layout.decode(blob).ok_or(ModuleError::BlobSize {
        module: kind.name(),
        version,
        expected: layout.size(),
        actual: blob.len(),
    })
}

/// Set a field during a migration, attributing failures to `module`.
///
/// # Errors
///
/// [`ModuleError::Params`] if the field is unknown or the value does not fit.
pub fn set_field(
    module: &'static str,
    record: &mut ParamRecord,
    name: &str,
    value: impl Into<ParamValue>,
) -> Result<(), ModuleError> {
    record
        .set(name, value.into())
        .map_err(|source: ParamSetError| ModuleError::Params { module, source })
}

/// Clip `region` to `rect`, keeping at least one pixel.
///
/// Helper for cropping kernels.
#[must_use]
pub fn restrict(region: &Region, rect: &Region) -> Region {
    let mut clipped = region.intersect(rect).unwrap_or_else(|| region.clamp_to(rect));
    clipped.scale = region.scale;
    clipped
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::params::FieldDesc;

    struct Dummy;

    static FIELDS: [FieldDesc; 1] = [FieldDesc::float("gain", 1.0, 0.0, 2.0)];
    static LAYOUT: ParamLayout = ParamLayout::new(2, &FIELDS);
    static OLD_FIELDS: [FieldDesc; 2] = [
        FieldDesc::float("gain", 1.0, 0.0, 2.0),
        FieldDesc::int("spare", 0, 0, 0),
    ];
    static OLD: ParamLayout = ParamLayout::new(1, &OLD_FIELDS);

    struct Identity;

    impl Kernel for Identity {
        fn process(
            &self,
            input: &PixelBuffer,
            _output: &Region,
        ) -> Result<PixelBuffer, ModuleError> {
            Ok(input.clone())
        }
    }

    impl ModuleKind for Dummy {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn layout(&self) -> &'static ParamLayout {
            &LAYOUT
        }

        fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
            (version == 1).then_some(&OLD)
        }

        fn commit_params(
            &self,
            _params: &ParamRecord,
            _ctx: &CommitContext<'_>,
        ) -> Result<Box<dyn Kernel>, ModuleError> {
            Ok(Box::new(Identity))
        }
    }

    #[test]
    fn flags_combine() {
        let flags = ModuleFlags::ALLOW_TILING | ModuleFlags::ONE_INSTANCE;
        assert!(flags.contains(ModuleFlags::ALLOW_TILING));
        assert!(!flags.contains(ModuleFlags::DISTORT));
        assert!(flags.contains(ModuleFlags::NONE));
    }

    #[test]
    fn trait_defaults() {
        assert_eq!(Dummy.version(), 2);
        assert!(!Dummy.default_enabled());
        assert_eq!(Dummy.flags(), ModuleFlags::NONE);
        assert!(matches!(
            Dummy.legacy_upgrade(1, &[0; 8]),
            Err(ModuleError::NoUpgradePath { version: 1, .. })
        ));
    }

    #[test]
    fn decode_legacy_checks_version_and_size() {
        assert!(decode_legacy(&Dummy, 1, &[0; 8]).is_ok());
        assert!(matches!(
            decode_legacy(&Dummy, 1, &[0; 4]),
            Err(ModuleError::BlobSize {
                expected: 8,
                actual: 4,
                ..
            })
        ));
        assert!(matches!(
            decode_legacy(&Dummy, 7, &[0; 8]),
            Err(ModuleError::NoUpgradePath { version: 7, .. })
        ));
    }

    #[test]
    fn identity_regions() {
        let kernel = Identity;
        let r = Region::new(3, 4, 5, 6, 0.5);
        assert_eq!(kernel.compute_input_region(&r), r);
        assert_eq!(kernel.compute_output_region(&r), r);
        assert_eq!(kernel.overlap(), 0);
    }

    #[test]
    fn restrict_intersects_or_collapses() {
        let rect = Region::new(10, 10, 20, 20, 1.0);
        let inside = restrict(&Region::new(0, 0, 15, 15, 1.0), &rect);
        assert_eq!((inside.x, inside.y, inside.width, inside.height), (10, 10, 5, 5));
        let outside = restrict(&Region::new(100, 0, 5, 5, 1.0), &rect);
        assert_eq!((outside.x, outside.y, outside.width, outside.height), (29, 10, 1, 1));
    }
}
