//! Parameter version migration.
//!
//! A stored blob is read with the layout of its declared version, then
//! handed to the module's `legacy_upgrade` one step at a time until it
//! reaches the current version.

use crate::error::ModuleError;
use crate::params::{ParamLayout, ParamRecord};
use crate::registry::ModuleDescriptor;

/// One validated history entry, ready to apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEntry {
    /// Registration index of the module's descriptor.
    pub index: usize,
    /// New enabled flag; `None` keeps the current one.
    pub enabled: Option<bool>,
    /// Parameters at the module's current version.
    pub params: ParamRecord,
}

/// Everything a history load will change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Staged {
    /// Per-module updates.
    pub entries: Vec<StagedEntry>,
    /// Replacement masks block, when the document carries one.
    pub masks: Option<serde_json::Value>,
}

/// Layout for reading a blob of `version` written by `descriptor`'s kind.
///
/// # Errors
///
/// [`ModuleError::NewerVersion`] when `version` is ahead of the registered
/// one, [`ModuleError::NoUpgradePath`] when the kind cannot read it.
pub fn layout_for(
    descriptor: &ModuleDescriptor,
    version: u32,
) -> Result<&'static ParamLayout, ModuleError> {
    let current = descriptor.version();
    if version == current {
        return Ok(descriptor.layout());
    }
    if version > current {
        return Err(ModuleError::NewerVersion {
            module: descriptor.name(),
            version,
            current,
        });
    }
    descriptor
        .kind()
        .legacy_layout(version)
        .ok_or(ModuleError::NoUpgradePath {
            module: descriptor.name(),
            version,
        })
}

/// Bring `record` to the descriptor's current version.
///
/// # Errors
///
/// See [`upgrade_blob`].
pub fn upgrade_record(
    descriptor: &ModuleDescriptor,
    record: ParamRecord,
) -> Result<ParamRecord, ModuleError> {
    if record.version() == descriptor.version() {
        return Ok(record);
    }
    upgrade_blob(descriptor, record.version(), record.as_bytes())
}

/// Step `blob`, stored at `version`, up to the current version.
///
/// # Errors
///
/// Whatever the module's `legacy_upgrade` reports, plus
/// [`ModuleError::StalledUpgrade`] when a step does not move forward,
/// [`ModuleError::NewerVersion`] when one overshoots, and
/// [`ModuleError::BlobSize`] when the final blob does not fit the current
/// layout.
pub fn upgrade_blob(
    descriptor: &ModuleDescriptor,
    version: u32,
    blob: &[u8],
) -> Result<ParamRecord, ModuleError> {
    let module = descriptor.name();
    let current = descriptor.version();
    if version > current {
        return Err(ModuleError::NewerVersion {
            module,
            version,
            current,
        });
    }

    let mut version = version;
    let mut blob = blob.to_vec();
    while version < current {
        let (next, next_version) = descriptor.kind().legacy_upgrade(version, &blob)?;
        if next_version <= version {
            return Err(ModuleError::StalledUpgrade {
                module,
                from: version,
                to: next_version,
            });
        }
        if next_version > current {
            return Err(ModuleError::NewerVersion {
                module,
                version: next_version,
                current,
            });
        }
        tracing::debug!(module, from = version, to = next_version, "upgraded parameters");
        version = next_version;
        blob = next;
    }

    let layout = descriptor.layout();
    layout.decode(&blob).ok_or(ModuleError::BlobSize {
        module,
        version: current,
        expected: layout.size(),
        actual: blob.len(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::iop::Passthrough;
    use crate::module::{CommitContext, Kernel, ModuleKind};
    use crate::params::{FieldDesc, ParamValue};
    use crate::registry::Registry;

    #[test]
    fn exposure_v2_reaches_v7() {
        let registry = Registry::builtin();
        let exposure = registry.find("exposure").unwrap();
        let old = layout_for(exposure, 2).unwrap();
        let mut record = old.default_record();
        record.set("exposure", ParamValue::Float(1.25)).unwrap();
        record.set("black", ParamValue::Float(0.02)).unwrap();

        let upgraded = upgrade_record(exposure, record).unwrap();
        assert_eq!(upgraded.version(), 7);
        assert_eq!(upgraded.float("exposure"), 1.25);
        assert_eq!(upgraded.float("black"), 0.02);
        assert!(!upgraded.flag("compensate_hilite_pres"));
    }

    #[test]
    fn current_version_is_untouched() {
        let registry = Registry::builtin();
        let exposure = registry.find("exposure").unwrap();
        let record = exposure.default_params().clone();
        assert_eq!(upgrade_record(exposure, record.clone()).unwrap(), record);
    }

    #[test]
    fn unknown_and_newer_versions_fail() {
        let registry = Registry::builtin();
        let exposure = registry.find("exposure").unwrap();
        assert!(matches!(
            layout_for(exposure, 1),
            Err(ModuleError::NoUpgradePath { version: 1, .. })
        ));
        assert!(matches!(
            layout_for(exposure, 8),
            Err(ModuleError::NewerVersion { version: 8, current: 7, .. })
        ));
        assert!(matches!(
            upgrade_blob(exposure, 9, &[]),
            Err(ModuleError::NewerVersion { .. })
        ));
    }

    static V1_FIELDS: [FieldDesc; 1] = [FieldDesc::float("gain", 1.0, 0.0, 4.0)];
    static V1: ParamLayout = ParamLayout::new(1, &V1_FIELDS);
    static V2: ParamLayout = ParamLayout::new(2, &V1_FIELDS);

    /// Reports the version it was given, so upgrades never progress.
    struct Stuck;

    impl ModuleKind for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn layout(&self) -> &'static ParamLayout {
            &V2
        }

        fn legacy_layout(&self, version: u32) -> Option<&'static ParamLayout> {
            (version == 1).then_some(&V1)
        }

        fn legacy_upgrade(&self, old_version: u32, old: &[u8]) -> Result<(Vec<u8>, u32), ModuleError> {
            Ok((old.to_vec(), old_version))
        }

        fn commit_params(
            &self,
            _: &ParamRecord,
            _: &CommitContext<'_>,
        ) -> Result<Box<dyn Kernel>, ModuleError> {
            Ok(Box::new(Passthrough))
        }
    }

    #[test]
    fn stalled_upgrade_is_reported() {
        let registry = Registry::new().with(Stuck).unwrap();
        let stuck = registry.find("stuck").unwrap();
        let blob = V1.default_record().into_bytes();
        assert!(matches!(
            upgrade_blob(stuck, 1, &blob),
            Err(ModuleError::StalledUpgrade { from: 1, to: 1, .. })
        ));
    }
}
