//! Persisted editing state.
//!
//! Two codecs share one staging model: a document is parsed, every entry
//! is validated and migrated to its module's current parameter version,
//! and only then is the result applied to a pipeline. A failed load
//! therefore never leaves a pipeline half-updated.
//!
//! - [`json`]: the canonical document, written and read.
//! - [`xmp`]: the legacy XMP sidecar, written and read.
//! - [`migrate`]: stepping parameter blobs through module versions.

pub mod json;
pub mod migrate;
pub mod xmp;

pub use migrate::{Staged, StagedEntry};

/// Schema version written into canonical documents.
pub const SCHEMA_VERSION: &str = "1.0";

/// Major schema version this crate reads.
pub const SCHEMA_MAJOR: u32 = 1;

/// Color workflow tag written into canonical documents.
pub const COLOR_WORKFLOW: &str = "scene-referred";

/// Generator tag written into canonical documents.
#[must_use]
pub fn generator() -> String {
    format!("rawdev {}", env!("CARGO_PKG_VERSION"))
}
