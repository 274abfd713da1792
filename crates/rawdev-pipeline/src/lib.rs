//! rawdev-pipeline: headless non-destructive raw development engine.
//!
//! Loads a linear source image, runs it through an ordered chain of
//! parameterized modules and returns 8-bit RGBA pixels:
//! rawprepare -> temperature -> demosaic -> exposure -> crop -> colorin ->
//! sharpen -> levels -> vignette -> colorout.
//!
//! The editing state (which modules are on, with which parameters) is
//! kept apart from the pixels and can be saved and restored as a
//! canonical JSON document or a legacy XMP sidecar. Older parameter
//! versions in either format are migrated on load.
//!
//! The crate does no I/O beyond explicit file helpers
//! ([`source::load`], [`Pipeline::read_xmp_file`],
//! [`Pipeline::write_xmp_file`]). Encoding rendered output lives in
//! `rawdev-export`.
//!
//! ```no_run
//! use rawdev_pipeline::{Engine, SourceImage};
//!
//! # fn main() -> Result<(), rawdev_pipeline::EngineError> {
//! let engine = Engine::new();
//! let image = SourceImage::from_linear(2, 2, 3, vec![0.18; 12])?;
//! let mut pipeline = engine.create_pipeline(&image)?;
//! pipeline.set_float("exposure", "exposure", 1.5)?;
//! let rendered = pipeline.render(1.0)?;
//! let history = pipeline.serialize_history()?;
//! # let _ = (rendered, history);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod context;
pub mod error;
pub mod history;
pub mod iop;
pub mod module;
pub mod order;
pub mod params;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod roi;
pub mod source;
pub mod tiling;
pub mod types;

pub use buffer::PixelBuffer;
pub use context::Engine;
pub use error::{
    AllocError, EngineError, ErrorKind, FormatError, ModuleError, ParamSetError,
    clear_last_error, last_error,
};
pub use module::{CommitContext, Kernel, ModuleFlags, ModuleKind};
pub use order::ChainOrder;
pub use params::{FieldDesc, FieldKind, ParamLayout, ParamRecord, ParamValue};
pub use pipeline::{ModuleView, Pipeline};
pub use registry::{ModuleDescriptor, Registry};
pub use render::{RenderResult, linear_to_srgb};
pub use source::{ImageLoader, ImageMetadata, SourceImage, StandardLoader};
pub use types::{Dimensions, EngineConfig, Region};
