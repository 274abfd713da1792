//! Error taxonomy for the engine and the thread-local last-error slot.
//!
//! Every fallible public entry point returns [`EngineError`]. Callers that
//! bridge to a C-style API can map an error to its stable integer code via
//! [`EngineError::kind`] and [`ErrorKind::code`], and read the message of
//! the most recent failure on the current thread with [`last_error`].

use std::cell::RefCell;
use std::fmt;

use crate::params::FieldKind;

/// Coarse classification of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Catch-all for failures with no more specific kind.
    Generic,
    /// Malformed caller input, checked before any side effect.
    InvalidArgument,
    /// A named module, field or file is absent.
    NotFound,
    /// Filesystem failure.
    Io,
    /// A document or sidecar failed to parse or violates its schema.
    Format,
    /// A buffer allocation could not be satisfied.
    NoMemory,
    /// A found module's migration or application failed.
    Module,
    /// The value type does not match the field's declared type.
    ParamType,
    /// A module's processing step failed during a render.
    Render,
    /// Encoding the rendered output failed.
    Export,
}

impl ErrorKind {
    /// Stable integer code for this kind (`0` is reserved for success).
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Generic => -1,
            Self::InvalidArgument => -2,
            Self::NotFound => -3,
            Self::Io => -4,
            Self::Format => -5,
            Self::NoMemory => -6,
            Self::Module => -9,
            Self::ParamType => -10,
            Self::Render => -11,
            Self::Export => -12,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Generic => "generic error",
            Self::InvalidArgument => "invalid argument",
            Self::NotFound => "not found",
            Self::Io => "I/O error",
            Self::Format => "format error",
            Self::NoMemory => "out of memory",
            Self::Module => "module error",
            Self::ParamType => "parameter type mismatch",
            Self::Render => "render error",
            Self::Export => "export error",
        };
        f.write_str(name)
    }
}

/// Why a history document or sidecar was rejected.
///
/// All variants surface as [`ErrorKind::Format`]; the variant lets
/// recovery logic tell a broken file from a valid file with no history.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The document is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document has no top-level `version` key.
    #[error("document has no \"version\" key")]
    MissingVersion,

    /// The `version` key is not a `MAJOR.MINOR` string.
    #[error("document version {0} is not a MAJOR.MINOR string")]
    InvalidVersion(String),

    /// The document declares a major version this codec cannot read.
    #[error("unsupported document version {0}")]
    UnsupportedVersion(String),

    /// The sidecar is not well-formed XML.
    #[error("malformed XML: {0}")]
    MalformedXml(#[from] quick_xml::Error),

    /// The sidecar file is not UTF-8 text.
    #[error("sidecar is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    /// The sidecar is well-formed but has no history container.
    #[error("sidecar has no darktable:history element")]
    MissingHistory,

    /// A history entry or module entry has the wrong shape.
    #[error("invalid history entry: {0}")]
    InvalidEntry(String),

    /// A stored parameter blob cannot be decoded.
    #[error("invalid parameters for {module}: {reason}")]
    InvalidParams {
        /// Module the blob belongs to.
        module: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A source image could not be decoded.
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
}

/// Failure reported by a module kind while migrating or processing.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The module has no migration from the given parameter version.
    #[error("{module}: no upgrade path from parameter version {version}")]
    NoUpgradePath {
        /// Module name.
        module: &'static str,
        /// Stored parameter version.
        version: u32,
    },

    /// The stored version is newer than the registered one.
    #[error("{module}: parameter version {version} is newer than supported version {current}")]
    NewerVersion {
        /// Module name.
        module: &'static str,
        /// Stored parameter version.
        version: u32,
        /// Registered parameter version.
        current: u32,
    },

    /// A migration step returned a version that does not move forward.
    #[error("{module}: upgrade from version {from} returned version {to}")]
    StalledUpgrade {
        /// Module name.
        module: &'static str,
        /// Version passed to the step.
        from: u32,
        /// Version the step reported.
        to: u32,
    },

    /// A parameter blob has the wrong size for its declared version.
    #[error("{module}: parameter blob has {actual} bytes, version {version} expects {expected}")]
    BlobSize {
        /// Module name.
        module: &'static str,
        /// Declared version.
        version: u32,
        /// Bytes the layout requires.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },

    /// A migration touched a field its target layout does not have.
    #[error("{module}: {source}")]
    Params {
        /// Module name.
        module: &'static str,
        /// Underlying field error.
        #[source]
        source: ParamSetError,
    },

    /// The input buffer has a channel count the kernel cannot handle.
    #[error("{module}: unsupported pixel format ({channels} channels, needs {required})")]
    UnsupportedFormat {
        /// Module name.
        module: &'static str,
        /// Channels in the input buffer.
        channels: usize,
        /// Channels the kernel needs.
        required: usize,
    },

    /// A working buffer could not be allocated.
    #[error(transparent)]
    Alloc(#[from] AllocError),

    /// Any other processing failure.
    #[error("{module}: {reason}")]
    Failed {
        /// Module name.
        module: &'static str,
        /// What went wrong.
        reason: String,
    },
}

/// A pixel buffer allocation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot allocate {bytes} bytes for a {width}x{height} buffer")]
pub struct AllocError {
    /// Requested size in bytes.
    pub bytes: usize,
    /// Buffer width.
    pub width: u32,
    /// Buffer height.
    pub height: u32,
}

/// Why a field write on a [`ParamRecord`](crate::params::ParamRecord) was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamSetError {
    /// The layout has no field with this name.
    #[error("no field named {0}")]
    UnknownField(String),

    /// The value cannot be stored in the field's type.
    #[error("field {field} is {expected}, value is {actual}")]
    TypeMismatch {
        /// Field name.
        field: String,
        /// Declared field type.
        expected: FieldKind,
        /// Type of the offered value.
        actual: &'static str,
    },
}

/// Errors returned by the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Malformed caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A named module, field or file is absent.
    #[error("{what} not found: {name}")]
    NotFound {
        /// What kind of thing was looked up.
        what: &'static str,
        /// The name that was looked up.
        name: String,
    },

    /// The value type does not match the field's declared type.
    #[error("type mismatch on {module}.{field}: field is {expected}, value is {actual}")]
    ParamType {
        /// Module name.
        module: String,
        /// Field name.
        field: String,
        /// Declared field type.
        expected: FieldKind,
        /// Type of the offered value.
        actual: &'static str,
    },

    /// A document or sidecar was rejected.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// A module's migration or application failed.
    #[error("module error: {0}")]
    Module(#[from] ModuleError),

    /// A module's processing step failed during a render.
    #[error("render failed in {module}: {source}")]
    Render {
        /// Module whose kernel failed.
        module: String,
        /// Kernel error.
        #[source]
        source: ModuleError,
    },

    /// Encoding or writing the rendered output failed.
    #[error("export failed: {0}")]
    Export(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A buffer allocation could not be satisfied.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// Anything else.
    #[error("{0}")]
    Generic(String),
}

impl From<AllocError> for EngineError {
    fn from(error: AllocError) -> Self {
        Self::NoMemory(error.to_string())
    }
}

impl EngineError {
    /// The coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ParamType { .. } => ErrorKind::ParamType,
            Self::Format(_) => ErrorKind::Format,
            Self::Module(_) => ErrorKind::Module,
            Self::Render { .. } => ErrorKind::Render,
            Self::Export(_) => ErrorKind::Export,
            Self::Io(_) => ErrorKind::Io,
            Self::NoMemory(_) => ErrorKind::NoMemory,
            Self::Generic(_) => ErrorKind::Generic,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn module_not_found(name: &str) -> Self {
        Self::NotFound {
            what: "module",
            name: name.to_owned(),
        }
    }

    /// Attribute a refused field write to `module`.
    pub(crate) fn from_param(module: &str, error: ParamSetError) -> Self {
        match error {
            ParamSetError::UnknownField(field) => Self::NotFound {
                what: "field",
                name: format!("{module}.{field}"),
            },
            ParamSetError::TypeMismatch {
                field,
                expected,
                actual,
            } => Self::ParamType {
                module: module.to_owned(),
                field,
                expected,
                actual,
            },
        }
    }

    /// Map an I/O error on `path`, promoting a missing file to `NotFound`.
    pub(crate) fn from_io(error: std::io::Error, path: &std::path::Path) -> Self {
        if error.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                what: "file",
                name: path.display().to_string(),
            }
        } else {
            Self::Io(error)
        }
    }
}

// ──────────────────────────── last error ─────────────────────────────

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Message of the most recent failure on this thread, if any.
///
/// Overwritten by the next failing call, so read it immediately.
#[must_use]
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Forget the message recorded on this thread.
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| slot.borrow_mut().take());
}

/// Remember `error` as this thread's last error and hand it back.
///
/// Meant for `map_err` at public entry points.
pub(crate) fn record(error: EngineError) -> EngineError {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(error.to_string()));
    error
}
