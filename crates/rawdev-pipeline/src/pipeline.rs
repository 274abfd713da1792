//! A module chain bound to one source image.
//!
//! A [`Pipeline`] owns one instance of every registered module kind, in
//! the chain order fixed when it was created. Each instance carries an
//! enabled flag and a parameter record at its kind's current version.
//! Callers mutate instances by name, render the chain at any scale, and
//! persist or restore the whole state as a history document.
//!
//! Every fallible method records its error message in the thread-local
//! [`last_error`](crate::last_error) slot before returning it.

use std::path::Path;
use std::sync::Arc;

use crate::error::{EngineError, FormatError, record};
use crate::history::{self, Staged};
use crate::order::ChainOrder;
use crate::params::{FieldKind, ParamRecord, ParamValue};
use crate::registry::{ModuleDescriptor, Registry};
use crate::render::{CommittedChain, RenderResult};
use crate::roi;
use crate::source::SourceImage;
use crate::types::{Dimensions, EngineConfig, Region};

/// One module in a pipeline.
#[derive(Debug, Clone)]
struct ModuleInstance {
    /// Registration index of the descriptor.
    index: usize,
    enabled: bool,
    params: ParamRecord,
}

/// Read-only view of one module instance.
#[derive(Debug, Clone, Copy)]
pub struct ModuleView<'p> {
    descriptor: &'p ModuleDescriptor,
    enabled: bool,
    params: &'p ParamRecord,
}

impl<'p> ModuleView<'p> {
    /// Module name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    /// Whether the module takes part in renders.
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Parameter version of [`params`](Self::params).
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.params.version()
    }

    /// Current parameters.
    #[must_use]
    pub const fn params(&self) -> &'p ParamRecord {
        self.params
    }

    /// The module kind's descriptor.
    #[must_use]
    pub const fn descriptor(&self) -> &'p ModuleDescriptor {
        self.descriptor
    }

    /// Whether enabled flag and parameters equal a fresh instance's.
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.enabled == self.descriptor.default_enabled()
            && self.params == self.descriptor.default_params()
    }
}

/// An ordered module chain over a borrowed source image.
///
/// The image must outlive the pipeline. Mutation takes `&mut self`; a
/// pipeline is never shared between threads while it is being edited.
pub struct Pipeline<'img> {
    registry: Arc<Registry>,
    image: &'img SourceImage,
    order: ChainOrder,
    config: EngineConfig,
    modules: Vec<ModuleInstance>,
    masks: serde_json::Value,
}

impl std::fmt::Debug for Pipeline<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let modules: Vec<_> = self.modules().map(|m| (m.name(), m.enabled())).collect();
        f.debug_struct("Pipeline")
            .field("image", &self.image.dimensions())
            .field("order", &self.order.tag())
            .field("modules", &modules)
            .finish_non_exhaustive()
    }
}

impl<'img> Pipeline<'img> {
    /// A pipeline with one default instance per registered kind.
    pub(crate) fn new(
        registry: Arc<Registry>,
        image: &'img SourceImage,
        order: ChainOrder,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        if !image.has_pixels() {
            return Err(EngineError::invalid("source image has no pixel data"));
        }
        let modules = order
            .arrange(&registry)
            .into_iter()
            .filter_map(|d| {
                registry.index_of(d.name()).map(|index| ModuleInstance {
                    index,
                    enabled: d.default_enabled(),
                    params: d.default_params().clone(),
                })
            })
            .collect();
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            order = order.tag(),
            "created pipeline"
        );
        Ok(Self {
            registry,
            image,
            order,
            config,
            modules,
            masks: serde_json::Value::Object(serde_json::Map::new()),
        })
    }

    // ─────────────────────────── chain info ────────────────────────────

    /// Number of module instances.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// Name of the module at chain position `index`.
    #[must_use]
    pub fn module_name(&self, index: usize) -> Option<&'static str> {
        self.modules
            .get(index)
            .map(|m| self.registry.descriptor(m.index).name())
    }

    /// Every instance in chain order.
    pub fn modules(&self) -> impl Iterator<Item = ModuleView<'_>> + '_ {
        self.modules.iter().map(|m| self.view(m))
    }

    /// The source image.
    #[must_use]
    pub const fn image(&self) -> &'img SourceImage {
        self.image
    }

    /// The chain order fixed at construction.
    #[must_use]
    pub const fn order(&self) -> ChainOrder {
        self.order
    }

    /// Render configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The opaque masks block carried through history documents.
    #[must_use]
    pub const fn masks(&self) -> &serde_json::Value {
        &self.masks
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    fn view<'p>(&'p self, instance: &'p ModuleInstance) -> ModuleView<'p> {
        ModuleView {
            descriptor: self.registry.descriptor(instance.index),
            enabled: instance.enabled,
            params: &instance.params,
        }
    }

    /// Chain position of the module called `module`.
    fn position(&self, module: &str) -> Result<usize, EngineError> {
        if module.is_empty() {
            return Err(EngineError::invalid("module name must not be empty"));
        }
        let index = self
            .registry
            .index_of(module)
            .ok_or_else(|| EngineError::module_not_found(module))?;
        self.modules
            .iter()
            .position(|m| m.index == index)
            .ok_or_else(|| EngineError::module_not_found(module))
    }

    // ─────────────────────────── parameters ────────────────────────────

    /// Store `value` into `module.field`.
    ///
    /// Integers are accepted by int, uint (when non-negative) and bool
    /// fields. Values outside the field's soft range are stored with a
    /// warning. Only the targeted field changes.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for an empty name,
    /// [`EngineError::NotFound`] for an unknown module or field,
    /// [`EngineError::ParamType`] when the value does not fit the field.
    pub fn set_param(
        &mut self,
        module: &str,
        field: &str,
        value: ParamValue,
    ) -> Result<(), EngineError> {
        self.try_set_param(module, field, value).map_err(record)
    }

    fn try_set_param(
        &mut self,
        module: &str,
        field: &str,
        value: ParamValue,
    ) -> Result<(), EngineError> {
        if field.is_empty() {
            return Err(EngineError::invalid("field name must not be empty"));
        }
        let pos = self.position(module)?;
        let params = &mut self.modules[pos].params;
        if let Some((_, desc)) = params.layout().field(field)
            && desc.kind.coerce(value).is_some_and(|v| !desc.in_range(v))
        {
            tracing::warn!(
                module,
                field,
                %value,
                min = desc.min,
                max = desc.max,
                "parameter outside its usual range"
            );
        }
        params
            .set(field, value)
            .map_err(|e| EngineError::from_param(module, e))
    }

    /// Current value of `module.field`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for an empty name,
    /// [`EngineError::NotFound`] for an unknown module or field.
    pub fn get_param(&self, module: &str, field: &str) -> Result<ParamValue, EngineError> {
        self.try_get_param(module, field).map_err(record)
    }

    fn try_get_param(&self, module: &str, field: &str) -> Result<ParamValue, EngineError> {
        self.try_get_field(module, field).map(|(value, _)| value)
    }

    fn try_get_field(
        &self,
        module: &str,
        field: &str,
    ) -> Result<(ParamValue, FieldKind), EngineError> {
        if field.is_empty() {
            return Err(EngineError::invalid("field name must not be empty"));
        }
        let pos = self.position(module)?;
        let params = &self.modules[pos].params;
        params
            .layout()
            .field(field)
            .and_then(|(_, desc)| params.get(field).map(|value| (value, desc.kind)))
            .ok_or_else(|| EngineError::NotFound {
                what: "field",
                name: format!("{module}.{field}"),
            })
    }

    fn get_as<T>(
        &self,
        module: &str,
        field: &str,
        wanted: &'static str,
        convert: impl FnOnce(ParamValue) -> Option<T>,
    ) -> Result<T, EngineError> {
        let (value, expected) = self.try_get_field(module, field).map_err(record)?;
        convert(value).ok_or_else(|| {
            record(EngineError::ParamType {
                module: module.to_owned(),
                field: field.to_owned(),
                expected,
                actual: wanted,
            })
        })
    }

    /// Store a float into `module.field`.
    ///
    /// # Errors
    ///
    /// See [`set_param`](Self::set_param).
    pub fn set_float(&mut self, module: &str, field: &str, value: f32) -> Result<(), EngineError> {
        self.set_param(module, field, ParamValue::Float(value))
    }

    /// Store an integer into `module.field`.
    ///
    /// # Errors
    ///
    /// See [`set_param`](Self::set_param).
    pub fn set_int(&mut self, module: &str, field: &str, value: i32) -> Result<(), EngineError> {
        self.set_param(module, field, ParamValue::Int(value))
    }

    /// Store a boolean into `module.field`.
    ///
    /// # Errors
    ///
    /// See [`set_param`](Self::set_param).
    pub fn set_bool(&mut self, module: &str, field: &str, value: bool) -> Result<(), EngineError> {
        self.set_param(module, field, ParamValue::Bool(value))
    }

    /// Float value of `module.field`.
    ///
    /// # Errors
    ///
    /// As [`get_param`](Self::get_param), plus [`EngineError::ParamType`]
    /// when the field is not a float.
    pub fn get_float(&self, module: &str, field: &str) -> Result<f32, EngineError> {
        self.get_as(module, field, "float", ParamValue::as_float)
    }

    /// Integer value of `module.field` (int, uint or bool fields).
    ///
    /// # Errors
    ///
    /// As [`get_param`](Self::get_param), plus [`EngineError::ParamType`]
    /// when the field is a float or an unsigned value beyond `i32`.
    pub fn get_int(&self, module: &str, field: &str) -> Result<i32, EngineError> {
        self.get_as(module, field, "int", ParamValue::as_int)
    }

    /// Boolean value of `module.field`.
    ///
    /// # Errors
    ///
    /// As [`get_param`](Self::get_param), plus [`EngineError::ParamType`]
    /// when the field is not a boolean.
    pub fn get_bool(&self, module: &str, field: &str) -> Result<bool, EngineError> {
        self.get_as(module, field, "bool", ParamValue::as_bool)
    }

    // ────────────────────────── module state ───────────────────────────

    /// Turn `module` on or off. Parameters are kept either way.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for an empty name,
    /// [`EngineError::NotFound`] for an unknown module.
    pub fn enable_module(&mut self, module: &str, enabled: bool) -> Result<(), EngineError> {
        let pos = self.position(module).map_err(record)?;
        self.modules[pos].enabled = enabled;
        tracing::debug!(module, enabled, "module toggled");
        Ok(())
    }

    /// Whether `module` takes part in renders.
    ///
    /// # Errors
    ///
    /// As [`enable_module`](Self::enable_module).
    pub fn is_module_enabled(&self, module: &str) -> Result<bool, EngineError> {
        let pos = self.position(module).map_err(record)?;
        Ok(self.modules[pos].enabled)
    }

    /// Restore `module`'s default parameters and enabled flag.
    ///
    /// # Errors
    ///
    /// As [`enable_module`](Self::enable_module).
    pub fn reset_module(&mut self, module: &str) -> Result<(), EngineError> {
        let pos = self.position(module).map_err(record)?;
        let instance = &mut self.modules[pos];
        let descriptor = self.registry.descriptor(instance.index);
        instance.enabled = descriptor.default_enabled();
        instance.params = descriptor.default_params().clone();
        Ok(())
    }

    /// `module`'s parameters as a JSON object, fields in layout order.
    ///
    /// # Errors
    ///
    /// As [`enable_module`](Self::enable_module).
    pub fn module_params_json(&self, module: &str) -> Result<String, EngineError> {
        let pos = self.position(module).map_err(record)?;
        history::json::params_to_string(&self.modules[pos].params).map_err(record)
    }

    /// Overwrite the fields named in the JSON object `json`.
    ///
    /// Fields absent from the object keep their value. Nothing changes
    /// unless every field is accepted.
    ///
    /// # Errors
    ///
    /// As [`set_param`](Self::set_param) for each field, plus
    /// [`EngineError::Format`] when `json` is not a JSON object.
    pub fn set_module_params_json(&mut self, module: &str, json: &str) -> Result<(), EngineError> {
        self.try_set_module_params_json(module, json)
            .map_err(record)
    }

    fn try_set_module_params_json(&mut self, module: &str, json: &str) -> Result<(), EngineError> {
        let pos = self.position(module)?;
        let mut params = self.modules[pos].params.clone();
        history::json::apply_params_str(module, &mut params, json)?;
        self.modules[pos].params = params;
        Ok(())
    }

    // ─────────────────────────── rendering ─────────────────────────────

    /// Commit every enabled module for a render at `scale`.
    fn commit(&self, scale: f32) -> Result<CommittedChain, EngineError> {
        let enabled = self.modules.iter().filter(|m| m.enabled).map(|m| {
            let descriptor = self.registry.descriptor(m.index);
            (descriptor.kind(), &m.params)
        });
        CommittedChain::commit(enabled, self.image, scale)
    }

    /// Source dimensions at `scale`, before any module.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for a non-positive or non-finite
    /// scale, or one that shrinks the image below a pixel.
    pub fn full_dimensions(&self, scale: f32) -> Result<Dimensions, EngineError> {
        roi::full_request(self.image.dimensions(), scale)
            .map(|r| r.dimensions())
            .map_err(record)
    }

    /// Dimensions a full render at `scale` produces, after every enabled
    /// module's geometry.
    ///
    /// # Errors
    ///
    /// As [`full_dimensions`](Self::full_dimensions), plus
    /// [`EngineError::Render`] when a module cannot commit its parameters.
    pub fn output_dimensions(&self, scale: f32) -> Result<Dimensions, EngineError> {
        roi::full_request(self.image.dimensions(), scale)
            .and_then(|_| self.commit(scale))
            .map(|chain| chain.output_frame().dimensions())
            .map_err(record)
    }

    /// Render the whole image at `scale`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidArgument`] for a bad scale,
    /// [`EngineError::Render`] when a module fails,
    /// [`EngineError::NoMemory`] when a buffer cannot be allocated.
    pub fn render(&self, scale: f32) -> Result<RenderResult, EngineError> {
        roi::full_request(self.image.dimensions(), scale)
            .and_then(|request| self.render_request(&request, scale))
            .map_err(record)
    }

    /// Render the full-resolution rectangle `x, y, width, height` at
    /// `scale`.
    ///
    /// The rectangle is clamped to the image; a rectangle entirely
    /// outside collapses to one edge pixel.
    ///
    /// # Errors
    ///
    /// As [`render`](Self::render), plus [`EngineError::InvalidArgument`]
    /// when `width·scale` or `height·scale` is below one pixel.
    pub fn render_region(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        scale: f32,
    ) -> Result<RenderResult, EngineError> {
        roi::region_request(self.image.dimensions(), x, y, width, height, scale)
            .and_then(|request| self.render_request(&request, scale))
            .map_err(record)
    }

    fn render_request(&self, request: &Region, scale: f32) -> Result<RenderResult, EngineError> {
        let chain = self.commit(scale)?;
        tracing::debug!(?chain, ?request, "rendering");
        let buffer = chain.execute(self.image, request, &self.config)?;
        let result = RenderResult::from_buffer(&buffer)?;
        tracing::debug!(
            width = result.width(),
            height = result.height(),
            "render finished"
        );
        Ok(result)
    }

    // ──────────────────────────── history ──────────────────────────────

    /// The canonical JSON history document of this pipeline.
    ///
    /// # Errors
    ///
    /// [`EngineError::Generic`] if serialization fails.
    pub fn serialize_history(&self) -> Result<String, EngineError> {
        history::json::serialize(self).map_err(record)
    }

    /// Apply a canonical JSON history document.
    ///
    /// Every entry is validated and migrated before anything changes, so
    /// a failed load leaves the pipeline untouched.
    ///
    /// # Errors
    ///
    /// [`EngineError::Format`] for a malformed document,
    /// [`EngineError::ParamType`] for a value that does not fit its field,
    /// [`EngineError::Module`] when a migration fails.
    pub fn load_history(&mut self, document: &str) -> Result<(), EngineError> {
        history::json::stage(&self.registry, document)
            .map(|staged| self.apply_staged(staged))
            .map_err(record)
    }

    /// The legacy XMP sidecar of this pipeline.
    ///
    /// # Errors
    ///
    /// [`EngineError::Io`] if the XML writer fails.
    pub fn write_xmp(&self) -> Result<String, EngineError> {
        history::xmp::write(self).map_err(record)
    }

    /// Apply a legacy XMP sidecar.
    ///
    /// # Errors
    ///
    /// [`EngineError::Format`] for malformed XML, a missing history or an
    /// undecodable blob, [`EngineError::Module`] when a migration fails.
    pub fn read_xmp(&mut self, xml: &str) -> Result<(), EngineError> {
        history::xmp::stage(&self.registry, xml)
            .map(|staged| self.apply_staged(staged))
            .map_err(record)
    }

    /// Apply the sidecar stored at `path`.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] when the file does not exist,
    /// [`EngineError::Io`] when it cannot be read,
    /// [`FormatError::Encoding`] when it is
    /// not UTF-8, otherwise as [`read_xmp`](Self::read_xmp).
    pub fn read_xmp_file(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| record(EngineError::from_io(e, path)))?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| record(EngineError::Format(FormatError::Encoding(e))))?;
        self.read_xmp(&xml)
    }

    /// Write the sidecar to `path`, replacing any existing file.
    ///
    /// # Errors
    ///
    /// [`EngineError::Io`] when the file cannot be written.
    pub fn write_xmp_file(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();
        let xml = self.write_xmp()?;
        std::fs::write(path, xml).map_err(|e| record(EngineError::from_io(e, path)))?;
        tracing::info!(path = %path.display(), "wrote sidecar");
        Ok(())
    }

    /// Commit validated history entries.
    pub(crate) fn apply_staged(&mut self, staged: Staged) {
        let count = staged.entries.len();
        for entry in staged.entries {
            let Some(instance) = self.modules.iter_mut().find(|m| m.index == entry.index) else {
                continue;
            };
            if let Some(enabled) = entry.enabled {
                instance.enabled = enabled;
            }
            instance.params = entry.params;
        }
        if let Some(masks) = staged.masks {
            self.masks = masks;
        }
        tracing::debug!(entries = count, "applied history");
    }
}
