//! The canonical JSON history document.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "generator": "rawdev 0.1.0",
//!   "source": { "filename": "IMG_0001.png", "camera": "Maker Model" },
//!   "settings": { "iop_order": "v5.0", "color_workflow": "scene-referred" },
//!   "modules": {
//!     "exposure": { "enabled": true, "version": 7, "params": { "mode": 0, ... } }
//!   },
//!   "masks": {}
//! }
//! ```
//!
//! Modules are written in chain order and parameters in layout order, so
//! serializing the same state twice yields the same bytes. Non-finite
//! floats are written as `null` and read back as NaN.

use serde::Serialize;
use serde::ser::{SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::error::{EngineError, FormatError};
use crate::history::migrate::{Staged, StagedEntry, layout_for, upgrade_record};
use crate::history::{COLOR_WORKFLOW, SCHEMA_MAJOR, SCHEMA_VERSION, generator};
use crate::params::{FieldKind, ParamRecord, ParamValue};
use crate::pipeline::{ModuleView, Pipeline};
use crate::registry::Registry;

// ───────────────────────────── writing ─────────────────────────────

#[derive(Serialize)]
struct DocumentOut<'a> {
    version: &'static str,
    generator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<SourceOut>,
    settings: SettingsOut,
    modules: ModulesOut<'a>,
    masks: &'a Value,
}

#[derive(Serialize)]
struct SourceOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    camera: Option<String>,
}

#[derive(Serialize)]
struct SettingsOut {
    iop_order: &'static str,
    color_workflow: &'static str,
}

/// Module map in chain order.
struct ModulesOut<'a>(Vec<ModuleView<'a>>);

impl Serialize for ModulesOut<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for module in &self.0 {
            map.serialize_entry(
                module.name(),
                &ModuleOut {
                    enabled: module.enabled(),
                    version: module.version(),
                    params: ParamsOut(module.params()),
                },
            )?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct ModuleOut<'a> {
    enabled: bool,
    version: u32,
    params: ParamsOut<'a>,
}

/// Parameter map in layout order.
struct ParamsOut<'a>(&'a ParamRecord);

impl Serialize for ParamsOut<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.layout().fields.len()))?;
        for (field, value) in self.0.values() {
            match value {
                ParamValue::Float(v) if v.is_finite() => map.serialize_entry(field.name, &v)?,
                ParamValue::Float(_) => map.serialize_entry(field.name, &Option::<f32>::None)?,
                ParamValue::Int(v) => map.serialize_entry(field.name, &v)?,
                ParamValue::UInt(v) => map.serialize_entry(field.name, &v)?,
                ParamValue::Bool(v) => map.serialize_entry(field.name, &v)?,
            }
        }
        map.end()
    }
}

/// The canonical document describing `pipeline`, with a trailing newline.
///
/// # Errors
///
/// [`EngineError::Generic`] if serialization fails.
pub fn serialize(pipeline: &Pipeline<'_>) -> Result<String, EngineError> {
    let metadata = pipeline.image().metadata();
    let source = (metadata.filename.is_some() || metadata.camera().is_some()).then(|| SourceOut {
        filename: metadata.filename.clone(),
        camera: metadata.camera(),
    });
    let document = DocumentOut {
        version: SCHEMA_VERSION,
        generator: generator(),
        source,
        settings: SettingsOut {
            iop_order: pipeline.order().tag(),
            color_workflow: COLOR_WORKFLOW,
        },
        modules: ModulesOut(pipeline.modules().collect()),
        masks: pipeline.masks(),
    };
    let mut text = serde_json::to_string_pretty(&document)
        .map_err(|e| EngineError::Generic(format!("cannot serialize history: {e}")))?;
    text.push('\n');
    Ok(text)
}

/// `record` as a compact JSON object, fields in layout order.
///
/// # Errors
///
/// [`EngineError::Generic`] if serialization fails.
pub fn params_to_string(record: &ParamRecord) -> Result<String, EngineError> {
    serde_json::to_string(&ParamsOut(record))
        .map_err(|e| EngineError::Generic(format!("cannot serialize parameters: {e}")))
}

// ───────────────────────────── reading ─────────────────────────────

/// What to do with a parameter name the layout does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnknownField {
    /// Warn and carry on; documents may come from newer writers.
    Skip,
    /// Refuse; the caller named the field directly.
    Reject,
}

/// Parse and validate `text`, migrating every known module entry.
///
/// # Errors
///
/// [`EngineError::Format`] for malformed documents,
/// [`EngineError::ParamType`] for values that do not fit their field,
/// [`EngineError::Module`] when a migration fails.
pub fn stage(registry: &Registry, text: &str) -> Result<Staged, EngineError> {
    let document: Value = serde_json::from_str(text).map_err(FormatError::Json)?;
    let Value::Object(root) = document else {
        return Err(FormatError::InvalidEntry("document is not a JSON object".into()).into());
    };
    check_version(root.get("version"))?;

    let modules = match root.get("modules") {
        None | Some(Value::Null) => None,
        Some(Value::Object(modules)) => Some(modules),
        Some(_) => {
            return Err(FormatError::InvalidEntry("\"modules\" is not an object".into()).into());
        }
    };

    let mut entries = Vec::new();
    for (name, entry) in modules.into_iter().flatten() {
        let Some(index) = registry.index_of(name) else {
            tracing::warn!(module = %name, "unknown module in history, skipped");
            continue;
        };
        entries.push(stage_entry(registry, index, name, entry)?);
    }
    Ok(Staged {
        entries,
        masks: root.get("masks").cloned(),
    })
}

fn check_version(version: Option<&Value>) -> Result<(), FormatError> {
    let version = version.ok_or(FormatError::MissingVersion)?;
    let Value::String(text) = version else {
        return Err(FormatError::InvalidVersion(version.to_string()));
    };
    let (major, minor) = text
        .split_once('.')
        .ok_or_else(|| FormatError::InvalidVersion(text.clone()))?;
    let (Ok(major), Ok(_)) = (major.parse::<u32>(), minor.parse::<u32>()) else {
        return Err(FormatError::InvalidVersion(text.clone()));
    };
    if major != SCHEMA_MAJOR {
        return Err(FormatError::UnsupportedVersion(text.clone()));
    }
    Ok(())
}

fn stage_entry(
    registry: &Registry,
    index: usize,
    name: &str,
    entry: &Value,
) -> Result<StagedEntry, EngineError> {
    let descriptor = registry.descriptor(index);
    let Value::Object(entry) = entry else {
        return Err(FormatError::InvalidEntry(format!("module {name} is not an object")).into());
    };

    let enabled = match entry.get("enabled") {
        None => None,
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Number(n)) if n.as_u64() == Some(0) => Some(false),
        Some(Value::Number(n)) if n.as_u64() == Some(1) => Some(true),
        Some(other) => {
            return Err(FormatError::InvalidEntry(format!(
                "module {name}: \"enabled\" is {other}, expected a boolean"
            ))
            .into());
        }
    };

    let version = match entry.get("version") {
        None => descriptor.version(),
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| {
                FormatError::InvalidEntry(format!(
                    "module {name}: \"version\" is {value}, expected an unsigned integer"
                ))
            })?,
    };

    let layout = layout_for(descriptor, version)?;
    let mut params = layout.default_record();
    match entry.get("params") {
        None => {}
        Some(Value::Object(fields)) => {
            apply_fields(name, &mut params, fields, UnknownField::Skip)?;
        }
        Some(_) => {
            return Err(
                FormatError::InvalidEntry(format!("module {name}: \"params\" is not an object"))
                    .into(),
            );
        }
    }

    Ok(StagedEntry {
        index,
        enabled,
        params: upgrade_record(descriptor, params)?,
    })
}

/// Overwrite the fields of `record` named in the JSON object `json`.
///
/// # Errors
///
/// [`EngineError::Format`] when `json` is not an object,
/// [`EngineError::NotFound`] for an unknown field,
/// [`EngineError::ParamType`] for a value that does not fit its field.
pub fn apply_params_str(module: &str, record: &mut ParamRecord, json: &str) -> Result<(), EngineError> {
    let value: Value = serde_json::from_str(json).map_err(FormatError::Json)?;
    let Value::Object(fields) = value else {
        return Err(FormatError::InvalidEntry(format!("parameters for {module} are not an object")).into());
    };
    apply_fields(module, record, &fields, UnknownField::Reject)
}

fn apply_fields(
    module: &str,
    record: &mut ParamRecord,
    fields: &Map<String, Value>,
    unknown: UnknownField,
) -> Result<(), EngineError> {
    for (field, json) in fields {
        let Some((_, desc)) = record.layout().field(field) else {
            match unknown {
                UnknownField::Skip => {
                    tracing::warn!(module, field = %field, "unknown parameter in history, skipped");
                    continue;
                }
                UnknownField::Reject => {
                    return Err(EngineError::NotFound {
                        what: "field",
                        name: format!("{module}.{field}"),
                    });
                }
            }
        };
        let value = json_to_value(desc.kind, json).ok_or_else(|| EngineError::ParamType {
            module: module.to_owned(),
            field: field.clone(),
            expected: desc.kind,
            actual: json_type_name(json),
        })?;
        if unknown == UnknownField::Reject && !desc.in_range(value) {
            tracing::warn!(module, field = %field, %value, "parameter outside its usual range");
        }
        record
            .set(field, value)
            .map_err(|e| EngineError::from_param(module, e))?;
    }
    Ok(())
}

/// Convert a JSON value for a field of `kind`.
#[allow(clippy::cast_possible_truncation)]
fn json_to_value(kind: FieldKind, json: &Value) -> Option<ParamValue> {
    match (kind, json) {
        (FieldKind::Float, Value::Null) => Some(ParamValue::Float(f32::NAN)),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().map(|v| ParamValue::Float(v as f32)),
        (FieldKind::Int, Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(ParamValue::Int),
        (FieldKind::UInt, Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(ParamValue::UInt),
        (FieldKind::Bool, Value::Bool(b)) => Some(ParamValue::Bool(*b)),
        (FieldKind::Bool, Value::Number(n)) => match n.as_u64() {
            Some(0) => Some(ParamValue::Bool(false)),
            Some(1) => Some(ParamValue::Bool(true)),
            _ => None,
        },
        _ => None,
    }
}

const fn json_type_name(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
