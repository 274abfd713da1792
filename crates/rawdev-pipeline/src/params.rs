//! Versioned, fixed-layout parameter records.
//!
//! Each module version describes its parameters as a static table of
//! [`FieldDesc`]s. A [`ParamRecord`] is the little-endian byte image of one
//! such table: every field occupies four bytes (`f32`, `i32`, `u32`, or a
//! boolean stored as `i32` 0/1), packed in declaration order. That byte
//! image is what the legacy sidecar stores as hex.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ParamSetError;

/// Size of every field in bytes.
pub const FIELD_SIZE: usize = 4;

/// Declared storage type of a parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// 32-bit float.
    Float,
    /// Signed 32-bit integer (also used for enumerations).
    Int,
    /// Unsigned 32-bit integer.
    UInt,
    /// Boolean stored as a 32-bit integer.
    Bool,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Bool => "bool",
        })
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Float value.
    Float(f32),
    /// Signed integer value.
    Int(i32),
    /// Unsigned integer value.
    UInt(u32),
    /// Boolean value.
    Bool(bool),
}

impl ParamValue {
    /// Name of the value's type, for error messages.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Float(_) => "float",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Bool(_) => "bool",
        }
    }

    /// The value as `f32`, if it is a float.
    #[must_use]
    pub const fn as_float(self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// The value as `i32`, if it is an integer that fits.
    #[must_use]
    pub fn as_int(self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(v),
            Self::UInt(v) => i32::try_from(v).ok(),
            Self::Bool(v) => Some(i32::from(v)),
            Self::Float(_) => None,
        }
    }

    /// The value as `bool`, if it is a boolean.
    #[must_use]
    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<u32> for ParamValue {
    fn from(v: u32) -> Self {
        Self::UInt(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl FieldKind {
    /// Convert `value` into something storable in a field of this kind.
    ///
    /// Floats only go into float fields. Integers go into int, uint
    /// (when non-negative) and bool (non-zero is `true`) fields.
    #[must_use]
    pub fn coerce(self, value: ParamValue) -> Option<ParamValue> {
        match (self, value) {
            (Self::Float, ParamValue::Float(_))
            | (Self::Int, ParamValue::Int(_))
            | (Self::UInt, ParamValue::UInt(_))
            | (Self::Bool, ParamValue::Bool(_)) => Some(value),
            (Self::Int, ParamValue::UInt(v)) => i32::try_from(v).ok().map(ParamValue::Int),
            (Self::UInt, ParamValue::Int(v)) => u32::try_from(v).ok().map(ParamValue::UInt),
            (Self::Bool, ParamValue::Int(v)) => Some(ParamValue::Bool(v != 0)),
            _ => None,
        }
    }
}

/// One named field of a parameter layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDesc {
    /// Field name, unique within its layout.
    pub name: &'static str,
    /// Storage type.
    pub kind: FieldKind,
    /// Default value.
    pub default: ParamValue,
    /// Soft lower bound. Values below it are stored but warned about.
    pub min: f32,
    /// Soft upper bound.
    pub max: f32,
}

impl FieldDesc {
    /// A float field.
    #[must_use]
    pub const fn float(name: &'static str, default: f32, min: f32, max: f32) -> Self {
        Self {
            name,
            kind: FieldKind::Float,
            default: ParamValue::Float(default),
            min,
            max,
        }
    }

    /// A signed integer field.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn int(name: &'static str, default: i32, min: i32, max: i32) -> Self {
        Self {
            name,
            kind: FieldKind::Int,
            default: ParamValue::Int(default),
            min: min as f32,
            max: max as f32,
        }
    }

    /// An unsigned integer field.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn uint(name: &'static str, default: u32, min: u32, max: u32) -> Self {
        Self {
            name,
            kind: FieldKind::UInt,
            default: ParamValue::UInt(default),
            min: min as f32,
            max: max as f32,
        }
    }

    /// A boolean field.
    #[must_use]
    pub const fn boolean(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: FieldKind::Bool,
            default: ParamValue::Bool(default),
            min: 0.0,
            max: 1.0,
        }
    }

    /// Whether `value` lies inside the soft range.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn in_range(&self, value: ParamValue) -> bool {
        let v = match value {
            ParamValue::Float(v) => v,
            ParamValue::Int(v) => v as f32,
            ParamValue::UInt(v) => v as f32,
            ParamValue::Bool(_) => return true,
        };
        v >= self.min && v <= self.max
    }
}

/// The field table of one parameter version of one module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamLayout {
    /// Parameter version this layout describes.
    pub version: u32,
    /// Fields in storage order.
    pub fields: &'static [FieldDesc],
}

impl ParamLayout {
    /// Describe version `version` with the given fields.
    #[must_use]
    pub const fn new(version: u32, fields: &'static [FieldDesc]) -> Self {
        Self { version, fields }
    }

    /// Size of a record of this layout in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.fields.len() * FIELD_SIZE
    }

    /// Position and descriptor of the field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<(usize, &'static FieldDesc)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    /// A record holding every field's default.
    #[must_use]
    pub fn default_record(&'static self) -> ParamRecord {
        let mut record = ParamRecord {
            layout: self,
            bytes: vec![0; self.size()],
        };
        for (index, field) in self.fields.iter().enumerate() {
            record.write(index, field.default);
        }
        record
    }

    /// Wrap `bytes` as a record of this layout.
    ///
    /// Returns `None` when the length does not match [`size`](Self::size).
    #[must_use]
    pub fn decode(&'static self, bytes: &[u8]) -> Option<ParamRecord> {
        (bytes.len() == self.size()).then(|| ParamRecord {
            layout: self,
            bytes: bytes.to_vec(),
        })
    }
}

/// A parameter record: raw bytes plus the layout that interprets them.
#[derive(Clone)]
pub struct ParamRecord {
    layout: &'static ParamLayout,
    bytes: Vec<u8>,
}

impl fmt::Debug for ParamRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (field, value) in self.values() {
            map.entry(&field.name, &value);
        }
        map.finish()
    }
}

impl PartialEq for ParamRecord {
    fn eq(&self, other: &Self) -> bool {
        self.layout.version == other.layout.version && self.bytes == other.bytes
    }
}

impl Eq for ParamRecord {}

impl ParamRecord {
    /// The layout interpreting this record.
    #[must_use]
    pub const fn layout(&self) -> &'static ParamLayout {
        self.layout
    }

    /// Parameter version of this record.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.layout.version
    }

    /// The raw little-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the record, keeping only its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Value of the field called `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.layout.field(name).map(|(index, _)| self.read(index))
    }

    /// Store `value` into the field called `name`.
    ///
    /// The value is coerced per [`FieldKind::coerce`]; no range check.
    ///
    /// # Errors
    ///
    /// Returns [`ParamSetError::UnknownField`] if the layout has no such
    /// field and [`ParamSetError::TypeMismatch`] if the value cannot be
    /// stored in the field's type.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<(), ParamSetError> {
        let (index, field) = self
            .layout
            .field(name)
            .ok_or_else(|| ParamSetError::UnknownField(name.to_owned()))?;
        let coerced = field
            .kind
            .coerce(value)
            .ok_or_else(|| ParamSetError::TypeMismatch {
                field: name.to_owned(),
                expected: field.kind,
                actual: value.type_name(),
            })?;
        self.write(index, coerced);
        Ok(())
    }

    /// Every field with its current value, in storage order.
    pub fn values(&self) -> impl Iterator<Item = (&'static FieldDesc, ParamValue)> + '_ {
        self.layout
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| (field, self.read(index)))
    }

    /// Copy every field whose name and kind also exist in `other`.
    ///
    /// Used when stepping a record from one layout version to the next.
    pub fn copy_matching(&mut self, other: &Self) {
        for (index, field) in self.layout.fields.iter().enumerate() {
            if let Some((src, src_field)) = other.layout.field(field.name)
                && src_field.kind == field.kind
            {
                let value = other.read(src);
                self.write(index, value);
            }
        }
    }

    /// Float field `name`; `0.0` when absent or not a float.
    #[must_use]
    pub fn float(&self, name: &str) -> f32 {
        self.get(name).and_then(ParamValue::as_float).unwrap_or(0.0)
    }

    /// Integer field `name`; `0` when absent or not an integer.
    #[must_use]
    pub fn int(&self, name: &str) -> i32 {
        self.get(name).and_then(ParamValue::as_int).unwrap_or(0)
    }

    /// Unsigned field `name`; `0` when absent or not unsigned.
    #[must_use]
    pub fn uint(&self, name: &str) -> u32 {
        match self.get(name) {
            Some(ParamValue::UInt(v)) => v,
            _ => 0,
        }
    }

    /// Boolean field `name`; `false` when absent or not a boolean.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    fn word(&self, index: usize) -> [u8; FIELD_SIZE] {
        let offset = index * FIELD_SIZE;
        let mut word = [0; FIELD_SIZE];
        word.copy_from_slice(&self.bytes[offset..offset + FIELD_SIZE]);
        word
    }

    fn read(&self, index: usize) -> ParamValue {
        let word = self.word(index);
        match self.layout.fields[index].kind {
            FieldKind::Float => ParamValue::Float(f32::from_le_bytes(word)),
            FieldKind::Int => ParamValue::Int(i32::from_le_bytes(word)),
            FieldKind::UInt => ParamValue::UInt(u32::from_le_bytes(word)),
            FieldKind::Bool => ParamValue::Bool(i32::from_le_bytes(word) != 0),
        }
    }

    fn write(&mut self, index: usize, value: ParamValue) {
        let word = match value {
            ParamValue::Float(v) => v.to_le_bytes(),
            ParamValue::Int(v) => v.to_le_bytes(),
            ParamValue::UInt(v) => v.to_le_bytes(),
            ParamValue::Bool(v) => i32::from(v).to_le_bytes(),
        };
        let offset = index * FIELD_SIZE;
        self.bytes[offset..offset + FIELD_SIZE].copy_from_slice(&word);
    }
}
