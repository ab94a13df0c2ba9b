//! Record schema: an ordered list of `(field name, type tag)` pairs.
//!
//! Field order is the encode/decode order for every format, so the schema is
//! kept as a `Vec` and loaded from JSON with key order preserved.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Unknown type tag '{tag}' for field '{field}'")]
    UnknownTypeTag { field: String, tag: String },
    #[error("Type of field '{0}' must be a string")]
    NotAString(String),
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),
}

// ── TypeTag ──────────────────────────────────────────────────────────────────

/// Declared kind of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int8,
    Int16,
    Int24,
    Int32,
    Uint8,
    Uint16,
    Uint24,
    Uint32,
    Float,
    Double,
    String,
    /// Reserved hexadecimal-width fields; no channel implements them yet.
    Hex8,
    Hex16,
    Hex32,
    Int8Array,
    Int16Array,
    Int24Array,
    Int32Array,
    Uint8Array,
    Uint16Array,
    Uint24Array,
    Uint32Array,
    FloatArray,
    DoubleArray,
    StringArray,
}

impl TypeTag {
    pub const ALL: [TypeTag; 25] = [
        TypeTag::Int8,
        TypeTag::Int16,
        TypeTag::Int24,
        TypeTag::Int32,
        TypeTag::Uint8,
        TypeTag::Uint16,
        TypeTag::Uint24,
        TypeTag::Uint32,
        TypeTag::Float,
        TypeTag::Double,
        TypeTag::String,
        TypeTag::Hex8,
        TypeTag::Hex16,
        TypeTag::Hex32,
        TypeTag::Int8Array,
        TypeTag::Int16Array,
        TypeTag::Int24Array,
        TypeTag::Int32Array,
        TypeTag::Uint8Array,
        TypeTag::Uint16Array,
        TypeTag::Uint24Array,
        TypeTag::Uint32Array,
        TypeTag::FloatArray,
        TypeTag::DoubleArray,
        TypeTag::StringArray,
    ];

    /// Canonical lowercase name, as accepted in structure files.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Int8        => "int8",
            TypeTag::Int16       => "int16",
            TypeTag::Int24       => "int24",
            TypeTag::Int32       => "int32",
            TypeTag::Uint8       => "uint8",
            TypeTag::Uint16      => "uint16",
            TypeTag::Uint24      => "uint24",
            TypeTag::Uint32      => "uint32",
            TypeTag::Float       => "float",
            TypeTag::Double      => "double",
            TypeTag::String      => "string",
            TypeTag::Hex8        => "hex8",
            TypeTag::Hex16       => "hex16",
            TypeTag::Hex32       => "hex32",
            TypeTag::Int8Array   => "int8array",
            TypeTag::Int16Array  => "int16array",
            TypeTag::Int24Array  => "int24array",
            TypeTag::Int32Array  => "int32array",
            TypeTag::Uint8Array  => "uint8array",
            TypeTag::Uint16Array => "uint16array",
            TypeTag::Uint24Array => "uint24array",
            TypeTag::Uint32Array => "uint32array",
            TypeTag::FloatArray  => "floatarray",
            TypeTag::DoubleArray => "doublearray",
            TypeTag::StringArray => "stringarray",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_name(s: &str) -> Option<Self> {
        let lower = s.to_lowercase();
        Self::ALL.into_iter().find(|tag| tag.name() == lower)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TypeTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| s.to_owned())
    }
}

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub tag:  TypeTag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<(String, TypeTag)>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        let mut out  = Vec::with_capacity(fields.len());
        for (name, tag) in fields {
            if !seen.insert(name.clone()) {
                return Err(SchemaError::DuplicateField(name));
            }
            out.push(Field { name, tag });
        }
        Ok(Self { fields: out })
    }

    /// Build from the `structure` object of a structure file.  Requires
    /// `serde_json`'s `preserve_order` so iteration follows the document.
    pub fn from_json(map: &Map<String, Value>) -> Result<Self, SchemaError> {
        let fields = map
            .iter()
            .map(|(name, value)| {
                let tag = value.as_str().ok_or_else(|| SchemaError::NotAString(name.clone()))?;
                let tag = TypeTag::from_name(tag).ok_or_else(|| SchemaError::UnknownTypeTag {
                    field: name.clone(),
                    tag:   tag.to_owned(),
                })?;
                Ok((name.clone(), tag))
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;
        Self::new(fields)
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
