//! Schemas binding codecs to field layouts
//!
//! A `Schema` is an ordered list of named, typed fields. Field order is
//! significant: the binary row format encodes fields in schema order, and
//! the output codec's field order defines the Response key set.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Declared type of a schema field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Boolean
    Bool,
    /// 64-bit signed integer
    Long,
    /// 64-bit floating point
    Double,
    /// UTF-8 string
    String,
    /// Raw binary
    Bytes,
    /// Homogeneous list of the element type
    List(Box<DataType>),
}

impl DataType {
    /// True if a value of this shape conforms to the declared type.
    ///
    /// `Null` conforms to every type (absence is encoded in the presence
    /// bitmap, not the type system).
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (DataType::Bool, Value::Bool(_)) => true,
            (DataType::Long, Value::Long(_)) => true,
            (DataType::Double, Value::Double(_)) => true,
            (DataType::String, Value::String(_)) => true,
            (DataType::Bytes, Value::Bytes(_)) => true,
            (DataType::List(elem), Value::List(items)) => items.iter().all(|v| elem.accepts(v)),
            _ => false,
        }
    }

    /// Short name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Long => "long",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Bytes => "bytes",
            DataType::List(_) => "list",
        }
    }
}

/// A named, typed field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name (output column name at the serving layer)
    pub name: String,
    /// Declared type
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Field {
    /// Create a field
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// An ordered list of fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    /// Fields in declaration (= wire) order
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a schema from fields
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the schema has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field by name
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Field names in order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// A copy of this schema with every field name prefixed `"<prefix>_"`.
    ///
    /// Used by the join layer to build the unified logging value schema.
    pub fn prefixed(&self, prefix: &str) -> Schema {
        Schema::new(
            self.fields
                .iter()
                .map(|f| Field::new(format!("{}_{}", prefix, f.name), f.data_type.clone()))
                .collect(),
        )
    }
}
