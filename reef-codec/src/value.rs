//! Value - polymorphic feature value type
//!
//! Every value flowing through the fetch path — entity keys, streaming row
//! columns, finalized feature outputs — is one of these shapes. The enum is
//! closed on purpose: codecs, coercion and the aggregator all dispatch over
//! it exhaustively.
//!
//! ## Serde
//!
//! Serialized untagged, so metadata documents and canonical key JSON read
//! naturally (`42`, `"a"`, `[1, 2]`). `List` precedes `Bytes` so JSON
//! arrays always deserialize as lists; `Bytes` only round-trips through the
//! binary codecs.

use serde::{Deserialize, Serialize};

/// Polymorphic value type for keys, row columns and outputs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Long(i64),
    /// 64-bit floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Homogeneous list (element type declared by the schema)
    List(Vec<Value>),
    /// Raw binary
    Bytes(Vec<u8>),
}

impl Value {
    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Bytes(_) => "bytes",
        }
    }

    /// True if this is `Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view with Long→Double widening
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer view (no narrowing from Double)
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// String view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json() {
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Long(42));

        let v: Value = serde_json::from_str("4.5").unwrap();
        assert_eq!(v, Value::Double(4.5));

        let v: Value = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(v, Value::List(vec![Value::Long(1), Value::Long(2)]));

        let v: Value = serde_json::from_str("null").unwrap();
        assert!(v.is_null());
    }

    #[test]
    fn test_widening_view() {
        assert_eq!(Value::Long(3).as_double(), Some(3.0));
        assert_eq!(Value::Double(3.5).as_double(), Some(3.5));
        assert_eq!(Value::String("3".into()).as_double(), None);
        assert_eq!(Value::Double(3.5).as_long(), None);
    }
}
