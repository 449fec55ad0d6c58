//! Type coercion for key encoding fallback
//!
//! Callers pass entity keys as loosely-typed values (a gateway handing over
//! query-string parameters sends everything as strings). When strict key
//! encoding fails, the fetch path coerces each key to its declared schema
//! type and retries: numeric widening, string parsing, null for missing.
//!
//! Coercion is deliberately conservative — it never invents precision
//! (`Double` → `Long` only when the value is integral) and never guesses at
//! binary shapes.

use crate::schema::{DataType, Schema};
use crate::value::Value;
use std::collections::BTreeMap;

/// Error returned when coercion fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CoercionError {
    /// Human-readable error message
    pub message: String,
}

impl CoercionError {
    /// Create a new coercion error
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }

    fn incompatible(value: &Value, target: &DataType) -> Self {
        Self::new(format!(
            "cannot coerce {} to {}",
            value.type_name(),
            target.type_name()
        ))
    }

    fn parse_failed(value: &str, target: &DataType) -> Self {
        Self::new(format!(
            "cannot parse '{}' as {}",
            value,
            target.type_name()
        ))
    }
}

/// Result type for coercion operations
pub type CoercionResult<T> = Result<T, CoercionError>;

/// Coerce a value to the declared type.
///
/// `Null` passes through every target; a value already of the target type
/// is returned unchanged.
pub fn coerce_value(value: &Value, target: &DataType) -> CoercionResult<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    if target.accepts(value) {
        return Ok(value.clone());
    }
    match (target, value) {
        // numeric widening
        (DataType::Double, Value::Long(v)) => Ok(Value::Double(*v as f64)),
        // narrowing only when exact
        (DataType::Long, Value::Double(v)) if v.fract() == 0.0 && v.abs() < 9.0e18 => {
            Ok(Value::Long(*v as i64))
        }
        // string parsing
        (DataType::Long, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Long)
            .map_err(|_| CoercionError::parse_failed(s, target)),
        (DataType::Double, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| CoercionError::parse_failed(s, target)),
        (DataType::Bool, Value::String(s)) => match s.trim() {
            "true" | "TRUE" | "True" => Ok(Value::Bool(true)),
            "false" | "FALSE" | "False" => Ok(Value::Bool(false)),
            _ => Err(CoercionError::parse_failed(s, target)),
        },
        // rendering to string
        (DataType::String, Value::Long(v)) => Ok(Value::String(v.to_string())),
        (DataType::String, Value::Double(v)) => Ok(Value::String(v.to_string())),
        (DataType::String, Value::Bool(v)) => Ok(Value::String(v.to_string())),
        // element-wise for lists
        (DataType::List(elem), Value::List(items)) => items
            .iter()
            .map(|v| coerce_value(v, elem))
            .collect::<CoercionResult<Vec<_>>>()
            .map(Value::List),
        _ => Err(CoercionError::incompatible(value, target)),
    }
}

/// Coerce a key map against a key schema.
///
/// Every schema field appears in the result; fields missing from the input
/// map coerce to `Null`. Extra input entries are dropped.
pub fn coerce_keys(
    keys: &BTreeMap<String, Value>,
    schema: &Schema,
) -> CoercionResult<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    for field in &schema.fields {
        let coerced = match keys.get(&field.name) {
            Some(value) => coerce_value(value, &field.data_type).map_err(|e| {
                CoercionError::new(format!("key '{}': {}", field.name, e.message))
            })?,
            None => Value::Null,
        };
        out.insert(field.name.clone(), coerced);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn test_widening_and_parsing() {
        assert_eq!(
            coerce_value(&Value::Long(3), &DataType::Double).unwrap(),
            Value::Double(3.0)
        );
        assert_eq!(
            coerce_value(&Value::String(" 42".into()), &DataType::Long).unwrap(),
            Value::Long(42)
        );
        assert_eq!(
            coerce_value(&Value::Double(2.0), &DataType::Long).unwrap(),
            Value::Long(2)
        );
        assert!(coerce_value(&Value::Double(2.5), &DataType::Long).is_err());
        assert!(coerce_value(&Value::String("x".into()), &DataType::Long).is_err());
    }

    #[test]
    fn test_coerce_keys_fills_missing_with_null() {
        let schema = Schema::new(vec![
            Field::new("user_id", DataType::String),
            Field::new("region", DataType::String),
        ]);
        let mut keys = BTreeMap::new();
        keys.insert("user_id".to_string(), Value::Long(7));

        let coerced = coerce_keys(&keys, &schema).unwrap();
        assert_eq!(coerced["user_id"], Value::String("7".into()));
        assert_eq!(coerced["region"], Value::Null);
    }

    #[test]
    fn test_coerce_keys_error_names_field() {
        let schema = Schema::new(vec![Field::new("visits", DataType::Long)]);
        let mut keys = BTreeMap::new();
        keys.insert("visits".to_string(), Value::String("many".into()));

        let err = coerce_keys(&keys, &schema).unwrap_err();
        assert!(err.message.contains("visits"));
    }
}
