//! Semantic column types declared by entity schemas.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Semantic type of an entity field.
///
/// Used to check the shape of identity columns before they become keys, and
/// to describe entity fields in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlType {
    // Integer types
    TinyInt,
    SmallInt,
    Integer,
    BigInt,

    // Floating point
    Real,
    Double,

    // Fixed precision
    Decimal,

    // Boolean
    Boolean,

    // String types
    Text,

    // Binary
    Blob,

    // Date/time types
    Date,
    Time,
    Timestamp,

    // UUID
    Uuid,

    // JSON
    Json,

    /// Accepts any value; used for key-only or loosely typed columns.
    Any,
}

impl SqlType {
    /// Get the SQL type name for this type.
    pub fn sql_name(&self) -> &'static str {
        match self {
            SqlType::TinyInt => "TINYINT",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Decimal => "DECIMAL",
            SqlType::Boolean => "BOOLEAN",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Uuid => "UUID",
            SqlType::Json => "JSON",
            SqlType::Any => "ANY",
        }
    }

    /// Check if this is an integer type.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            SqlType::TinyInt | SqlType::SmallInt | SqlType::Integer | SqlType::BigInt
        )
    }

    /// Whether a non-null `value` has a shape this type can hold.
    pub fn admits(&self, value: &Value) -> bool {
        match self {
            SqlType::Any => true,
            t if t.is_integer() => value.is_integer(),
            SqlType::Real | SqlType::Double => value.as_f64().is_some() && !value.is_textual(),
            SqlType::Decimal => value.is_textual() || value.as_f64().is_some(),
            SqlType::Boolean => value.as_bool().is_some(),
            SqlType::Text => value.is_textual(),
            SqlType::Blob => matches!(value, Value::Bytes(_) | Value::Text(_)),
            SqlType::Date => matches!(value, Value::Date(_)),
            SqlType::Time => matches!(value, Value::Time(_)),
            SqlType::Timestamp => matches!(value, Value::Timestamp(_)),
            SqlType::Uuid => {
                matches!(value, Value::Uuid(_)) || matches!(value, Value::Bytes(b) if b.len() == 16)
            }
            SqlType::Json => matches!(value, Value::Json(_) | Value::Text(_)),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_keys_reject_text() {
        assert!(SqlType::BigInt.admits(&Value::Int(3)));
        assert!(!SqlType::BigInt.admits(&Value::Text("3".into())));
        assert!(!SqlType::Integer.admits(&Value::Double(3.0)));
    }

    #[test]
    fn test_sql_type_is_copy() {
        let declared = SqlType::SmallInt;
        let copied = declared;
        assert_eq!(declared, copied);
        assert!(copied.is_integer());
    }

    #[test]
    fn test_uuid_shapes() {
        assert!(SqlType::Uuid.admits(&Value::Uuid([0; 16])));
        assert!(SqlType::Uuid.admits(&Value::Bytes(vec![0; 16])));
        assert!(!SqlType::Uuid.admits(&Value::Bytes(vec![0; 4])));
    }

    #[test]
    fn test_any_admits_everything() {
        assert!(SqlType::Any.admits(&Value::Json(serde_json::json!({"a": 1}))));
        assert_eq!(SqlType::Any.sql_name(), "ANY");
        assert_eq!(SqlType::Double.sql_name(), "DOUBLE PRECISION");
    }
}
