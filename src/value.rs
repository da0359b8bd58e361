//! External storage values and the conversions between them and Rust types.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RowMapError;

/// A value as it is stored in, or read from, a relational column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Text(_) => "text",
            Value::Timestamp(_) => "timestamp",
        }
    }

    /// Integer view used for keys. `Int` and `Long` both qualify.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Equality that ignores the `Int`/`Long` width difference.
    ///
    /// Drivers report every integer as a long, while rows serialized from
    /// memory keep their declared width.
    pub fn same_key(&self, other: &Value) -> bool {
        match (self.as_i64(), other.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A Rust type with a storage representation.
///
/// `from_value` is never handed [`Value::Null`]; nulls are handled by the
/// field mapper before conversion.
pub trait SqlType: Clone + Send + Sync + 'static {
    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Result<Self, RowMapError>;

    /// Limits the value to `max_chars` characters. Only textual types
    /// have anything to cut.
    fn truncated(self, _max_chars: usize) -> Self {
        self
    }
}

fn mismatch(expected: &str, found: &Value) -> RowMapError {
    RowMapError::mapping(format!(
        "expected {expected} value, found {}",
        found.type_name()
    ))
}

impl SqlType for i64 {
    fn into_value(self) -> Value {
        Value::Long(self)
    }

    fn from_value(value: Value) -> Result<Self, RowMapError> {
        value.as_i64().ok_or_else(|| mismatch("long", &value))
    }
}

impl SqlType for i32 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }

    fn from_value(value: Value) -> Result<Self, RowMapError> {
        match value {
            Value::Int(v) => Ok(v),
            Value::Long(v) => i32::try_from(v)
                .map_err(|e| RowMapError::mapping_caused(format!("long {v} does not fit int"), e)),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl SqlType for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: Value) -> Result<Self, RowMapError> {
        match value {
            Value::Text(v) => Ok(v),
            other => Err(mismatch("text", &other)),
        }
    }

    fn truncated(self, max_chars: usize) -> Self {
        match self.char_indices().nth(max_chars) {
            Some((cut, _)) => self[..cut].to_string(),
            None => self,
        }
    }
}

impl SqlType for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::Timestamp(self)
    }

    fn from_value(value: Value) -> Result<Self, RowMapError> {
        match value {
            Value::Timestamp(v) => Ok(v),
            Value::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|v| v.with_timezone(&Utc))
                .map_err(|e| RowMapError::mapping_caused(format!("bad timestamp '{text}'"), e)),
            Value::Long(millis) => Utc
                .timestamp_millis_opt(millis)
                .single()
                .ok_or_else(|| RowMapError::mapping(format!("timestamp {millis} out of range"))),
            other => Err(mismatch("timestamp", &other)),
        }
    }
}
