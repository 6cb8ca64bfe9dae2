//! Bound parameter rendering for the `db.sql_vars` event.

use std::borrow::Cow;

use base64ct::{Base64, Encoding};
use sea_orm::Value;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Size limits applied to bound parameters before they are logged.
///
/// Strings are cut to `str_len` characters, byte sequences to `byte_slice_len`
/// bytes. Every other value is logged as is.
///
/// ```rust
/// use sea_orm_query_tracing::SqlVarsTruncation;
///
/// let policy: SqlVarsTruncation =
///     serde_json::from_str(r#"{ "str_len": 64, "byte_slice_len": 16 }"#).unwrap();
/// assert_eq!(policy, SqlVarsTruncation::new(64, 16));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlVarsTruncation {
    pub str_len: usize,
    pub byte_slice_len: usize,
}

impl SqlVarsTruncation {
    pub fn new(str_len: usize, byte_slice_len: usize) -> Self {
        Self {
            str_len,
            byte_slice_len,
        }
    }

    fn apply(&self, value: &Value) -> Value {
        match value {
            Value::String(Some(s)) if s.chars().count() > self.str_len => {
                Value::String(Some(Box::new(s.chars().take(self.str_len).collect())))
            }
            Value::Bytes(Some(bytes)) if bytes.len() > self.byte_slice_len => {
                Value::Bytes(Some(Box::new(bytes[..self.byte_slice_len].to_vec())))
            }
            other => other.clone(),
        }
    }
}

/// Copy of `values` with the truncation policy applied.
pub fn truncate(values: &[Value], policy: &SqlVarsTruncation) -> Vec<Value> {
    values.iter().map(|value| policy.apply(value)).collect()
}

/// Render bound values as a JSON array, truncating first when a policy is given.
///
/// Byte sequences are rendered as standard base64 strings.
///
/// Best effort: `None` when any value fails to serialize.
pub fn encode(values: &[Value], policy: Option<&SqlVarsTruncation>) -> Option<String> {
    let values = match policy {
        Some(policy) => Cow::Owned(truncate(values, policy)),
        None => Cow::Borrowed(values),
    };

    let json = values
        .iter()
        .map(to_json)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    serde_json::to_string(&json).ok()
}

fn to_json(value: &Value) -> Result<JsonValue, serde_json::Error> {
    match value {
        Value::Bool(v) => serde_json::to_value(v),
        Value::TinyInt(v) => serde_json::to_value(v),
        Value::SmallInt(v) => serde_json::to_value(v),
        Value::Int(v) => serde_json::to_value(v),
        Value::BigInt(v) => serde_json::to_value(v),
        Value::TinyUnsigned(v) => serde_json::to_value(v),
        Value::SmallUnsigned(v) => serde_json::to_value(v),
        Value::Unsigned(v) => serde_json::to_value(v),
        Value::BigUnsigned(v) => serde_json::to_value(v),
        Value::Float(v) => serde_json::to_value(v),
        Value::Double(v) => serde_json::to_value(v),
        Value::Char(v) => serde_json::to_value(v),
        Value::String(v) => serde_json::to_value(v.as_deref()),
        Value::Bytes(v) => Ok(v.as_deref().map_or(JsonValue::Null, |bytes| {
            JsonValue::String(Base64::encode_string(bytes))
        })),
        // Feature-gated variants (json, chrono, uuid, decimal, ...).
        other => Ok(JsonValue::String(format!("{other:?}"))),
    }
}
