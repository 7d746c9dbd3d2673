//! # Store Value Codec
//!
//! Purpose: Map the generic values produced by flow steps onto the store's
//! native byte-string keys and values, and decode replies back.
//!
//! ## Design Principles
//! 1. **Closed Variant Set**: `StoreValue` is decided once at the boundary
//!    (`TryFrom<serde_json::Value>`); nothing downstream switches on runtime
//!    types.
//! 2. **Borrow-Friendly Encoding**: `encode` returns `Cow` so strings and
//!    byte payloads go to the wire without a copy.
//! 3. **Fail Fast**: Values the store cannot represent are rejected with
//!    `UnsupportedValueType` before any store call is issued.
//!
//! ## Encoding Table
//!
//! ```text
//! Str("abc")      -> b"abc"
//! Bytes([1,2])    -> [0x01, 0x02]
//! Int32(-5)       -> b"-5"
//! Int64(1 << 40)  -> b"1099511627776"
//! Double(1.5)     -> b"1.5"      (+inf / -inf for infinities, NaN rejected)
//! Bool(true)      -> b"1"
//! ```

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{FkvError, FkvResult};

/// A key or value exchanged with the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum StoreValue {
    Str(String),
    Bytes(Vec<u8>),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Bool(bool),
}

impl StoreValue {
    /// Encodes the value into the store's byte representation.
    ///
    /// # Errors
    /// Returns `FkvError::UnsupportedValueType` for `NaN`, which has no
    /// textual form the store accepts.
    pub fn encode(&self) -> FkvResult<Cow<'_, [u8]>> {
        let encoded = match self {
            StoreValue::Str(text) => Cow::Borrowed(text.as_bytes()),
            StoreValue::Bytes(data) => Cow::Borrowed(data.as_slice()),
            StoreValue::Int32(value) => Cow::Owned(value.to_string().into_bytes()),
            StoreValue::Int64(value) => Cow::Owned(value.to_string().into_bytes()),
            StoreValue::Double(value) => Cow::Owned(encode_double(*value)?.into_bytes()),
            StoreValue::Bool(value) => {
                Cow::Borrowed(if *value { b"1".as_slice() } else { b"0".as_slice() })
            }
        };
        Ok(encoded)
    }

    /// Decodes a raw reply payload.
    ///
    /// Replies carry no type tag, so valid UTF-8 becomes `Str` and anything
    /// else stays `Bytes`.
    pub fn from_reply(data: Vec<u8>) -> Self {
        match String::from_utf8(data) {
            Ok(text) => StoreValue::Str(text),
            Err(err) => StoreValue::Bytes(err.into_bytes()),
        }
    }

    /// Converts the value back into JSON for task output.
    pub fn to_json(&self) -> Value {
        match self {
            StoreValue::Str(text) => Value::String(text.clone()),
            StoreValue::Bytes(data) => {
                Value::Array(data.iter().map(|b| Value::from(*b)).collect())
            }
            StoreValue::Int32(value) => Value::from(*value),
            StoreValue::Int64(value) => Value::from(*value),
            StoreValue::Double(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            StoreValue::Bool(value) => Value::Bool(*value),
        }
    }
}

fn encode_double(value: f64) -> FkvResult<String> {
    if value.is_nan() {
        return Err(FkvError::UnsupportedValueType("NaN double".to_string()));
    }
    if value.is_infinite() {
        let text = if value > 0.0 { "+inf" } else { "-inf" };
        return Ok(text.to_string());
    }
    Ok(value.to_string())
}

impl TryFrom<Value> for StoreValue {
    type Error = FkvError;

    fn try_from(value: Value) -> FkvResult<Self> {
        match value {
            Value::String(text) => Ok(StoreValue::Str(text)),
            Value::Bool(flag) => Ok(StoreValue::Bool(flag)),
            Value::Number(number) => number_to_value(&number),
            Value::Array(items) => bytes_from_array(&items),
            Value::Null => Err(FkvError::UnsupportedValueType("null".to_string())),
            Value::Object(_) => Err(FkvError::UnsupportedValueType("object".to_string())),
        }
    }
}

fn number_to_value(number: &Number) -> FkvResult<StoreValue> {
    if let Some(value) = number.as_i64() {
        return Ok(match i32::try_from(value) {
            Ok(small) => StoreValue::Int32(small),
            Err(_) => StoreValue::Int64(value),
        });
    }
    if number.is_u64() {
        // Only u64 values above i64::MAX reach this point.
        return Err(FkvError::UnsupportedValueType(format!(
            "unsigned integer {} out of range",
            number
        )));
    }
    number
        .as_f64()
        .map(StoreValue::Double)
        .ok_or_else(|| FkvError::UnsupportedValueType(format!("number {}", number)))
}

fn bytes_from_array(items: &[Value]) -> FkvResult<StoreValue> {
    let mut data = Vec::with_capacity(items.len());
    for item in items {
        let byte = item
            .as_u64()
            .and_then(|raw| u8::try_from(raw).ok())
            .ok_or_else(|| {
                FkvError::UnsupportedValueType("array with non-byte elements".to_string())
            })?;
        data.push(byte);
    }
    Ok(StoreValue::Bytes(data))
}

impl From<StoreValue> for Value {
    fn from(value: StoreValue) -> Self {
        value.to_json()
    }
}

impl From<&str> for StoreValue {
    fn from(value: &str) -> Self {
        StoreValue::Str(value.to_string())
    }
}

impl From<String> for StoreValue {
    fn from(value: String) -> Self {
        StoreValue::Str(value)
    }
}

impl From<Vec<u8>> for StoreValue {
    fn from(value: Vec<u8>) -> Self {
        StoreValue::Bytes(value)
    }
}

impl From<i32> for StoreValue {
    fn from(value: i32) -> Self {
        StoreValue::Int32(value)
    }
}

impl From<i64> for StoreValue {
    fn from(value: i64) -> Self {
        StoreValue::Int64(value)
    }
}

impl From<f64> for StoreValue {
    fn from(value: f64) -> Self {
        StoreValue::Double(value)
    }
}

impl From<bool> for StoreValue {
    fn from(value: bool) -> Self {
        StoreValue::Bool(value)
    }
}

impl fmt::Display for StoreValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreValue::Str(text) => f.write_str(text),
            StoreValue::Bytes(data) => write!(f, "{}", String::from_utf8_lossy(data)),
            StoreValue::Int32(value) => write!(f, "{}", value),
            StoreValue::Int64(value) => write!(f, "{}", value),
            StoreValue::Double(value) => write!(f, "{}", value),
            StoreValue::Bool(value) => write!(f, "{}", value),
        }
    }
}
