//! Value codec
//!
//! Converts between the statement service's tagged field representation
//! (`{"stringValue": "x"}`, `{"isNull": true}`, ...) and native values.
//!
//! A field must carry exactly one recognized tag. Unknown tags, empty
//! fields and fields carrying several tags are decode errors; nothing is
//! silently mapped to null.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::errors::DecodeError;
use crate::observability::Event;

/// Tag names in precedence order.
const TAG_NULL: &str = "isNull";
const TAG_STRING: &str = "stringValue";
const TAG_LONG: &str = "longValue";
const TAG_DOUBLE: &str = "doubleValue";
const TAG_BOOLEAN: &str = "booleanValue";

/// A native value held in a record column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
}

impl Value {
    /// Converts a JSON scalar into a native value.
    ///
    /// Objects and arrays have no column representation and are rejected.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, UnsupportedJson> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::String(s) => Ok(Value::String(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Long(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Value::Double(f))
                } else {
                    Err(UnsupportedJson("number"))
                }
            }
            serde_json::Value::Array(_) => Err(UnsupportedJson("array")),
            serde_json::Value::Object(_) => Err(UnsupportedJson("object")),
        }
    }

    /// Converts back into JSON.
    ///
    /// JSON has no NaN or infinity; such a double becomes `null` and the
    /// substitution is logged.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Long(i) => serde_json::Value::from(*i),
            Value::Double(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => serde_json::Value::Number(n),
                None => {
                    debug!(
                        event = Event::NonFiniteDouble.as_str(),
                        value = %f,
                        "non-finite double rendered as null"
                    );
                    serde_json::Value::Null
                }
            },
            Value::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Long(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Long(_) => "integer",
            Value::Double(_) => "float",
            Value::Boolean(_) => "boolean",
        }
    }

    /// Text form sent as a bind parameter. `None` for null, which cannot be
    /// bound and is written as a `NULL` literal instead.
    pub fn parameter_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Long(i) => Some(i.to_string()),
            Value::Double(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
        }
    }

    /// SQL type a bound parameter is cast to. Strings bind untyped.
    pub fn sql_cast(&self) -> Option<&'static str> {
        match self {
            Value::Long(_) => Some("BIGINT"),
            Value::Double(_) => Some("DOUBLE PRECISION"),
            Value::Boolean(_) => Some("BOOLEAN"),
            Value::Null | Value::String(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::String(s) => write!(f, "{}", s),
            Value::Long(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Long(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Double(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

/// A JSON value with no column representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedJson(pub &'static str);

impl fmt::Display for UnsupportedJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} values are not supported", self.0)
    }
}

/// One tagged value as it appears in a result row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_value: Option<bool>,
    /// Any tag this codec does not know.
    #[serde(flatten)]
    pub unrecognized: BTreeMap<String, serde_json::Value>,
}

impl Field {
    pub fn null() -> Self {
        Self {
            is_null: Some(true),
            ..Default::default()
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self {
            string_value: Some(s.into()),
            ..Default::default()
        }
    }

    pub fn long(i: i64) -> Self {
        Self {
            long_value: Some(i),
            ..Default::default()
        }
    }

    pub fn double(f: f64) -> Self {
        Self {
            double_value: Some(f),
            ..Default::default()
        }
    }

    pub fn boolean(b: bool) -> Self {
        Self {
            boolean_value: Some(b),
            ..Default::default()
        }
    }

    /// Encodes a native value.
    pub fn encode(value: &Value) -> Self {
        match value {
            Value::Null => Self::null(),
            Value::String(s) => Self::string(s.clone()),
            Value::Long(i) => Self::long(*i),
            Value::Double(f) => Self::double(*f),
            Value::Boolean(b) => Self::boolean(*b),
        }
    }

    /// Decodes into exactly one native value.
    pub fn decode(&self) -> Result<Value, DecodeError> {
        if let Some(tag) = self.unrecognized.keys().next() {
            return Err(DecodeError::UnrecognizedTag(tag.clone()));
        }

        // `isNull: false` says nothing about the value and is not a tag.
        let mut present: Vec<(&'static str, Value)> = Vec::with_capacity(1);
        if self.is_null == Some(true) {
            present.push((TAG_NULL, Value::Null));
        }
        if let Some(s) = &self.string_value {
            present.push((TAG_STRING, Value::String(s.clone())));
        }
        if let Some(i) = self.long_value {
            present.push((TAG_LONG, Value::Long(i)));
        }
        if let Some(f) = self.double_value {
            present.push((TAG_DOUBLE, Value::Double(f)));
        }
        if let Some(b) = self.boolean_value {
            present.push((TAG_BOOLEAN, Value::Boolean(b)));
        }

        match present.len() {
            0 => Err(DecodeError::EmptyField),
            1 => Ok(present.remove(0).1),
            _ => Err(DecodeError::AmbiguousField(
                present.into_iter().map(|(tag, _)| tag).collect(),
            )),
        }
    }
}
