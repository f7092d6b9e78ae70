//! Request field sets
//!
//! Column names arrive from request bodies, so every name is checked
//! against the identifier grammar before it reaches SQL text.

use std::sync::OnceLock;

use regex::Regex;

use super::errors::{StoreError, StoreResult};
use crate::dataapi::Value;

static IDENTIFIER: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

/// Whether `name` may be used as a (quoted) SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let pattern = IDENTIFIER.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"));
    name.len() <= 127 && matches!(pattern, Ok(re) if re.is_match(name))
}

/// Ordered column assignments taken from a JSON object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<(String, Value)>,
}

impl FieldSet {
    /// Validates names and values. Nested objects and arrays are rejected.
    pub fn from_json(object: &serde_json::Map<String, serde_json::Value>) -> StoreResult<Self> {
        let mut fields = Vec::with_capacity(object.len());
        for (name, json) in object {
            if !is_valid_identifier(name) {
                return Err(StoreError::input(format!(
                    "Invalid field name: '{}'",
                    name
                )));
            }
            let value = Value::from_json(json).map_err(|e| {
                StoreError::input(format!("Invalid value for field '{}': {}", name, e))
            })?;
            fields.push((name.clone(), value));
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Drops a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(field, _)| field == name)?;
        Some(self.fields.remove(index).1)
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.fields.push((name.into(), value));
    }

    /// Rewrites string values equal to any marker as null.
    pub fn apply_null_markers(&mut self, markers: &[String]) {
        if markers.is_empty() {
            return;
        }
        for (_, value) in &mut self.fields {
            if let Value::String(s) = value {
                if markers.iter().any(|marker| marker == s) {
                    *value = Value::Null;
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Parses a primary key given as a JSON integer or an integer string.
pub fn parse_key(json: &serde_json::Value) -> StoreResult<i64> {
    match json {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| StoreError::input(format!("s_no must be an integer, got {}", n))),
        serde_json::Value::String(s) => parse_key_str(s),
        other => Err(StoreError::input(format!(
            "s_no must be an integer, got {}",
            other
        ))),
    }
}

pub fn parse_key_str(text: &str) -> StoreResult<i64> {
    text.trim()
        .parse::<i64>()
        .map_err(|_| StoreError::input(format!("s_no must be an integer, got '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_identifier_grammar() {
        assert!(is_valid_identifier("tool_name"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("tool name"));
        assert!(!is_valid_identifier("name\"; DROP TABLE tools; --"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_from_json_collects_fields() {
        let fields = FieldSet::from_json(&object(json!({"tool_name": "saw", "login": "alice"})))
            .unwrap();
        let names: Vec<&str> = fields.iter().map(|(name, _)| name).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"tool_name"));
        assert_eq!(fields.get("login"), Some(&Value::from("alice")));
    }

    #[test]
    fn test_rejects_bad_names_and_nested_values() {
        let err = FieldSet::from_json(&object(json!({"bad-name": 1}))).unwrap_err();
        assert!(matches!(err, StoreError::Input(_)));

        let err = FieldSet::from_json(&object(json!({"tags": ["a", "b"]}))).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_null_markers() {
        let mut fields =
            FieldSet::from_json(&object(json!({"a": "NA", "b": "", "c": "kept", "d": 3})))
                .unwrap();
        fields.apply_null_markers(&["NA".to_string(), "".to_string()]);
        assert_eq!(fields.get("a"), Some(&Value::Null));
        assert_eq!(fields.get("b"), Some(&Value::Null));
        assert_eq!(fields.get("c"), Some(&Value::from("kept")));
        assert_eq!(fields.get("d"), Some(&Value::Long(3)));
    }

    #[test]
    fn test_remove() {
        let mut fields = FieldSet::from_json(&object(json!({"s_no": 4, "a": 1}))).unwrap();
        assert_eq!(fields.remove("s_no"), Some(Value::Long(4)));
        assert_eq!(fields.remove("s_no"), None);
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key(&json!(12)).unwrap(), 12);
        assert_eq!(parse_key(&json!("12")).unwrap(), 12);
        assert!(parse_key(&json!("twelve")).is_err());
        assert!(parse_key(&json!(1.5)).is_err());
        assert!(parse_key(&json!(null)).is_err());
    }
}
