//! Tool requests
//!
//! Gateway-style events (`rawPath`, `queryStringParameters`, `body`) and
//! their parsing into typed [`ToolRequest`]s.

use std::collections::HashMap;

use serde::Deserialize;

use crate::store::{parse_key, parse_key_str, FieldSet, StoreError, StoreResult, TableLayout};

/// Operation selected by the last path segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOperation {
    GetTools,
    CreateTool,
    UpdateTool,
    DeleteTool,
}

impl ToolOperation {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "getTools" => Some(ToolOperation::GetTools),
            "createTool" => Some(ToolOperation::CreateTool),
            "updateTool" => Some(ToolOperation::UpdateTool),
            "deleteTool" => Some(ToolOperation::DeleteTool),
            _ => None,
        }
    }

    pub fn segment(&self) -> &'static str {
        match self {
            ToolOperation::GetTools => "getTools",
            ToolOperation::CreateTool => "createTool",
            ToolOperation::UpdateTool => "updateTool",
            ToolOperation::DeleteTool => "deleteTool",
        }
    }

    /// Operation for `path` mounted under `prefix` (`""` or `"/"` = root).
    pub fn resolve(path: &str, prefix: &str) -> Option<Self> {
        let rest = path.strip_prefix(prefix.trim_end_matches('/'))?;
        let segment = rest.strip_prefix('/')?.trim_end_matches('/');
        Self::from_segment(segment)
    }
}

/// Inbound event, as delivered by an API gateway proxy integration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    #[serde(default, alias = "path")]
    pub raw_path: String,

    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,

    #[serde(default)]
    pub body: Option<String>,
}

/// A parsed tool operation with its inputs
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    Get {
        s_no: i64,
    },
    ListByOwner {
        owner: String,
    },
    ListAll,
    Create {
        fields: FieldSet,
        data: serde_json::Value,
    },
    Update {
        s_no: i64,
        fields: FieldSet,
        data: serde_json::Value,
    },
    Delete {
        s_no: i64,
    },
}

impl ToolRequest {
    /// Reads the inputs of `operation`.
    ///
    /// `getTools` looks at the query: the primary key first, then the
    /// secondary key, else everything. The other operations take a JSON
    /// object body.
    pub fn parse(
        operation: ToolOperation,
        query: Option<&HashMap<String, String>>,
        body: Option<&str>,
        layout: &TableLayout,
    ) -> StoreResult<Self> {
        match operation {
            ToolOperation::GetTools => {
                let param = |name: &str| query.and_then(|q| q.get(name));
                if let Some(key) = param(&layout.primary_key) {
                    Ok(ToolRequest::Get {
                        s_no: parse_key_str(key)?,
                    })
                } else if let Some(owner) = param(&layout.secondary_key) {
                    Ok(ToolRequest::ListByOwner {
                        owner: owner.clone(),
                    })
                } else {
                    Ok(ToolRequest::ListAll)
                }
            }
            ToolOperation::CreateTool => {
                let data = parse_body(body)?;
                let fields = fields_of(&data)?;
                Ok(ToolRequest::Create { fields, data })
            }
            ToolOperation::UpdateTool => {
                let data = parse_body(body)?;
                let s_no = required_key(&data, &layout.primary_key)?;
                let fields = fields_of(&data)?;
                Ok(ToolRequest::Update { s_no, fields, data })
            }
            ToolOperation::DeleteTool => {
                let data = parse_body(body)?;
                let s_no = required_key(&data, &layout.primary_key)?;
                Ok(ToolRequest::Delete { s_no })
            }
        }
    }
}

fn parse_body(body: Option<&str>) -> StoreResult<serde_json::Value> {
    let text = match body.map(str::trim) {
        Some(text) if !text.is_empty() => text,
        _ => return Err(StoreError::input("Request body is required")),
    };
    let data: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StoreError::input(format!("Invalid JSON body: {}", e)))?;
    if !data.is_object() {
        return Err(StoreError::input("Request body must be a JSON object"));
    }
    Ok(data)
}

fn fields_of(data: &serde_json::Value) -> StoreResult<FieldSet> {
    match data.as_object() {
        Some(object) => FieldSet::from_json(object),
        None => Err(StoreError::input("Request body must be a JSON object")),
    }
}

fn required_key(data: &serde_json::Value, primary_key: &str) -> StoreResult<i64> {
    match data.get(primary_key) {
        Some(value) if !value.is_null() => parse_key(value),
        _ => Err(StoreError::input(format!(
            "{} is required in the request",
            primary_key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataapi::Value;
    use serde_json::json;

    fn layout() -> TableLayout {
        TableLayout {
            schema: "tooling".to_string(),
            table: "tools".to_string(),
            primary_key: "s_no".to_string(),
            liveness_column: "is_display".to_string(),
            secondary_key: "login".to_string(),
        }
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_operation() {
        let prefix = "/csp-tooling-lambda1";
        assert_eq!(
            ToolOperation::resolve("/csp-tooling-lambda1/getTools", prefix),
            Some(ToolOperation::GetTools)
        );
        assert_eq!(
            ToolOperation::resolve("/csp-tooling-lambda1/deleteTool/", prefix),
            Some(ToolOperation::DeleteTool)
        );
        assert_eq!(ToolOperation::resolve("/other/getTools", prefix), None);
        assert_eq!(ToolOperation::resolve("/csp-tooling-lambda1/dropTool", prefix), None);
        assert_eq!(
            ToolOperation::resolve("/createTool", "/"),
            Some(ToolOperation::CreateTool)
        );
    }

    #[test]
    fn test_get_tools_precedence() {
        let q = query(&[("s_no", "4"), ("login", "alice")]);
        assert_eq!(
            ToolRequest::parse(ToolOperation::GetTools, Some(&q), None, &layout()).unwrap(),
            ToolRequest::Get { s_no: 4 }
        );

        let q = query(&[("login", "alice")]);
        assert_eq!(
            ToolRequest::parse(ToolOperation::GetTools, Some(&q), None, &layout()).unwrap(),
            ToolRequest::ListByOwner {
                owner: "alice".to_string()
            }
        );

        assert_eq!(
            ToolRequest::parse(ToolOperation::GetTools, None, None, &layout()).unwrap(),
            ToolRequest::ListAll
        );
    }

    #[test]
    fn test_non_integer_key_is_input_error() {
        let q = query(&[("s_no", "abc")]);
        let err = ToolRequest::parse(ToolOperation::GetTools, Some(&q), None, &layout())
            .unwrap_err();
        assert!(matches!(err, StoreError::Input(_)));
    }

    #[test]
    fn test_update_requires_key() {
        let err = ToolRequest::parse(
            ToolOperation::UpdateTool,
            None,
            Some(r#"{"tool_name": "saw"}"#),
            &layout(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "s_no is required in the request");
    }

    #[test]
    fn test_update_accepts_string_key() {
        let request = ToolRequest::parse(
            ToolOperation::UpdateTool,
            None,
            Some(r#"{"s_no": "7", "tool_name": "saw"}"#),
            &layout(),
        )
        .unwrap();
        match request {
            ToolRequest::Update { s_no, fields, data } => {
                assert_eq!(s_no, 7);
                assert_eq!(fields.get("tool_name"), Some(&Value::from("saw")));
                assert_eq!(data["tool_name"], json!("saw"));
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_bad_bodies() {
        for body in [None, Some(""), Some("not json"), Some("[1, 2]")] {
            let err = ToolRequest::parse(ToolOperation::CreateTool, None, body, &layout())
                .unwrap_err();
            assert!(matches!(err, StoreError::Input(_)), "{:?}", body);
        }
    }

    #[test]
    fn test_event_accepts_null_query() {
        let event: GatewayEvent = serde_json::from_str(
            r#"{"rawPath": "/csp-tooling-lambda1/getTools", "queryStringParameters": null}"#,
        )
        .unwrap();
        assert!(event.query_string_parameters.is_none());
        assert!(event.body.is_none());
    }
}
