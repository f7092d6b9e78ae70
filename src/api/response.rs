//! Tool responses
//!
//! One status code plus a JSON body, rendered either as an axum response
//! or as a gateway proxy envelope with the body serialized to a string.

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;

use crate::dataapi::Record;
use crate::store::{Listing, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: serde_json::Value,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: serde_json::Value) -> Self {
        Self { status, body }
    }

    pub fn record(record: Record) -> Self {
        Self::new(StatusCode::OK, record.into_json())
    }

    pub fn listing(listing: &Listing) -> Self {
        let body = serde_json::to_value(listing).unwrap_or_else(|e| {
            json!({ "error": format!("failed to serialize records: {}", e) })
        });
        Self::new(StatusCode::OK, body)
    }

    pub fn created(s_no: i64, data: serde_json::Value) -> Self {
        Self::new(
            StatusCode::CREATED,
            json!({
                "message": "Tool successfully created",
                "s_no": s_no,
                "data": data,
            }),
        )
    }

    pub fn updated(s_no: i64, data: serde_json::Value) -> Self {
        Self::new(
            StatusCode::OK,
            json!({
                "message": format!("Record with s_no \"{}\" successfully updated", s_no),
                "updated_data": data,
            }),
        )
    }

    pub fn deleted(s_no: i64) -> Self {
        Self::new(
            StatusCode::OK,
            json!({
                "message": format!("Record with s_no \"{}\" successfully marked as deleted", s_no),
            }),
        )
    }

    pub fn not_found_route(path: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            json!({ "error": format!("No operation at {}", path), "code": "NOT_FOUND" }),
        )
    }

    pub fn from_error(err: &StoreError) -> Self {
        let body = serde_json::to_value(err.body())
            .unwrap_or_else(|_| json!({ "error": err.to_string(), "code": err.code() }));
        Self::new(err.status_code(), body)
    }

    pub fn into_gateway(self) -> GatewayResponse {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        GatewayResponse {
            status_code: self.status.as_u16(),
            headers,
            body: self.body.to_string(),
        }
    }
}

impl From<StoreError> for ApiResponse {
    fn from(err: StoreError) -> Self {
        Self::from_error(&err)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Proxy-integration response envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}
