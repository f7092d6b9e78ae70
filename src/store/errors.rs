//! # Store Errors
//!
//! Outcome classification for tool operations. Every failure below the
//! orchestrator ends up here and is rendered as `{error, code}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use super::allocator::AllocationError;
use crate::credentials::CredentialError;
use crate::dataapi::ExecutionError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// Missing or malformed request input
    #[error("{0}")]
    Input(String),

    /// Identifier absent, checked before update and delete
    #[error("Record with s_no \"{0}\" does not exist in database")]
    NotFound(i64),

    /// No live record under the identifier
    #[error("No record found with s_no: {0}")]
    NoLiveRecord(i64),

    /// Value of the unique column already taken
    #[error("{column} \"{value}\" already exists in database")]
    Conflict { column: String, value: String },

    // ==================
    // Create
    // ==================
    #[error("Failed to create tool: {0}")]
    Allocation(#[from] AllocationError),

    // ==================
    // Server Errors (5xx)
    // ==================
    /// Statement FAILED or ABORTED, or the service was unreachable
    #[error("Query failed: {0}")]
    Execution(ExecutionError),

    /// Local wait abandoned; the statement may still complete remotely
    #[error("Timed out: {0}")]
    Timeout(ExecutionError),

    #[error("Malformed result: {0}")]
    Decode(ExecutionError),

    #[error("Connection unavailable: {0}")]
    Connection(#[from] CredentialError),
}

impl From<ExecutionError> for StoreError {
    fn from(err: ExecutionError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(err)
        } else if err.is_decode() {
            StoreError::Decode(err)
        } else {
            StoreError::Execution(err)
        }
    }
}

impl StoreError {
    pub fn input(msg: impl Into<String>) -> Self {
        StoreError::Input(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            StoreError::Input(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound(_) | StoreError::NoLiveRecord(_) => StatusCode::NOT_FOUND,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,

            StoreError::Allocation(AllocationError::InsertFailed(source)) if !source.is_timeout() => {
                StatusCode::BAD_REQUEST
            }
            StoreError::Allocation(_) => StatusCode::INTERNAL_SERVER_ERROR,

            StoreError::Execution(_)
            | StoreError::Timeout(_)
            | StoreError::Decode(_)
            | StoreError::Connection(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Input(_) => "INPUT_ERROR",
            StoreError::NotFound(_) | StoreError::NoLiveRecord(_) => "NOT_FOUND",
            StoreError::Conflict { .. } => "CONFLICT",
            StoreError::Allocation(AllocationError::InsertFailed(source)) if source.is_timeout() => {
                "TIMEOUT"
            }
            StoreError::Allocation(_) => "ALLOCATION_FAILED",
            StoreError::Execution(_) => "EXECUTION_ERROR",
            StoreError::Timeout(_) => "TIMEOUT",
            StoreError::Decode(_) => "DECODE_ERROR",
            StoreError::Connection(_) => "UPSTREAM_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
            exists: matches!(self, StoreError::Conflict { .. }).then_some(true),
        }
    }
}

/// Error response body
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataapi::{DecodeError, StatementId};
    use std::time::Duration;

    fn failed() -> ExecutionError {
        ExecutionError::Failed {
            statement_id: StatementId::new("s1"),
            detail: "permission denied".to_string(),
        }
    }

    fn timeout() -> ExecutionError {
        ExecutionError::Timeout {
            statement_id: StatementId::new("s1"),
            waited: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::input("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(StoreError::NotFound(4).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(StoreError::NoLiveRecord(4).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            StoreError::Conflict {
                column: "tool_name".to_string(),
                value: "saw".to_string()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            StoreError::from(failed()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_execution_errors_are_classified() {
        assert_eq!(StoreError::from(failed()).code(), "EXECUTION_ERROR");
        assert_eq!(StoreError::from(timeout()).code(), "TIMEOUT");

        let decode = ExecutionError::Decode {
            statement_id: StatementId::new("s1"),
            source: DecodeError::EmptyField,
        };
        assert_eq!(StoreError::from(decode).code(), "DECODE_ERROR");
    }

    #[test]
    fn test_allocation_status() {
        let insert = StoreError::from(AllocationError::InsertFailed(failed()));
        assert_eq!(insert.status_code(), StatusCode::BAD_REQUEST);
        assert!(insert.to_string().starts_with("Failed to create tool"));

        let insert_timeout = StoreError::from(AllocationError::InsertFailed(timeout()));
        assert_eq!(insert_timeout.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(insert_timeout.code(), "TIMEOUT");

        let confirm = StoreError::from(AllocationError::ConfirmationFailed(failed()));
        assert_eq!(confirm.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(confirm.code(), "ALLOCATION_FAILED");
    }

    #[test]
    fn test_conflict_body_flags_exists() {
        let body = StoreError::Conflict {
            column: "tool_name".to_string(),
            value: "saw".to_string(),
        }
        .body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["exists"], true);
        assert_eq!(json["code"], "CONFLICT");
        assert_eq!(json["error"], "tool_name \"saw\" already exists in database");

        let json = serde_json::to_value(StoreError::NotFound(9).body()).unwrap();
        assert!(json.get("exists").is_none());
    }
}
