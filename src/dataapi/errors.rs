//! # Statement Service Errors
//!
//! Three layers: transport failures talking to the service, decode
//! failures on what it returned, and execution outcomes of a statement.

use std::time::Duration;

use thiserror::Error;

use super::types::StatementId;

/// Result type for raw service calls
pub type DataApiResult<T> = Result<T, DataApiError>;

/// Result type for statement execution
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Failure talking to the statement service itself
#[derive(Debug, Clone, Error)]
pub enum DataApiError {
    /// Request never produced a response
    #[error("request to statement service failed: {0}")]
    Transport(String),

    /// Service answered with a non-success status
    #[error("statement service returned HTTP {status}: {message}")]
    Service { status: u16, message: String },

    /// Response body did not match the protocol
    #[error("statement service response could not be parsed: {0}")]
    InvalidResponse(String),

    /// Request the service would refuse; it is never sent
    #[error("invalid statement request: {0}")]
    InvalidRequest(String),

    /// Statement id the service does not know
    #[error("statement {0} is not known to the statement service")]
    UnknownStatement(StatementId),
}

/// Malformed result content
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("unrecognized value tag '{0}'")]
    UnrecognizedTag(String),

    #[error("value carries no tag")]
    EmptyField,

    #[error("value carries more than one tag: {}", .0.join(", "))]
    AmbiguousField(Vec<&'static str>),

    #[error("first result page is missing column metadata")]
    MissingColumnMetadata,

    #[error("row {row} has {found} values but {expected} columns were declared")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("expected {expected} in column '{column}', found {found}")]
    UnexpectedType {
        column: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("expected at least one row, the result was empty")]
    EmptyResult,
}

/// Outcome of a statement that did not finish successfully
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Api(#[from] DataApiError),

    #[error("statement {statement_id} failed: {detail}")]
    Failed {
        statement_id: StatementId,
        detail: String,
    },

    #[error("statement {statement_id} was aborted: {detail}")]
    Aborted {
        statement_id: StatementId,
        detail: String,
    },

    /// Local wait abandoned; the remote statement keeps running.
    #[error("gave up waiting for statement {statement_id} after {waited:?}")]
    Timeout {
        statement_id: StatementId,
        waited: Duration,
    },

    #[error("undecodable result for statement {statement_id}: {source}")]
    Decode {
        statement_id: StatementId,
        #[source]
        source: DecodeError,
    },
}

impl ExecutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, ExecutionError::Decode { .. })
    }

    /// Statement this error belongs to, when one was assigned.
    pub fn statement_id(&self) -> Option<&StatementId> {
        match self {
            ExecutionError::Api(_) => None,
            ExecutionError::Failed { statement_id, .. }
            | ExecutionError::Aborted { statement_id, .. }
            | ExecutionError::Timeout { statement_id, .. }
            | ExecutionError::Decode { statement_id, .. } => Some(statement_id),
        }
    }
}
