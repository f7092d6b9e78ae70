//! Observable events
//!
//! Every log line carries one of these as its `event` field, so log
//! consumers can filter on a closed set of names.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Configuration loaded and validated
    ConfigLoaded,
    /// HTTP server bound and serving
    Serving,
    /// Gateway event received by `invoke`
    InvokeReceived,

    // Connection
    /// Credentials and connection secret resolved
    ConnectionResolved,

    // Statement protocol
    /// Statement accepted by the service
    StatementSubmitted,
    /// Non-terminal status observed while polling
    StatementPolled,
    /// Statement reached FINISHED
    StatementFinished,
    /// Statement reached FAILED
    StatementFailed,
    /// Statement reached ABORTED
    StatementAborted,
    /// Local wait abandoned at the deadline
    StatementTimeout,
    /// One result page read
    ResultPageFetched,
    /// NaN or infinity rendered as JSON null
    NonFiniteDouble,

    // Sequence allocation
    SequenceAllocated,
    AllocationFailed,
    /// Allocation transaction rolled back (or the attempt failed)
    TransactionRolledBack,

    // Orchestration outcomes
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    RecordNotFound,
    RecordsListed,
    RecordConflict,
    /// Request rejected before any statement ran
    RequestRejected,
    /// Request failed after reaching the service
    RequestFailed,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::Serving => "TOOLSTORE_SERVING",
            Event::InvokeReceived => "INVOKE_RECEIVED",

            Event::ConnectionResolved => "CONNECTION_RESOLVED",

            Event::StatementSubmitted => "STATEMENT_SUBMITTED",
            Event::StatementPolled => "STATEMENT_POLLED",
            Event::StatementFinished => "STATEMENT_FINISHED",
            Event::StatementFailed => "STATEMENT_FAILED",
            Event::StatementAborted => "STATEMENT_ABORTED",
            Event::StatementTimeout => "STATEMENT_TIMEOUT",
            Event::ResultPageFetched => "RESULT_PAGE_FETCHED",
            Event::NonFiniteDouble => "NON_FINITE_DOUBLE",

            Event::SequenceAllocated => "SEQUENCE_ALLOCATED",
            Event::AllocationFailed => "ALLOCATION_FAILED",
            Event::TransactionRolledBack => "TRANSACTION_ROLLED_BACK",

            Event::RecordCreated => "RECORD_CREATED",
            Event::RecordUpdated => "RECORD_UPDATED",
            Event::RecordDeleted => "RECORD_DELETED",
            Event::RecordNotFound => "RECORD_NOT_FOUND",
            Event::RecordsListed => "RECORDS_LISTED",
            Event::RecordConflict => "RECORD_CONFLICT",
            Event::RequestRejected => "REQUEST_REJECTED",
            Event::RequestFailed => "REQUEST_FAILED",
        }
    }

    /// Terminal statement outcomes other than success
    pub fn is_statement_failure(&self) -> bool {
        matches!(
            self,
            Event::StatementFailed | Event::StatementAborted | Event::StatementTimeout
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
