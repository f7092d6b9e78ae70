//! # Statement Service Access
//!
//! Submitting SQL to the remote statement service, following a statement
//! to a terminal state, and turning its paged, typed results into records.
//!
//! The service is asynchronous: a submission returns an id at once and the
//! statement runs in the background. [`StatementExecutor`] owns the
//! submit/poll loop; [`ResultCursor`] owns pagination.

pub mod client;
pub mod errors;
pub mod executor;
pub mod memory;
pub mod record;
pub mod result;
pub mod types;
pub mod value;

pub use client::{validate_submission, DataApiClient, RedshiftDataClient};
pub use errors::{DataApiError, DataApiResult, DecodeError, ExecutionError, ExecutionResult};
pub use executor::{PollPolicy, StatementExecutor, StatementHandle};
pub use memory::InMemoryDataApi;
pub use record::Record;
pub use result::{materialize, scalar, scalar_bool, scalar_i64, Materializer, ResultCursor};
pub use types::{
    ColumnMetadata, ExecuteStatementOutput, ResultPage, SessionId, SessionScope, SqlParameter,
    Statement, StatementDescription, StatementId, StatementStatus,
};
pub use value::{Field, UnsupportedJson, Value};
