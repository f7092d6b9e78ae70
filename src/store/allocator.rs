//! # Sequence Allocator
//!
//! Assigns the next `s_no` to a new record.
//!
//! One transaction in one session, each step its own statement:
//!
//! ```text
//! BEGIN                       opens the session
//! LOCK TABLE ... EXCLUSIVE    held until COMMIT
//! INSERT ... MAX(s_no) + 1    bind parameters allowed here
//! SELECT MAX(s_no)            read and decoded before COMMIT
//! COMMIT
//! ```
//!
//! The lock spans the read, so no concurrent insert can land between the
//! insert and the confirmation. Any failure after BEGIN rolls the
//! transaction back: a create either commits with a confirmed `s_no` or
//! leaves nothing behind.

use thiserror::Error;
use tracing::{info, warn};

use super::fields::FieldSet;
use super::sql::TableLayout;
use crate::credentials::ConnectionContext;
use crate::dataapi::{
    scalar_i64, DataApiError, ExecutionError, ExecutionResult, SessionId, Statement,
    StatementExecutor, StatementHandle,
};
use crate::observability::Event;

/// Idle lifetime of the allocation session between its statements.
pub const DEFAULT_SESSION_KEEP_ALIVE_SECS: u32 = 60;

#[derive(Debug, Clone, Error)]
pub enum AllocationError {
    /// Nothing was committed.
    #[error("Insert query failed: {0}")]
    InsertFailed(#[source] ExecutionError),

    /// The insert ran but its `s_no` could not be read back; the
    /// transaction was rolled back.
    #[error("inserted s_no could not be confirmed, insert rolled back: {0}")]
    ConfirmationFailed(#[source] ExecutionError),
}

pub struct SequenceAllocator<'a> {
    executor: &'a StatementExecutor,
    layout: &'a TableLayout,
    keep_alive_seconds: u32,
}

impl<'a> SequenceAllocator<'a> {
    pub fn new(executor: &'a StatementExecutor, layout: &'a TableLayout) -> Self {
        Self {
            executor,
            layout,
            keep_alive_seconds: DEFAULT_SESSION_KEEP_ALIVE_SECS,
        }
    }

    pub fn with_keep_alive(mut self, seconds: u32) -> Self {
        self.keep_alive_seconds = seconds;
        self
    }

    /// Inserts `fields` under a fresh sequence number and returns it.
    pub async fn insert(
        &self,
        conn: &ConnectionContext,
        fields: &FieldSet,
    ) -> Result<i64, AllocationError> {
        let session = self
            .begin(conn)
            .await
            .map_err(|(session, e)| (session, AllocationError::InsertFailed(e)));
        let session = match session {
            Ok(session) => session,
            Err((session, err)) => return Err(self.abandon(conn, session, err).await),
        };

        let result = self.locked_insert(conn, &session, fields).await;
        let s_no = match result {
            Ok(s_no) => s_no,
            Err(err) => return Err(self.abandon(conn, Some(session), err).await),
        };

        if let Err(e) = self.in_session(conn, &session, Statement::single("COMMIT")).await {
            return Err(self
                .abandon(conn, Some(session), AllocationError::InsertFailed(e))
                .await);
        }

        info!(
            event = Event::SequenceAllocated.as_str(),
            session_id = %session,
            s_no,
            "sequence number allocated"
        );
        Ok(s_no)
    }

    /// Opens the session with `BEGIN`. The session id is known from the
    /// moment of submission, so it is returned even when waiting fails.
    async fn begin(
        &self,
        conn: &ConnectionContext,
    ) -> Result<SessionId, (Option<SessionId>, ExecutionError)> {
        let statement = Statement::single("BEGIN").open_session(self.keep_alive_seconds);
        let mut handle = self
            .executor
            .execute(conn, &statement)
            .await
            .map_err(|e| (None, e))?;
        let session = handle.session_id().cloned();

        self.executor
            .await_completion(conn, &mut handle, self.executor.policy())
            .await
            .map_err(|e| (session.clone(), e))?;

        session.ok_or_else(|| {
            (
                None,
                ExecutionError::Api(DataApiError::InvalidResponse(format!(
                    "BEGIN (statement {}) did not open a session",
                    handle.id()
                ))),
            )
        })
    }

    async fn locked_insert(
        &self,
        conn: &ConnectionContext,
        session: &SessionId,
        fields: &FieldSet,
    ) -> Result<i64, AllocationError> {
        self.in_session(conn, session, self.layout.lock_exclusive())
            .await
            .map_err(AllocationError::InsertFailed)?;
        self.in_session(conn, session, self.layout.insert_next_key(fields))
            .await
            .map_err(AllocationError::InsertFailed)?;

        let max = self
            .in_session(conn, session, self.layout.select_max_key())
            .await
            .map_err(AllocationError::ConfirmationFailed)?;
        let records = self
            .executor
            .fetch_records(conn, max.id())
            .await
            .map_err(AllocationError::ConfirmationFailed)?;

        scalar_i64(&records).map_err(|source| {
            AllocationError::ConfirmationFailed(ExecutionError::Decode {
                statement_id: max.id().clone(),
                source,
            })
        })
    }

    async fn in_session(
        &self,
        conn: &ConnectionContext,
        session: &SessionId,
        statement: Statement,
    ) -> ExecutionResult<StatementHandle> {
        self.executor
            .run(conn, &statement.in_session(session.clone()))
            .await
    }

    /// Logs the failure and rolls back whatever the session holds.
    async fn abandon(
        &self,
        conn: &ConnectionContext,
        session: Option<SessionId>,
        err: AllocationError,
    ) -> AllocationError {
        warn!(
            event = Event::AllocationFailed.as_str(),
            table = %self.layout.qualified_name(),
            error = %err,
            "allocation failed"
        );

        let Some(session) = session else {
            return err;
        };
        match self
            .in_session(conn, &session, Statement::single("ROLLBACK"))
            .await
        {
            Ok(_) => info!(
                event = Event::TransactionRolledBack.as_str(),
                session_id = %session,
                "allocation rolled back"
            ),
            // The service ends the transaction when the session expires.
            Err(e) => warn!(
                event = Event::TransactionRolledBack.as_str(),
                session_id = %session,
                error = %e,
                "rollback failed"
            ),
        }
        err
    }
}
