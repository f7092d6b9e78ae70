//! # Statement Executor
//!
//! Submits SQL to the statement service and waits for it to reach a
//! terminal state.
//!
//! ## Lifecycle
//!
//! ```text
//! execute()  ->  SUBMITTED / PICKED / STARTED  ->  FINISHED | FAILED | ABORTED
//!                       ^ await_completion() polls here
//! ```
//!
//! A handle moves to a terminal state exactly once and is never updated
//! afterwards. FAILED and ABORTED are never retried; the caller decides.
//!
//! ## Waiting
//!
//! Polling uses `tokio::time`, so tests run it on a paused clock.
//! A bounded wait that runs out reports [`ExecutionError::Timeout`] and
//! leaves the remote statement running.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::client::DataApiClient;
use super::errors::{ExecutionError, ExecutionResult};
use super::record::Record;
use super::result::ResultCursor;
use super::types::{
    ExecuteStatementOutput, SessionId, Statement, StatementDescription, StatementId,
    StatementStatus,
};
use crate::credentials::ConnectionContext;
use crate::observability::Event;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How to wait for a statement to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between status checks
    pub interval: Duration,
    /// Give up after this long; `None` waits until terminal
    pub max_wait: Option<Duration>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_wait: None,
        }
    }

    pub fn bounded(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval,
            max_wait: Some(max_wait),
        }
    }

    /// `max_wait_ms == 0` means unbounded.
    pub fn from_millis(interval_ms: u64, max_wait_ms: u64) -> Self {
        let max_wait = (max_wait_ms > 0).then(|| Duration::from_millis(max_wait_ms));
        Self {
            interval: Duration::from_millis(interval_ms),
            max_wait,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::unbounded(DEFAULT_POLL_INTERVAL)
    }
}

/// One submitted statement and the last status seen for it
#[derive(Debug, Clone)]
pub struct StatementHandle {
    id: StatementId,
    session_id: Option<SessionId>,
    status: StatementStatus,
    error: Option<String>,
    has_result_set: bool,
}

impl StatementHandle {
    fn submitted(output: ExecuteStatementOutput) -> Self {
        Self {
            id: output.id,
            session_id: output.session_id,
            status: StatementStatus::Submitted,
            error: None,
            has_result_set: false,
        }
    }

    pub fn id(&self) -> &StatementId {
        &self.id
    }

    /// Session the statement opened or ran in
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn status(&self) -> StatementStatus {
        self.status
    }

    /// Error detail reported with FAILED or ABORTED
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_result_set(&self) -> bool {
        self.has_result_set
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a status report. Returns whether the status changed; a
    /// terminal handle ignores every later report.
    pub fn observe(&mut self, description: &StatementDescription) -> bool {
        if self.is_terminal() || description.status == self.status {
            return false;
        }
        self.status = description.status;
        self.error = description.error.clone();
        self.has_result_set = description.has_result_set;
        true
    }

    /// `Some` once terminal: success, or the classified failure.
    pub fn outcome(&self) -> Option<ExecutionResult<()>> {
        let detail = || {
            self.error
                .clone()
                .unwrap_or_else(|| "Unknown error".to_string())
        };
        match self.status {
            StatementStatus::Finished => Some(Ok(())),
            StatementStatus::Failed => Some(Err(ExecutionError::Failed {
                statement_id: self.id.clone(),
                detail: detail(),
            })),
            StatementStatus::Aborted => Some(Err(ExecutionError::Aborted {
                statement_id: self.id.clone(),
                detail: detail(),
            })),
            _ => None,
        }
    }
}

/// Runs statements against a [`DataApiClient`]
#[derive(Clone)]
pub struct StatementExecutor {
    client: Arc<dyn DataApiClient>,
    policy: PollPolicy,
}

impl StatementExecutor {
    pub fn new(client: Arc<dyn DataApiClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn client(&self) -> &dyn DataApiClient {
        self.client.as_ref()
    }

    /// Submits without waiting.
    pub async fn execute(
        &self,
        conn: &ConnectionContext,
        statement: &Statement,
    ) -> ExecutionResult<StatementHandle> {
        let output = self.client.execute_statement(conn, statement).await?;

        info!(
            event = Event::StatementSubmitted.as_str(),
            statement_id = %output.id,
            session_id = output.session_id.as_ref().map(SessionId::as_str),
            batch = statement.is_batch(),
            sql = %statement.display_sql(),
            "statement submitted"
        );

        Ok(StatementHandle::submitted(output))
    }

    /// Polls until the handle is terminal or the policy's deadline passes.
    pub async fn await_completion(
        &self,
        conn: &ConnectionContext,
        handle: &mut StatementHandle,
        policy: &PollPolicy,
    ) -> ExecutionResult<()> {
        if let Some(outcome) = handle.outcome() {
            return outcome;
        }

        let started = Instant::now();
        let deadline = policy.max_wait.map(|max_wait| started + max_wait);

        loop {
            let description = self.client.describe_statement(conn, handle.id()).await?;
            if handle.observe(&description) {
                debug!(
                    event = Event::StatementPolled.as_str(),
                    statement_id = %handle.id(),
                    status = %handle.status(),
                    "statement status changed"
                );
            }

            if let Some(outcome) = handle.outcome() {
                log_outcome(handle, &outcome, started.elapsed());
                return outcome;
            }

            let mut delay = policy.interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    let waited = now - started;
                    warn!(
                        event = Event::StatementTimeout.as_str(),
                        statement_id = %handle.id(),
                        status = %handle.status(),
                        waited_ms = waited.as_millis() as u64,
                        "gave up waiting for statement"
                    );
                    return Err(ExecutionError::Timeout {
                        statement_id: handle.id().clone(),
                        waited,
                    });
                }
                delay = delay.min(deadline - now);
            }

            sleep(delay).await;
        }
    }

    /// Submits and waits with the executor's policy.
    pub async fn run(
        &self,
        conn: &ConnectionContext,
        statement: &Statement,
    ) -> ExecutionResult<StatementHandle> {
        let mut handle = self.execute(conn, statement).await?;
        self.await_completion(conn, &mut handle, &self.policy).await?;
        Ok(handle)
    }

    /// Runs a statement and materializes its rows. A statement without a
    /// result set yields no rows.
    pub async fn query(
        &self,
        conn: &ConnectionContext,
        statement: &Statement,
    ) -> ExecutionResult<Vec<Record>> {
        let handle = self.run(conn, statement).await?;
        if !handle.has_result_set() {
            return Ok(Vec::new());
        }
        self.fetch_records(conn, handle.id()).await
    }

    /// Paged reader over a finished statement's results.
    pub fn results<'a>(
        &'a self,
        conn: &'a ConnectionContext,
        statement_id: StatementId,
    ) -> ResultCursor<'a> {
        ResultCursor::new(self.client.as_ref(), conn, statement_id)
    }

    /// Drains every page of a finished statement (or sub-statement).
    pub async fn fetch_records(
        &self,
        conn: &ConnectionContext,
        statement_id: &StatementId,
    ) -> ExecutionResult<Vec<Record>> {
        self.results(conn, statement_id.clone())
            .collect_records()
            .await
    }
}

fn log_outcome(handle: &StatementHandle, outcome: &ExecutionResult<()>, elapsed: Duration) {
    let elapsed_ms = elapsed.as_millis() as u64;
    match outcome {
        Ok(()) => info!(
            event = Event::StatementFinished.as_str(),
            statement_id = %handle.id(),
            has_result_set = handle.has_result_set(),
            elapsed_ms,
            "statement finished"
        ),
        Err(e) => {
            let event = if handle.status() == StatementStatus::Aborted {
                Event::StatementAborted
            } else {
                Event::StatementFailed
            };
            warn!(
                event = event.as_str(),
                statement_id = %handle.id(),
                elapsed_ms,
                error = %e,
                "statement did not finish"
            );
        }
    }
}
