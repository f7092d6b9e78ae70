//! In-memory statement service
//!
//! Runs the store's fixed statement shapes against in-process tables.
//! Used for tests and for `--in-memory` local development.
//!
//! Outside a session every submission executes atomically when it is
//! accepted (a batch is one transaction: all of it applies or none of it
//! does). A session keeps transaction state between submissions:
//!
//! - `BEGIN` opens a transaction, `COMMIT`/`END` keeps its writes,
//!   `ROLLBACK` restores every table it touched
//! - `LOCK TABLE` inside a transaction holds the table until it ends;
//!   statements from anywhere else that name the table wait, reporting
//!   STARTED, and run once the lock is released
//! - a failed statement aborts the transaction; later statements fail
//!   and `COMMIT` rolls back
//! - a session idle past its keep-alive is dropped and its transaction
//!   rolled back
//!
//! Like the real service, a batch cannot carry bind parameters.
//!
//! Status reporting is separate from execution: a statement can be made
//! to report SUBMITTED and STARTED for a number of polls before its
//! terminal state shows up.
//!
//! Memory stays bounded: a result is dropped once its last page is read,
//! and only the most recent statements are remembered.
//!
//! Tables are created on first reference and grow a column the first time
//! one is assigned; rows lacking a column read it as NULL.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::time::Instant;
use uuid::Uuid;

use super::client::{validate_submission, DataApiClient};
use super::errors::{DataApiError, DataApiResult};
use super::record::Record;
use super::types::{
    ColumnMetadata, ExecuteStatementOutput, ResultPage, SessionId, SessionScope, Statement,
    StatementDescription, StatementId, StatementStatus,
};
use super::value::{Field, Value};
use crate::credentials::{ConnectionContext, ConnectionSecret, Credentials};

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_STATEMENT_RETENTION: usize = 1024;

const ABORTED_TRANSACTION: &str =
    "ERROR: current transaction is aborted, commands ignored until end of transaction block";

static NULL: Value = Value::Null;

type TableKey = (String, String);

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Index of `column`, adding it (NULL in existing rows) if new.
    fn ensure_column(&mut self, column: &str) -> usize {
        if let Some(index) = self.position(column) {
            return index;
        }
        self.columns.push(column.to_string());
        for row in &mut self.rows {
            row.push(Value::Null);
        }
        self.columns.len() - 1
    }

    fn value<'a>(&self, row: &'a [Value], column: &str) -> &'a Value {
        self.position(column)
            .and_then(|index| row.get(index))
            .unwrap_or(&NULL)
    }

    fn matches(&self, row: &[Value], conditions: &[(String, Value)]) -> bool {
        conditions
            .iter()
            .all(|(column, expected)| values_equal(self.value(row, column), expected))
    }

    fn insert(&mut self, assignments: Vec<(String, Value)>) {
        let indexed: Vec<(usize, Value)> = assignments
            .into_iter()
            .map(|(column, value)| (self.ensure_column(&column), value))
            .collect();
        let mut row = vec![Value::Null; self.columns.len()];
        for (index, value) in indexed {
            row[index] = value;
        }
        self.rows.push(row);
    }

    fn column_metadata(&self) -> Vec<ColumnMetadata> {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let sample = self
                    .rows
                    .iter()
                    .map(|row| &row[index])
                    .find(|value| !value.is_null());
                ColumnMetadata::new(name.as_str(), Some(sample.map_or("varchar", engine_type)))
            })
            .collect()
    }

    fn to_record(&self, row: &[Value]) -> Record {
        self.columns
            .iter()
            .zip(row)
            .map(|(column, value)| (column.as_str(), value.clone()))
            .collect()
    }
}

fn engine_type(value: &Value) -> &'static str {
    match value {
        Value::Long(_) => "int8",
        Value::Double(_) => "float8",
        Value::Boolean(_) => "bool",
        Value::String(_) | Value::Null => "varchar",
    }
}

/// SQL equality: NULL equals nothing; integers and floats compare numerically.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Long(a), Value::Long(b)) => a == b,
        (Value::Double(a), Value::Double(b)) => a == b,
        (Value::Long(a), Value::Double(b)) | (Value::Double(b), Value::Long(a)) => {
            (*a as f64) == *b
        }
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Boolean(a), Value::Boolean(b)) => a == b,
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct QueryResult {
    columns: Vec<ColumnMetadata>,
    rows: Vec<Vec<Value>>,
    corrupt: bool,
}

#[derive(Debug, Clone)]
enum Outcome {
    Finished { has_result_set: bool, rows: i64 },
    Failed(String),
    Aborted(String),
}

impl Outcome {
    fn done() -> Self {
        Outcome::Finished {
            has_result_set: false,
            rows: 0,
        }
    }
}

#[derive(Debug)]
enum Progress {
    /// Blocked on a table another session holds.
    Waiting(Statement),
    Done(Outcome),
}

#[derive(Debug)]
struct StoredStatement {
    progress: Progress,
    session: Option<SessionId>,
    describes: u32,
    result_keys: Vec<StatementId>,
}

#[derive(Debug, Default)]
struct Transaction {
    /// Tables as they were before the transaction first touched them
    /// (`None`: the table did not exist).
    undo: HashMap<TableKey, Option<Table>>,
    aborted: bool,
}

#[derive(Debug)]
struct Session {
    keep_alive: Duration,
    last_used: Instant,
    transaction: Option<Transaction>,
    waiting_on: Option<StatementId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Begin,
    Commit,
    Rollback,
}

impl Control {
    fn parse(sql: &str) -> Option<Self> {
        let sql = sql.trim().trim_end_matches(';').trim().to_ascii_uppercase();
        match sql.as_str() {
            "BEGIN" | "BEGIN TRANSACTION" | "START TRANSACTION" => Some(Control::Begin),
            "COMMIT" | "COMMIT TRANSACTION" | "END" | "END TRANSACTION" => Some(Control::Commit),
            "ROLLBACK" | "ROLLBACK TRANSACTION" | "ABORT" => Some(Control::Rollback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Fault {
    Fail(String),
    Abort(String),
    CorruptResult,
}

#[derive(Debug, Clone)]
struct FaultRule {
    needle: String,
    fault: Fault,
}

#[derive(Debug)]
struct EngineState {
    tables: HashMap<TableKey, Table>,
    statements: HashMap<StatementId, StoredStatement>,
    /// Statement ids oldest first, for eviction.
    retained: VecDeque<StatementId>,
    retention: usize,
    results: HashMap<StatementId, QueryResult>,
    submitted: VecDeque<Statement>,
    sessions: HashMap<SessionId, Session>,
    locks: HashMap<TableKey, SessionId>,
    /// Blocked statements in submission order.
    waiting: VecDeque<StatementId>,
    faults: Vec<FaultRule>,
    polls_until_finished: u32,
    page_size: usize,
    unavailable: Option<String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            statements: HashMap::new(),
            retained: VecDeque::new(),
            retention: DEFAULT_STATEMENT_RETENTION,
            results: HashMap::new(),
            submitted: VecDeque::new(),
            sessions: HashMap::new(),
            locks: HashMap::new(),
            waiting: VecDeque::new(),
            faults: Vec::new(),
            polls_until_finished: 0,
            page_size: DEFAULT_PAGE_SIZE,
            unavailable: None,
        }
    }
}

impl EngineState {
    fn injected_failure(&self, statement: &Statement) -> Option<Outcome> {
        self.faults.iter().find_map(|rule| {
            let hit = statement.sqls().iter().any(|sql| sql.contains(&rule.needle));
            match (&rule.fault, hit) {
                (Fault::Fail(error), true) => Some(Outcome::Failed(error.clone())),
                (Fault::Abort(error), true) => Some(Outcome::Aborted(error.clone())),
                _ => None,
            }
        })
    }

    fn corrupts(&self, sql: &str) -> bool {
        self.faults
            .iter()
            .any(|rule| matches!(rule.fault, Fault::CorruptResult) && sql.contains(&rule.needle))
    }

    fn open_session(&mut self, keep_alive_seconds: u32) -> SessionId {
        let id = SessionId::new(Uuid::new_v4().to_string());
        self.sessions.insert(
            id.clone(),
            Session {
                keep_alive: Duration::from_secs(u64::from(keep_alive_seconds)),
                last_used: Instant::now(),
                transaction: None,
                waiting_on: None,
            },
        );
        id
    }

    fn join_session(&self, session: &SessionId) -> DataApiResult<()> {
        match self.sessions.get(session) {
            None => Err(validation_error(&format!(
                "Session {} is not available",
                session
            ))),
            Some(active) if active.waiting_on.is_some() => Err(validation_error(&format!(
                "Session {} is busy running another statement",
                session
            ))),
            Some(_) => Ok(()),
        }
    }

    fn touch(&mut self, session: Option<&SessionId>) {
        if let Some(active) = session.and_then(|id| self.sessions.get_mut(id)) {
            active.last_used = Instant::now();
        }
    }

    /// Drops sessions idle past their keep-alive, rolling back what they held.
    fn expire_idle_sessions(&mut self) {
        let now = Instant::now();
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                s.waiting_on.is_none() && now.duration_since(s.last_used) > s.keep_alive
            })
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        for id in expired {
            if let Some(session) = self.sessions.remove(&id) {
                if let Some(transaction) = session.transaction {
                    self.restore(transaction.undo);
                }
                self.locks.retain(|_, holder| *holder != id);
            }
        }
        self.wake();
    }

    fn restore(&mut self, undo: HashMap<TableKey, Option<Table>>) {
        for (key, table) in undo {
            match table {
                Some(table) => {
                    self.tables.insert(key, table);
                }
                None => {
                    self.tables.remove(&key);
                }
            }
        }
    }

    /// True when a table `statement` names is locked by another session.
    fn blocked(&self, statement: &Statement, session: Option<&SessionId>) -> bool {
        if self.locks.is_empty() {
            return false;
        }
        let Ok(grammar) = grammar() else {
            return false;
        };
        referenced_tables(grammar, statement)
            .iter()
            .any(|key| match self.locks.get(key) {
                Some(holder) => Some(holder) != session,
                None => false,
            })
    }

    fn submit(&mut self, statement: &Statement, session: Option<SessionId>) -> StatementId {
        let id = StatementId::new(Uuid::new_v4().to_string());
        let mut stored = StoredStatement {
            progress: Progress::Waiting(statement.clone()),
            session: session.clone(),
            describes: 0,
            result_keys: Vec::new(),
        };

        if self.blocked(statement, session.as_ref()) {
            if let Some(active) = session.as_ref().and_then(|s| self.sessions.get_mut(s)) {
                active.waiting_on = Some(id.clone());
            }
            self.waiting.push_back(id.clone());
        } else {
            let (outcome, result_keys) = self.run(&id, statement, session.as_ref());
            stored.progress = Progress::Done(outcome);
            stored.result_keys = result_keys;
            self.touch(session.as_ref());
        }

        self.statements.insert(id.clone(), stored);
        self.retained.push_back(id.clone());
        self.evict();
        // A COMMIT or ROLLBACK may have released a lock.
        self.wake();
        id
    }

    /// Runs every waiting statement that is no longer blocked, in order.
    fn wake(&mut self) {
        let mut index = 0;
        while index < self.waiting.len() {
            let id = self.waiting[index].clone();
            let pending = match self.statements.get(&id) {
                Some(StoredStatement {
                    progress: Progress::Waiting(statement),
                    session,
                    ..
                }) => Some((statement.clone(), session.clone())),
                _ => None,
            };
            let Some((statement, session)) = pending else {
                self.waiting.remove(index);
                continue;
            };
            if self.blocked(&statement, session.as_ref()) {
                index += 1;
                continue;
            }

            self.waiting.remove(index);
            let (outcome, result_keys) = self.run(&id, &statement, session.as_ref());
            if let Some(stored) = self.statements.get_mut(&id) {
                stored.progress = Progress::Done(outcome);
                stored.result_keys = result_keys;
            }
            if let Some(active) = session.as_ref().and_then(|s| self.sessions.get_mut(s)) {
                active.waiting_on = None;
                active.last_used = Instant::now();
            }
        }
    }

    fn evict(&mut self) {
        while self.retained.len() > self.retention {
            let Some(oldest) = self.retained.pop_front() else {
                break;
            };
            let waiting = matches!(
                self.statements.get(&oldest),
                Some(StoredStatement {
                    progress: Progress::Waiting(_),
                    ..
                })
            );
            if waiting {
                self.retained.push_back(oldest);
                break;
            }
            if let Some(stored) = self.statements.remove(&oldest) {
                for key in stored.result_keys {
                    self.results.remove(&key);
                }
            }
        }
        while self.submitted.len() > self.retention {
            self.submitted.pop_front();
        }
    }

    fn run(
        &mut self,
        id: &StatementId,
        statement: &Statement,
        session: Option<&SessionId>,
    ) -> (Outcome, Vec<StatementId>) {
        if let [sql] = statement.sqls() {
            if let Some(control) = Control::parse(sql) {
                return (self.control(session, control), Vec::new());
            }
        }

        let transaction = session
            .filter(|s| {
                self.sessions
                    .get(*s)
                    .is_some_and(|active| active.transaction.is_some())
            })
            .cloned();
        if let Some(session) = &transaction {
            let aborted = self
                .sessions
                .get(session)
                .and_then(|active| active.transaction.as_ref())
                .is_some_and(|t| t.aborted);
            if aborted {
                return (Outcome::Failed(ABORTED_TRANSACTION.to_string()), Vec::new());
            }
        }

        match self.apply(id, statement, transaction.as_ref()) {
            Ok(done) => done,
            Err(outcome) => {
                if let Some(active) = transaction
                    .as_ref()
                    .and_then(|s| self.sessions.get_mut(s))
                    .and_then(|active| active.transaction.as_mut())
                {
                    active.aborted = true;
                }
                (outcome, Vec::new())
            }
        }
    }

    fn control(&mut self, session: Option<&SessionId>, control: Control) -> Outcome {
        // Outside a session each statement is its own transaction.
        let Some(session) = session else {
            return Outcome::done();
        };
        let Some(active) = self.sessions.get_mut(session) else {
            return Outcome::done();
        };

        if control == Control::Begin {
            active.transaction.get_or_insert_with(Transaction::default);
            return Outcome::done();
        }
        let Some(transaction) = active.transaction.take() else {
            return Outcome::done();
        };
        if transaction.aborted || control == Control::Rollback {
            self.restore(transaction.undo);
        }
        self.locks.retain(|_, holder| holder != session);
        Outcome::done()
    }

    /// Executes the statement's SQL; `Err` means nothing was applied.
    fn apply(
        &mut self,
        id: &StatementId,
        statement: &Statement,
        transaction: Option<&SessionId>,
    ) -> Result<(Outcome, Vec<StatementId>), Outcome> {
        if let Some(outcome) = self.injected_failure(statement) {
            return Err(outcome);
        }
        let grammar = grammar().map_err(|e| Outcome::Failed(format!("ERROR: {}", e)))?;
        if statement.sqls().iter().any(|sql| Control::parse(sql).is_some()) {
            return Err(Outcome::Failed(
                "ERROR: transaction control statements cannot run in a batch".to_string(),
            ));
        }

        if let Some(session) = transaction {
            if let Some(active) = self
                .sessions
                .get_mut(session)
                .and_then(|s| s.transaction.as_mut())
            {
                for key in referenced_tables(grammar, statement) {
                    let before = self.tables.get(&key).cloned();
                    active.undo.entry(key).or_insert(before);
                }
            }
        }

        let mut tables = self.tables.clone();
        let mut results = Vec::new();
        let mut locked = Vec::new();
        let mut affected = 0i64;
        for (index, sql) in statement.sqls().iter().enumerate() {
            match interpret(grammar, &mut tables, sql, statement).map_err(Outcome::Failed)? {
                Effect::Rows(mut result) => {
                    result.corrupt = self.corrupts(sql);
                    affected = result.rows.len() as i64;
                    results.push((index + 1, result));
                }
                Effect::Affected(count) => affected = count,
                Effect::Locked(key) => locked.push(key),
            }
        }
        self.tables = tables;

        // Outside a transaction a lock ends with its statement.
        if let Some(session) = transaction {
            for key in locked {
                self.locks.insert(key, session.clone());
            }
        }

        let has_result_set = !results.is_empty();
        let mut result_keys = Vec::with_capacity(results.len());
        for (position, result) in results {
            let key = if statement.is_batch() {
                id.sub_statement(position)
            } else {
                id.clone()
            };
            self.results.insert(key.clone(), result);
            result_keys.push(key);
        }

        Ok((
            Outcome::Finished {
                has_result_set,
                rows: affected,
            },
            result_keys,
        ))
    }
}

/// Simulated statement service
pub struct InMemoryDataApi {
    state: Mutex<EngineState>,
}

impl Default for InMemoryDataApi {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDataApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Report non-terminal states for `polls` status checks first.
    pub fn with_polls_until_finished(self, polls: u32) -> Self {
        self.state().polls_until_finished = polls;
        self
    }

    /// Rows per result page (0 = everything on one page).
    pub fn with_page_size(self, page_size: usize) -> Self {
        self.state().page_size = page_size;
        self
    }

    /// Remember at most `count` statements (and submissions); older ones
    /// are forgotten along with their unread results.
    pub fn with_statement_retention(self, count: usize) -> Self {
        self.state().retention = count.max(1);
        self
    }

    /// Statements containing `needle` end FAILED with `error`, applying nothing.
    pub fn fail_statements_matching(&self, needle: impl Into<String>, error: impl Into<String>) {
        self.state().faults.push(FaultRule {
            needle: needle.into(),
            fault: Fault::Fail(error.into()),
        });
    }

    /// Statements containing `needle` end ABORTED, applying nothing.
    pub fn abort_statements_matching(&self, needle: impl Into<String>, error: impl Into<String>) {
        self.state().faults.push(FaultRule {
            needle: needle.into(),
            fault: Fault::Abort(error.into()),
        });
    }

    /// Results of statements containing `needle` carry an unknown value tag.
    pub fn corrupt_results_matching(&self, needle: impl Into<String>) {
        self.state().faults.push(FaultRule {
            needle: needle.into(),
            fault: Fault::CorruptResult,
        });
    }

    /// Refuse every submission with a 503 (`None` restores service).
    pub fn set_unavailable(&self, message: Option<&str>) {
        self.state().unavailable = message.map(str::to_string);
    }

    pub fn clear_faults(&self) {
        self.state().faults.clear();
    }

    /// Adds a row directly, bypassing the statement path.
    pub fn insert_row(&self, schema: &str, table: &str, record: Record) {
        let mut state = self.state();
        let table = state
            .tables
            .entry((schema.to_string(), table.to_string()))
            .or_default();
        table.insert(
            record
                .iter()
                .map(|(column, value)| (column.to_string(), value.clone()))
                .collect(),
        );
    }

    /// Every row of a table, live or not, in insertion order.
    pub fn rows(&self, schema: &str, table: &str) -> Vec<Record> {
        let state = self.state();
        state
            .tables
            .get(&(schema.to_string(), table.to_string()))
            .map(|t| t.rows.iter().map(|row| t.to_record(row)).collect())
            .unwrap_or_default()
    }

    /// Accepted statements, oldest first, up to the retention limit.
    pub fn submitted(&self) -> Vec<Statement> {
        self.state().submitted.iter().cloned().collect()
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.state().sessions.len()
    }

    /// Connection context for local use; the values are placeholders.
    pub fn connection() -> ConnectionContext {
        ConnectionContext {
            credentials: Credentials {
                access_key_id: "local".to_string(),
                secret_access_key: "local".to_string(),
                session_token: None,
                region: "local".to_string(),
            },
            secret: ConnectionSecret {
                cluster_id: "local".to_string(),
                database: "dev".to_string(),
                secret_ref: "local".to_string(),
            },
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DataApiClient for InMemoryDataApi {
    async fn execute_statement(
        &self,
        _conn: &ConnectionContext,
        statement: &Statement,
    ) -> DataApiResult<ExecuteStatementOutput> {
        let mut state = self.state();
        if let Some(message) = &state.unavailable {
            return Err(DataApiError::Service {
                status: 503,
                message: message.clone(),
            });
        }
        validate_submission(statement).map_err(|e| validation_error(&e.to_string()))?;

        state.expire_idle_sessions();
        let session = match statement.session() {
            SessionScope::None => None,
            SessionScope::Open { keep_alive_seconds } => {
                Some(state.open_session(*keep_alive_seconds))
            }
            SessionScope::Join(session) => {
                state.join_session(session)?;
                Some(session.clone())
            }
        };

        state.submitted.push_back(statement.clone());
        let id = state.submit(statement, session.clone());
        Ok(ExecuteStatementOutput {
            id,
            session_id: session,
        })
    }

    async fn describe_statement(
        &self,
        _conn: &ConnectionContext,
        id: &StatementId,
    ) -> DataApiResult<StatementDescription> {
        let mut state = self.state();
        state.expire_idle_sessions();

        let polls = state.polls_until_finished;
        let stored = state
            .statements
            .get_mut(id)
            .ok_or_else(|| DataApiError::UnknownStatement(id.clone()))?;

        let mut description = StatementDescription {
            id: id.clone(),
            status: StatementStatus::Started,
            error: None,
            has_result_set: false,
            result_rows: None,
        };
        if matches!(stored.progress, Progress::Waiting(_)) {
            return Ok(description);
        }

        stored.describes += 1;
        let session = stored.session.clone();
        if stored.describes <= polls {
            if stored.describes == 1 {
                description.status = StatementStatus::Submitted;
            }
        } else if let Progress::Done(outcome) = &stored.progress {
            match outcome {
                Outcome::Finished {
                    has_result_set,
                    rows,
                } => {
                    description.status = StatementStatus::Finished;
                    description.has_result_set = *has_result_set;
                    description.result_rows = Some(*rows);
                }
                Outcome::Failed(error) => {
                    description.status = StatementStatus::Failed;
                    description.error = Some(error.clone());
                }
                Outcome::Aborted(error) => {
                    description.status = StatementStatus::Aborted;
                    description.error = Some(error.clone());
                }
            }
        }

        // Following a statement keeps its session alive.
        state.touch(session.as_ref());
        Ok(description)
    }

    async fn get_statement_result(
        &self,
        _conn: &ConnectionContext,
        id: &StatementId,
        next_token: Option<&str>,
    ) -> DataApiResult<ResultPage> {
        let mut state = self.state();

        let parent = match id.as_str().rsplit_once(':') {
            Some((parent, _)) => StatementId::new(parent),
            None => id.clone(),
        };
        let stored = state
            .statements
            .get(&parent)
            .ok_or_else(|| DataApiError::UnknownStatement(id.clone()))?;
        let visible = state.polls_until_finished == 0
            || stored.describes > state.polls_until_finished;
        let finished = matches!(stored.progress, Progress::Done(Outcome::Finished { .. }));
        if !visible || !finished {
            return Err(validation_error("Query has not finished"));
        }

        let result = state
            .results
            .get(id)
            .ok_or_else(|| validation_error("Query does not have result"))?;

        let offset = match next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| validation_error("Invalid NextToken"))?,
            None => 0,
        };
        let end = match state.page_size {
            0 => result.rows.len(),
            size => (offset + size).min(result.rows.len()),
        };
        let start = offset.min(end);

        let records = result.rows[start..end]
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| {
                        if result.corrupt {
                            corrupt_field()
                        } else {
                            Field::encode(value)
                        }
                    })
                    .collect()
            })
            .collect();

        let total = result.rows.len();
        let page = ResultPage {
            column_metadata: (offset == 0).then(|| result.columns.clone()),
            records,
            next_token: (end < total).then(|| end.to_string()),
            total_num_rows: Some(total as i64),
        };
        if end >= total {
            state.results.remove(id);
        }
        Ok(page)
    }
}

fn validation_error(message: &str) -> DataApiError {
    DataApiError::Service {
        status: 400,
        message: format!("ValidationException: {}", message),
    }
}

fn corrupt_field() -> Field {
    let mut field = Field::default();
    field
        .unrecognized
        .insert("blobValue".to_string(), serde_json::Value::from("AAEC"));
    field
}

// ============================================================
// Statement interpretation
// ============================================================

enum Effect {
    Rows(QueryResult),
    Affected(i64),
    Locked(TableKey),
}

const TABLE: &str = r#""([A-Za-z_][A-Za-z0-9_]*)"\."([A-Za-z_][A-Za-z0-9_]*)""#;

struct Grammar {
    table: Regex,
    lock: Regex,
    select: Regex,
    exists: Regex,
    insert: Regex,
    max: Regex,
    update: Regex,
    comparison: Regex,
    column: Regex,
    param: Regex,
    cast: Regex,
    next_key: Regex,
}

impl Grammar {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            table: Regex::new(TABLE)?,
            lock: Regex::new(&format!(r"^LOCK TABLE {} IN EXCLUSIVE MODE$", TABLE))?,
            select: Regex::new(&format!(r"^SELECT \* FROM {}(?: WHERE (.+))?$", TABLE))?,
            exists: Regex::new(&format!(
                r"^SELECT EXISTS \(SELECT 1 FROM {} WHERE (.+)\)$",
                TABLE
            ))?,
            insert: Regex::new(&format!(
                r"^INSERT INTO {} \(([^)]+)\) SELECT (.+) FROM {}$",
                TABLE, TABLE
            ))?,
            max: Regex::new(&format!(r#"^SELECT MAX\("(\w+)"\) FROM {}$"#, TABLE))?,
            update: Regex::new(&format!(r"^UPDATE {} SET (.+) WHERE (.+)$", TABLE))?,
            comparison: Regex::new(r#"^"(\w+)" = (.+)$"#)?,
            column: Regex::new(r#"^"(\w+)"$"#)?,
            param: Regex::new(r"^:(\w+)$")?,
            cast: Regex::new(r"^CAST\(:(\w+) AS (BIGINT|DOUBLE PRECISION|BOOLEAN)\)$")?,
            next_key: Regex::new(r#"^COALESCE\(MAX\("(\w+)"\), 0\) \+ 1$"#)?,
        })
    }
}

fn grammar() -> Result<&'static Grammar, &'static regex::Error> {
    static GRAMMAR: OnceLock<Result<Grammar, regex::Error>> = OnceLock::new();
    GRAMMAR.get_or_init(Grammar::compile).as_ref()
}

fn table_key(captures: &regex::Captures<'_>, first: usize) -> TableKey {
    (
        captures[first].to_string(),
        captures[first + 1].to_string(),
    )
}

/// Every table a statement names, across all of its SQL.
fn referenced_tables(grammar: &Grammar, statement: &Statement) -> BTreeSet<TableKey> {
    statement
        .sqls()
        .iter()
        .flat_map(|sql| grammar.table.captures_iter(sql))
        .map(|c| table_key(&c, 1))
        .collect()
}

fn interpret(
    grammar: &Grammar,
    tables: &mut HashMap<TableKey, Table>,
    sql: &str,
    statement: &Statement,
) -> Result<Effect, String> {
    let sql = sql.trim().trim_end_matches(';').trim();

    if let Some(c) = grammar.lock.captures(sql) {
        let key = table_key(&c, 1);
        tables.entry(key.clone()).or_default();
        return Ok(Effect::Locked(key));
    }

    if let Some(c) = grammar.exists.captures(sql) {
        let conditions = parse_conditions(grammar, &c[3], statement)?;
        let table = tables.entry(table_key(&c, 1)).or_default();
        let exists = table.rows.iter().any(|row| table.matches(row, &conditions));
        return Ok(Effect::Rows(QueryResult {
            columns: vec![ColumnMetadata::new("exists", Some("bool"))],
            rows: vec![vec![Value::Boolean(exists)]],
            corrupt: false,
        }));
    }

    if let Some(c) = grammar.select.captures(sql) {
        let conditions = match c.get(3) {
            Some(clause) => parse_conditions(grammar, clause.as_str(), statement)?,
            None => Vec::new(),
        };
        let table = tables.entry(table_key(&c, 1)).or_default();
        let rows = table
            .rows
            .iter()
            .filter(|row| table.matches(row, &conditions))
            .cloned()
            .collect();
        return Ok(Effect::Rows(QueryResult {
            columns: table.column_metadata(),
            rows,
            corrupt: false,
        }));
    }

    if let Some(c) = grammar.max.captures(sql) {
        let column = c[1].to_string();
        let table = tables.entry(table_key(&c, 2)).or_default();
        let max = max_long(table, &column).map_or(Value::Null, Value::Long);
        return Ok(Effect::Rows(QueryResult {
            columns: vec![ColumnMetadata::new("max", Some("int8"))],
            rows: vec![vec![max]],
            corrupt: false,
        }));
    }

    if let Some(c) = grammar.insert.captures(sql) {
        let target = table_key(&c, 1);
        if table_key(&c, 5) != target {
            return Err(format!("ERROR: unsupported statement: {}", sql));
        }
        let columns = split_top_level(&c[3])
            .into_iter()
            .map(|column| {
                grammar
                    .column
                    .captures(column)
                    .map(|m| m[1].to_string())
                    .ok_or_else(|| format!("ERROR: syntax error at or near \"{}\"", column))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let expressions = split_top_level(&c[4]);
        if expressions.len() != columns.len() {
            return Err(
                "ERROR: INSERT has more target columns than expressions".to_string(),
            );
        }

        let table = tables.entry(target).or_default();
        let mut assignments = Vec::with_capacity(columns.len());
        for (column, expression) in columns.into_iter().zip(expressions) {
            let value = match grammar.next_key.captures(expression) {
                Some(k) => Value::Long(max_long(table, &k[1]).unwrap_or(0) + 1),
                None => eval(grammar, expression, statement)?,
            };
            assignments.push((column, value));
        }
        table.insert(assignments);
        return Ok(Effect::Affected(1));
    }

    if let Some(c) = grammar.update.captures(sql) {
        let assignments = split_top_level(&c[3])
            .into_iter()
            .map(|part| parse_comparison(grammar, part, statement))
            .collect::<Result<Vec<_>, _>>()?;
        let conditions = parse_conditions(grammar, &c[4], statement)?;

        let table = tables.entry(table_key(&c, 1)).or_default();
        let matching: Vec<usize> = (0..table.rows.len())
            .filter(|&i| table.matches(&table.rows[i], &conditions))
            .collect();
        let indexed: Vec<(usize, Value)> = assignments
            .into_iter()
            .map(|(column, value)| (table.ensure_column(&column), value))
            .collect();
        for &row in &matching {
            for (index, value) in &indexed {
                table.rows[row][*index] = value.clone();
            }
        }
        return Ok(Effect::Affected(matching.len() as i64));
    }

    Err(format!("ERROR: unsupported statement: {}", sql))
}

fn max_long(table: &Table, column: &str) -> Option<i64> {
    let index = table.position(column)?;
    table.rows.iter().filter_map(|row| row[index].as_i64()).max()
}

fn parse_conditions(
    grammar: &Grammar,
    clause: &str,
    statement: &Statement,
) -> Result<Vec<(String, Value)>, String> {
    clause
        .split(" AND ")
        .map(|part| parse_comparison(grammar, part.trim(), statement))
        .collect()
}

fn parse_comparison(
    grammar: &Grammar,
    text: &str,
    statement: &Statement,
) -> Result<(String, Value), String> {
    let c = grammar
        .comparison
        .captures(text)
        .ok_or_else(|| format!("ERROR: syntax error at or near \"{}\"", text))?;
    Ok((c[1].to_string(), eval(grammar, c[2].trim(), statement)?))
}

fn eval(grammar: &Grammar, expression: &str, statement: &Statement) -> Result<Value, String> {
    match expression {
        "NULL" => return Ok(Value::Null),
        "TRUE" => return Ok(Value::Boolean(true)),
        "FALSE" => return Ok(Value::Boolean(false)),
        "''" => return Ok(Value::String(String::new())),
        _ => {}
    }

    let lookup = |name: &str| {
        statement
            .parameter(name)
            .ok_or_else(|| format!("ERROR: parameter :{} was not supplied", name))
    };

    if let Some(c) = grammar.param.captures(expression) {
        return Ok(Value::String(lookup(&c[1])?.to_string()));
    }

    if let Some(c) = grammar.cast.captures(expression) {
        let text = lookup(&c[1])?;
        let invalid = |sql_type: &str| {
            format!("ERROR: invalid input syntax for type {}: \"{}\"", sql_type, text)
        };
        return match &c[2] {
            "BIGINT" => text.parse().map(Value::Long).map_err(|_| invalid("bigint")),
            "DOUBLE PRECISION" => text
                .parse()
                .map(Value::Double)
                .map_err(|_| invalid("double precision")),
            _ => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Boolean(true)),
                "false" => Ok(Value::Boolean(false)),
                _ => Err(invalid("boolean")),
            },
        };
    }

    Err(format!("ERROR: unsupported expression: {}", expression))
}

/// Splits on commas outside parentheses and string literals.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 0;
    for (index, ch) in text.char_indices() {
        match ch {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => depth = depth.saturating_sub(1),
            ',' if !quoted && depth == 0 => {
                parts.push(text[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts
}
