//! Protocol types for the statement service
//!
//! Envelope field names follow the service's JSON protocol (PascalCase);
//! column metadata uses camelCase.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::Field;

/// Identifier of one submitted statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementId(String);

impl StatementId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address of the `index`-th (1-based) statement of a batch.
    pub fn sub_statement(&self, index: usize) -> StatementId {
        StatementId(format!("{}:{}", self.0, index))
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a session kept open between statements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connection a statement runs on
///
/// Without a session every statement gets its own connection and commits
/// on its own. A session keeps one connection open, so a transaction can
/// span several statements submitted one after another.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionScope {
    #[default]
    None,
    /// Open a session that stays alive this long after each statement.
    Open { keep_alive_seconds: u32 },
    /// Run in a session opened earlier.
    Join(SessionId),
}

/// Lifecycle state of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatementStatus {
    Submitted,
    Picked,
    Started,
    Finished,
    Failed,
    Aborted,
}

impl StatementStatus {
    /// No transition happens out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StatementStatus::Finished | StatementStatus::Failed | StatementStatus::Aborted
        )
    }

    /// Parses the service's status name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "SUBMITTED" => Some(StatementStatus::Submitted),
            "PICKED" => Some(StatementStatus::Picked),
            "STARTED" => Some(StatementStatus::Started),
            "FINISHED" => Some(StatementStatus::Finished),
            "FAILED" => Some(StatementStatus::Failed),
            "ABORTED" => Some(StatementStatus::Aborted),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementStatus::Submitted => "SUBMITTED",
            StatementStatus::Picked => "PICKED",
            StatementStatus::Started => "STARTED",
            StatementStatus::Finished => "FINISHED",
            StatementStatus::Failed => "FAILED",
            StatementStatus::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for StatementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named bind parameter, referenced as `:name` in SQL text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlParameter {
    pub name: String,
    pub value: String,
}

/// SQL submitted as one unit
///
/// A single statement, or a batch that runs all of its statements in one
/// transaction under one statement id. Only single statements take bind
/// parameters; the service refuses a batch that carries any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sqls: Vec<String>,
    parameters: Vec<SqlParameter>,
    session: SessionScope,
}

impl Statement {
    pub fn single(sql: impl Into<String>) -> Self {
        Self {
            sqls: vec![sql.into()],
            parameters: Vec::new(),
            session: SessionScope::None,
        }
    }

    pub fn batch(sqls: Vec<String>) -> Self {
        Self {
            sqls,
            parameters: Vec::new(),
            session: SessionScope::None,
        }
    }

    /// Opens a session on submission; the response carries its id.
    pub fn open_session(mut self, keep_alive_seconds: u32) -> Self {
        self.session = SessionScope::Open { keep_alive_seconds };
        self
    }

    /// Runs in an already open session.
    pub fn in_session(mut self, session: SessionId) -> Self {
        self.session = SessionScope::Join(session);
        self
    }

    pub fn session(&self) -> &SessionScope {
        &self.session
    }

    /// Bind a parameter value
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn push_parameter(&mut self, parameter: SqlParameter) {
        self.parameters.push(parameter);
    }

    pub fn is_batch(&self) -> bool {
        self.sqls.len() > 1
    }

    pub fn sqls(&self) -> &[String] {
        &self.sqls
    }

    pub fn parameters(&self) -> &[SqlParameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// SQL text joined for logging
    pub fn display_sql(&self) -> String {
        self.sqls.join("; ")
    }
}

/// `ExecuteStatement` / `BatchExecuteStatement` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecuteStatementOutput {
    pub id: StatementId,
    /// Set when the statement opened or joined a session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl ExecuteStatementOutput {
    pub fn new(id: StatementId) -> Self {
        Self {
            id,
            session_id: None,
        }
    }
}

/// `DescribeStatement` response
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatementDescription {
    pub id: StatementId,
    pub status: StatementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub has_result_set: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_rows: Option<i64>,
}

/// Column description attached to the first result page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, type_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.map(str::to_string),
        }
    }
}

/// `GetStatementResult` response: one page of rows
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResultPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_metadata: Option<Vec<ColumnMetadata>>,
    #[serde(default)]
    pub records: Vec<Vec<Field>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_num_rows: Option<i64>,
}
