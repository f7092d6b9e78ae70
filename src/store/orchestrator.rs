//! # CRUD Orchestrator
//!
//! Composes existence checks with the fixed statements.
//!
//! | Operation | Precondition             | Liveness filter |
//! |-----------|--------------------------|-----------------|
//! | create    | unique key free (opt.)   | no              |
//! | list/get  | none                     | yes             |
//! | update    | `EXISTS` on `s_no`       | no              |
//! | delete    | `EXISTS` on `s_no`       | no              |
//!
//! Deleting twice succeeds both times. Concurrent updates to one record
//! are last-writer-wins.

use serde::Serialize;
use tracing::{debug, info};

use super::allocator::{SequenceAllocator, DEFAULT_SESSION_KEEP_ALIVE_SECS};
use super::errors::{StoreError, StoreResult};
use super::fields::FieldSet;
use super::sql::TableLayout;
use crate::credentials::ConnectionContext;
use crate::dataapi::{scalar_bool, ExecutionError, Record, Statement, StatementExecutor, Value};
use crate::observability::Event;

/// Live records with their count
#[derive(Debug, Clone, Default, Serialize)]
pub struct Listing {
    pub total_count: usize,
    pub records: Vec<Record>,
}

impl From<Vec<Record>> for Listing {
    fn from(records: Vec<Record>) -> Self {
        Self {
            total_count: records.len(),
            records,
        }
    }
}

/// Tool records on top of the statement service
#[derive(Clone)]
pub struct ToolStore {
    executor: StatementExecutor,
    layout: TableLayout,
    unique_key: Option<String>,
    null_markers: Vec<String>,
    session_keep_alive_secs: u32,
}

impl ToolStore {
    pub fn new(executor: StatementExecutor, layout: TableLayout) -> Self {
        Self {
            executor,
            layout,
            unique_key: None,
            null_markers: Vec::new(),
            session_keep_alive_secs: DEFAULT_SESSION_KEEP_ALIVE_SECS,
        }
    }

    /// Refuse creates whose value in `column` already exists.
    pub fn with_unique_key(mut self, column: Option<String>) -> Self {
        self.unique_key = column;
        self
    }

    /// Store these string values as NULL on create.
    pub fn with_null_markers(mut self, markers: Vec<String>) -> Self {
        self.null_markers = markers;
        self
    }

    /// Idle lifetime of the session each create runs its transaction in.
    pub fn with_session_keep_alive(mut self, seconds: u32) -> Self {
        self.session_keep_alive_secs = seconds;
        self
    }

    pub fn layout(&self) -> &TableLayout {
        &self.layout
    }

    pub fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    /// Inserts a record and returns its assigned `s_no`.
    pub async fn create(&self, conn: &ConnectionContext, mut fields: FieldSet) -> StoreResult<i64> {
        if fields.contains(&self.layout.primary_key) {
            return Err(self.reject(StoreError::input(format!(
                "{} is assigned on create and cannot be supplied",
                self.layout.primary_key
            ))));
        }
        fields.apply_null_markers(&self.null_markers);

        if let Some(column) = &self.unique_key {
            if let Some(value) = fields.get(column).filter(|v| !v.is_null()) {
                let statement = self.layout.exists_where(column, value);
                if self.query_bool(conn, &statement).await? {
                    let err = StoreError::Conflict {
                        column: column.clone(),
                        value: value.to_string(),
                    };
                    info!(
                        event = Event::RecordConflict.as_str(),
                        column = %column,
                        "unique key already taken"
                    );
                    return Err(err);
                }
            }
        }

        let s_no = SequenceAllocator::new(&self.executor, &self.layout)
            .with_keep_alive(self.session_keep_alive_secs)
            .insert(conn, &fields)
            .await?;

        info!(
            event = Event::RecordCreated.as_str(),
            s_no,
            fields = fields.len(),
            "record created"
        );
        Ok(s_no)
    }

    /// Every live record.
    pub async fn list_live(&self, conn: &ConnectionContext) -> StoreResult<Listing> {
        let records = self.executor.query(conn, &self.layout.select_live()).await?;
        let listing = Listing::from(records);
        debug!(
            event = Event::RecordsListed.as_str(),
            total_count = listing.total_count,
            "listed live records"
        );
        Ok(listing)
    }

    /// The live record with `s_no`; soft-deleted records are not found.
    pub async fn get_live(&self, conn: &ConnectionContext, s_no: i64) -> StoreResult<Record> {
        let statement = self.layout.select_live_by_key(s_no);
        let mut records = self.executor.query(conn, &statement).await?;
        if records.is_empty() {
            debug!(event = Event::RecordNotFound.as_str(), s_no, "no live record");
            return Err(StoreError::NoLiveRecord(s_no));
        }
        Ok(records.swap_remove(0))
    }

    /// Live records whose secondary key equals `owner`. Empty is success.
    pub async fn list_live_by_secondary(
        &self,
        conn: &ConnectionContext,
        owner: &str,
    ) -> StoreResult<Listing> {
        let statement = self.layout.select_live_by_secondary(owner);
        let listing = Listing::from(self.executor.query(conn, &statement).await?);
        debug!(
            event = Event::RecordsListed.as_str(),
            total_count = listing.total_count,
            column = %self.layout.secondary_key,
            "listed live records by owner"
        );
        Ok(listing)
    }

    /// Whether any row, live or not, has `s_no`.
    pub async fn exists(&self, conn: &ConnectionContext, s_no: i64) -> StoreResult<bool> {
        self.query_bool(conn, &self.layout.exists_by_key(s_no)).await
    }

    /// Applies the supplied fields to an existing record. A primary key in
    /// `fields` is ignored; if no other field remains, no statement runs.
    pub async fn update(
        &self,
        conn: &ConnectionContext,
        s_no: i64,
        mut fields: FieldSet,
    ) -> StoreResult<()> {
        fields.remove(&self.layout.primary_key);
        if fields.is_empty() {
            return Err(self.reject(StoreError::input("No fields provided for update")));
        }

        self.require_existing(conn, s_no).await?;
        self.executor
            .run(conn, &self.layout.update_fields(s_no, &fields))
            .await?;

        info!(
            event = Event::RecordUpdated.as_str(),
            s_no,
            fields = fields.len(),
            "record updated"
        );
        Ok(())
    }

    /// Clears the liveness flag of an existing record.
    pub async fn soft_delete(&self, conn: &ConnectionContext, s_no: i64) -> StoreResult<()> {
        self.require_existing(conn, s_no).await?;
        self.executor
            .run(conn, &self.layout.soft_delete(s_no))
            .await?;

        info!(event = Event::RecordDeleted.as_str(), s_no, "record marked as deleted");
        Ok(())
    }

    async fn require_existing(&self, conn: &ConnectionContext, s_no: i64) -> StoreResult<()> {
        if self.exists(conn, s_no).await? {
            Ok(())
        } else {
            debug!(event = Event::RecordNotFound.as_str(), s_no, "record does not exist");
            Err(StoreError::NotFound(s_no))
        }
    }

    async fn query_bool(&self, conn: &ConnectionContext, statement: &Statement) -> StoreResult<bool> {
        let handle = self.executor.run(conn, statement).await?;
        let records = self.executor.fetch_records(conn, handle.id()).await?;
        scalar_bool(&records).map_err(|source| {
            StoreError::from(ExecutionError::Decode {
                statement_id: handle.id().clone(),
                source,
            })
        })
    }

    fn reject(&self, err: StoreError) -> StoreError {
        debug!(event = Event::RequestRejected.as_str(), error = %err, "request rejected");
        err
    }
}

/// Value of the primary key in a record, when it is an integer.
pub fn record_key(record: &Record, primary_key: &str) -> Option<i64> {
    record.get(primary_key).and_then(Value::as_i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataapi::{InMemoryDataApi, PollPolicy};
    use serde_json::json;
    use std::sync::Arc;

    fn layout() -> TableLayout {
        TableLayout {
            schema: "tooling".to_string(),
            table: "tools".to_string(),
            primary_key: "s_no".to_string(),
            liveness_column: "is_display".to_string(),
            secondary_key: "login".to_string(),
        }
    }

    fn fields(value: serde_json::Value) -> FieldSet {
        FieldSet::from_json(value.as_object().unwrap()).unwrap()
    }

    fn store(api: Arc<InMemoryDataApi>) -> ToolStore {
        ToolStore::new(StatementExecutor::new(api, PollPolicy::default()), layout())
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_rejects_supplied_key() {
        let api = Arc::new(InMemoryDataApi::new());
        let err = store(api.clone())
            .create(&InMemoryDataApi::connection(), fields(json!({"s_no": 99, "tool_name": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Input(_)));
        assert!(api.submitted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unique_key_conflict() {
        let api = Arc::new(InMemoryDataApi::new());
        let store = store(api.clone()).with_unique_key(Some("tool_name".to_string()));
        let conn = InMemoryDataApi::connection();

        store.create(&conn, fields(json!({"tool_name": "saw"}))).await.unwrap();
        let err = store
            .create(&conn, fields(json!({"tool_name": "saw"})))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Conflict { ref column, .. } if column == "tool_name"));
        assert_eq!(api.rows("tooling", "tools").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_markers_applied_on_create() {
        let api = Arc::new(InMemoryDataApi::new());
        let store = store(api.clone()).with_null_markers(vec!["NA".to_string()]);
        let conn = InMemoryDataApi::connection();

        let s_no = store
            .create(&conn, fields(json!({"tool_name": "saw", "owner_id": "NA"})))
            .await
            .unwrap();
        let record = store.get_live(&conn, s_no).await.unwrap();
        assert_eq!(record.get("owner_id"), Some(&Value::Null));
        assert_eq!(record_key(&record, "s_no"), Some(s_no));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_ignores_key_in_fields() {
        let api = Arc::new(InMemoryDataApi::new());
        let store = store(api.clone());
        let conn = InMemoryDataApi::connection();

        let s_no = store.create(&conn, fields(json!({"tool_name": "saw"}))).await.unwrap();
        store
            .update(&conn, s_no, fields(json!({"s_no": s_no, "tool_name": "jigsaw"})))
            .await
            .unwrap();

        let record = store.get_live(&conn, s_no).await.unwrap();
        assert_eq!(record.get("tool_name"), Some(&Value::from("jigsaw")));
        assert_eq!(record.get("s_no"), Some(&Value::Long(s_no)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_deleted_record_still_exists() {
        let api = Arc::new(InMemoryDataApi::new());
        let store = store(api.clone());
        let conn = InMemoryDataApi::connection();

        let s_no = store.create(&conn, fields(json!({"tool_name": "saw"}))).await.unwrap();
        store.soft_delete(&conn, s_no).await.unwrap();

        assert!(store.exists(&conn, s_no).await.unwrap());
        assert!(matches!(
            store.get_live(&conn, s_no).await,
            Err(StoreError::NoLiveRecord(n)) if n == s_no
        ));
        assert_eq!(store.list_live(&conn).await.unwrap().total_count, 0);
    }
}
