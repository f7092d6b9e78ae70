//! Fixed statement shapes
//!
//! Identifiers are validated and double-quoted. Values never enter SQL
//! text: each one is bound as a named parameter, with an explicit cast
//! for non-string types. NULL is the only value written as a literal.

use super::fields::FieldSet;
use crate::dataapi::{Statement, Value};

/// Quotes an already validated identifier.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

/// Allocates `:p1`, `:p2`, ... and collects their values
#[derive(Debug, Default)]
pub struct ParamBinder {
    statement_params: Vec<(String, String)>,
}

impl ParamBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// SQL expression standing for `value`.
    pub fn bind(&mut self, value: &Value) -> String {
        let text = match value.parameter_text() {
            Some(text) => text,
            None => return "NULL".to_string(),
        };
        // The service rejects empty parameter values.
        if text.is_empty() {
            return "''".to_string();
        }

        let name = format!("p{}", self.statement_params.len() + 1);
        let placeholder = format!(":{}", name);
        self.statement_params.push((name, text));

        match value.sql_cast() {
            Some(sql_type) => format!("CAST({} AS {})", placeholder, sql_type),
            None => placeholder,
        }
    }

    pub fn bind_key(&mut self, key: i64) -> String {
        self.bind(&Value::Long(key))
    }

    /// Attaches the collected parameters to `statement`.
    pub fn finish(self, statement: Statement) -> Statement {
        self.statement_params
            .into_iter()
            .fold(statement, |statement, (name, value)| statement.bind(name, value))
    }
}

/// Where the tool records live and which columns carry meaning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    pub schema: String,
    pub table: String,
    /// Sequence number column
    pub primary_key: String,
    /// Soft-delete flag, TRUE while the record is live
    pub liveness_column: String,
    /// Owner column used for filtered listing
    pub secondary_key: String,
}

impl TableLayout {
    /// `"schema"."table"`
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.table)
        )
    }

    fn live_predicate(&self) -> String {
        format!("{} = TRUE", quote_identifier(&self.liveness_column))
    }

    /// Every live record.
    pub fn select_live(&self) -> Statement {
        Statement::single(format!(
            "SELECT * FROM {} WHERE {}",
            self.qualified_name(),
            self.live_predicate()
        ))
    }

    /// The live record with the given key, if any.
    pub fn select_live_by_key(&self, key: i64) -> Statement {
        self.select_live_where(&self.primary_key, &Value::Long(key))
    }

    /// Live records owned by `owner`.
    pub fn select_live_by_secondary(&self, owner: &str) -> Statement {
        self.select_live_where(&self.secondary_key, &Value::from(owner))
    }

    fn select_live_where(&self, column: &str, value: &Value) -> Statement {
        let mut binder = ParamBinder::new();
        let sql = format!(
            "SELECT * FROM {} WHERE {} = {} AND {}",
            self.qualified_name(),
            quote_identifier(column),
            binder.bind(value),
            self.live_predicate()
        );
        binder.finish(Statement::single(sql))
    }

    /// `EXISTS` over the primary key, regardless of liveness.
    pub fn exists_by_key(&self, key: i64) -> Statement {
        self.exists_where(&self.primary_key, &Value::Long(key))
    }

    /// `EXISTS` over an arbitrary (validated) column.
    pub fn exists_where(&self, column: &str, value: &Value) -> Statement {
        let mut binder = ParamBinder::new();
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = {})",
            self.qualified_name(),
            quote_identifier(column),
            binder.bind(value)
        );
        binder.finish(Statement::single(sql))
    }

    /// Exclusive table lock, held until the enclosing transaction ends.
    pub fn lock_exclusive(&self) -> Statement {
        Statement::single(format!(
            "LOCK TABLE {} IN EXCLUSIVE MODE",
            self.qualified_name()
        ))
    }

    /// Inserts `fields` under `COALESCE(MAX(pk), 0) + 1`.
    ///
    /// Only unique while [`Self::lock_exclusive`] is held by the same
    /// transaction.
    pub fn insert_next_key(&self, fields: &FieldSet) -> Statement {
        let table = self.qualified_name();
        let key = quote_identifier(&self.primary_key);

        let mut binder = ParamBinder::new();
        let mut columns = vec![key.clone()];
        let mut values = vec![format!("COALESCE(MAX({}), 0) + 1", key)];
        for (name, value) in fields.iter() {
            columns.push(quote_identifier(name));
            values.push(binder.bind(value));
        }
        if !fields.contains(&self.liveness_column) {
            columns.push(quote_identifier(&self.liveness_column));
            values.push("TRUE".to_string());
        }

        let sql = format!(
            "INSERT INTO {} ({}) SELECT {} FROM {}",
            table,
            columns.join(", "),
            values.join(", "),
            table
        );
        binder.finish(Statement::single(sql))
    }

    pub fn select_max_key(&self) -> Statement {
        Statement::single(format!(
            "SELECT MAX({}) FROM {}",
            quote_identifier(&self.primary_key),
            self.qualified_name()
        ))
    }

    /// Assigns every supplied field of one record. `fields` must be
    /// non-empty and must not contain the primary key.
    pub fn update_fields(&self, key: i64, fields: &FieldSet) -> Statement {
        let mut binder = ParamBinder::new();
        let assignments: Vec<String> = fields
            .iter()
            .map(|(name, value)| format!("{} = {}", quote_identifier(name), binder.bind(value)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = {}",
            self.qualified_name(),
            assignments.join(", "),
            quote_identifier(&self.primary_key),
            binder.bind_key(key)
        );
        binder.finish(Statement::single(sql))
    }

    /// Clears the liveness flag; the row stays.
    pub fn soft_delete(&self, key: i64) -> Statement {
        let mut binder = ParamBinder::new();
        let sql = format!(
            "UPDATE {} SET {} = FALSE WHERE {} = {}",
            self.qualified_name(),
            quote_identifier(&self.liveness_column),
            quote_identifier(&self.primary_key),
            binder.bind_key(key)
        );
        binder.finish(Statement::single(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

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

    #[test]
    fn test_select_live() {
        let statement = layout().select_live();
        assert_eq!(
            statement.sqls(),
            &[r#"SELECT * FROM "tooling"."tools" WHERE "is_display" = TRUE"#.to_string()]
        );
        assert!(statement.parameters().is_empty());
    }

    #[test]
    fn test_select_by_key_binds_cast() {
        let statement = layout().select_live_by_key(42);
        assert_eq!(
            statement.sqls()[0],
            r#"SELECT * FROM "tooling"."tools" WHERE "s_no" = CAST(:p1 AS BIGINT) AND "is_display" = TRUE"#
        );
        assert_eq!(statement.parameter("p1"), Some("42"));
    }

    #[test]
    fn test_secondary_value_never_enters_sql() {
        let statement = layout().select_live_by_secondary("o'brien'; DROP TABLE tools; --");
        assert!(!statement.sqls()[0].contains("DROP"));
        assert_eq!(
            statement.parameter("p1"),
            Some("o'brien'; DROP TABLE tools; --")
        );
    }

    #[test]
    fn test_exists_by_key() {
        let statement = layout().exists_by_key(7);
        assert_eq!(
            statement.sqls()[0],
            r#"SELECT EXISTS (SELECT 1 FROM "tooling"."tools" WHERE "s_no" = CAST(:p1 AS BIGINT))"#
        );
    }

    #[test]
    fn test_insert_next_key() {
        let statement = layout().insert_next_key(&fields(json!({"tool_name": "saw", "owner_id": null})));
        assert!(!statement.is_batch());
        let sql = &statement.sqls()[0];
        assert!(sql.starts_with(r#"INSERT INTO "tooling"."tools" ("s_no", "#));
        assert!(sql.contains(r#"SELECT COALESCE(MAX("s_no"), 0) + 1, "#));
        assert!(sql.contains("NULL"));
        assert!(sql.ends_with(r#", TRUE FROM "tooling"."tools""#));
        assert_eq!(statement.parameter("p1"), Some("saw"));
        assert_eq!(statement.parameters().len(), 1);
    }

    #[test]
    fn test_insert_next_key_keeps_supplied_liveness() {
        let statement = layout().insert_next_key(&fields(json!({"is_display": false})));
        assert!(statement.sqls()[0].contains("CAST(:p1 AS BOOLEAN)"));
        assert!(!statement.sqls()[0].contains("TRUE"));
    }

    #[test]
    fn test_lock_and_max_take_no_parameters() {
        let lock = layout().lock_exclusive();
        assert_eq!(
            lock.sqls()[0],
            r#"LOCK TABLE "tooling"."tools" IN EXCLUSIVE MODE"#
        );
        let max = layout().select_max_key();
        assert_eq!(max.sqls()[0], r#"SELECT MAX("s_no") FROM "tooling"."tools""#);
        assert!(lock.parameters().is_empty() && max.parameters().is_empty());
    }

    #[test]
    fn test_update_fields() {
        let statement = layout().update_fields(5, &fields(json!({"version": 2, "rating": 4.5})));
        let sql = &statement.sqls()[0];
        assert!(sql.starts_with(r#"UPDATE "tooling"."tools" SET "#));
        // JSON object keys arrive sorted
        assert!(sql.contains(r#""rating" = CAST(:p1 AS DOUBLE PRECISION)"#));
        assert!(sql.contains(r#""version" = CAST(:p2 AS BIGINT)"#));
        assert!(sql.ends_with(r#"WHERE "s_no" = CAST(:p3 AS BIGINT)"#));
        assert_eq!(statement.parameter("p3"), Some("5"));
    }

    #[test]
    fn test_soft_delete() {
        let statement = layout().soft_delete(9);
        assert_eq!(
            statement.sqls()[0],
            r#"UPDATE "tooling"."tools" SET "is_display" = FALSE WHERE "s_no" = CAST(:p1 AS BIGINT)"#
        );
    }

    #[test]
    fn test_empty_string_is_a_literal() {
        let mut binder = ParamBinder::new();
        assert_eq!(binder.bind(&Value::from("")), "''");
        assert_eq!(binder.bind(&Value::Null), "NULL");
        assert_eq!(binder.bind(&Value::Boolean(true)), "CAST(:p1 AS BOOLEAN)");
    }
}
