//! Result Materializer
//!
//! Column metadata arrives on the first page only; the cursor keeps it
//! for every later page. Rows are decoded by column position and kept in
//! the order the engine emitted them.

use tracing::debug;

use super::client::DataApiClient;
use super::errors::{DecodeError, ExecutionError, ExecutionResult};
use super::record::Record;
use super::types::{ResultPage, StatementId};
use super::value::{Field, Value};
use crate::credentials::ConnectionContext;
use crate::observability::Event;

/// Reads the pages of one finished statement in order
///
/// Not restartable: reading the rows again means re-running the query.
pub struct ResultCursor<'a> {
    client: &'a dyn DataApiClient,
    conn: &'a ConnectionContext,
    statement_id: StatementId,
    columns: Option<Vec<String>>,
    next_token: Option<String>,
    pages_read: usize,
    exhausted: bool,
}

impl<'a> ResultCursor<'a> {
    pub fn new(
        client: &'a dyn DataApiClient,
        conn: &'a ConnectionContext,
        statement_id: StatementId,
    ) -> Self {
        Self {
            client,
            conn,
            statement_id,
            columns: None,
            next_token: None,
            pages_read: 0,
            exhausted: false,
        }
    }

    pub fn statement_id(&self) -> &StatementId {
        &self.statement_id
    }

    /// Column names, known once the first page is read.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Next page, or `None` once the continuation token runs out.
    pub async fn next_page(&mut self) -> ExecutionResult<Option<ResultPage>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .client
            .get_statement_result(self.conn, &self.statement_id, self.next_token.as_deref())
            .await?;

        if self.columns.is_none() {
            let metadata = page
                .column_metadata
                .as_ref()
                .ok_or_else(|| self.decode_error(DecodeError::MissingColumnMetadata))?;
            for column in metadata {
                debug!(
                    statement_id = %self.statement_id,
                    column = %column.name,
                    type_name = column.type_name.as_deref().unwrap_or("unknown"),
                    "result column"
                );
            }
            self.columns = Some(metadata.iter().map(|c| c.name.clone()).collect());
        }

        self.pages_read += 1;
        self.next_token = page.next_token.clone().filter(|token| !token.is_empty());
        self.exhausted = self.next_token.is_none();

        debug!(
            event = Event::ResultPageFetched.as_str(),
            statement_id = %self.statement_id,
            page = self.pages_read,
            rows = page.records.len(),
            total_rows = page.total_num_rows,
            more = !self.exhausted,
            "result page fetched"
        );

        Ok(Some(page))
    }

    /// Drains every remaining page into records.
    pub async fn collect_records(mut self) -> ExecutionResult<Vec<Record>> {
        let mut materializer: Option<Materializer> = None;

        while let Some(page) = self.next_page().await? {
            materializer
                .get_or_insert_with(|| {
                    Materializer::new(self.columns.clone().unwrap_or_default())
                })
                .push_page(&page)
                .map_err(|e| self.decode_error(e))?;
        }

        Ok(materializer.map(Materializer::finish).unwrap_or_default())
    }

    fn decode_error(&self, source: DecodeError) -> ExecutionError {
        ExecutionError::Decode {
            statement_id: self.statement_id.clone(),
            source,
        }
    }
}

/// Accumulates decoded rows page by page
#[derive(Debug)]
pub struct Materializer {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Materializer {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    pub fn push_page(&mut self, page: &ResultPage) -> Result<(), DecodeError> {
        self.records.reserve(page.records.len());
        for row in &page.records {
            self.push_row(row)?;
        }
        Ok(())
    }

    pub fn push_row(&mut self, row: &[Field]) -> Result<(), DecodeError> {
        if row.len() != self.columns.len() {
            return Err(DecodeError::RowWidth {
                row: self.records.len(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }

        let mut record = Record::with_capacity(row.len());
        for (column, field) in self.columns.iter().zip(row) {
            record.insert(column.as_str(), field.decode()?);
        }
        self.records.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn finish(self) -> Vec<Record> {
        self.records
    }
}

/// Decodes already-fetched pages against a committed column list.
pub fn materialize<'p, I>(pages: I, columns: &[String]) -> Result<Vec<Record>, DecodeError>
where
    I: IntoIterator<Item = &'p ResultPage>,
{
    let mut materializer = Materializer::new(columns.to_vec());
    for page in pages {
        materializer.push_page(page)?;
    }
    Ok(materializer.finish())
}

/// First column of the first row.
pub fn scalar(records: &[Record]) -> Result<(&str, &Value), DecodeError> {
    records
        .first()
        .and_then(|record| record.iter().next())
        .ok_or(DecodeError::EmptyResult)
}

/// Single boolean result, e.g. an `EXISTS` query.
pub fn scalar_bool(records: &[Record]) -> Result<bool, DecodeError> {
    let (column, value) = scalar(records)?;
    value.as_bool().ok_or_else(|| DecodeError::UnexpectedType {
        column: column.to_string(),
        expected: "boolean",
        found: value.type_name(),
    })
}

/// Single integer result, e.g. a `MAX` query.
pub fn scalar_i64(records: &[Record]) -> Result<i64, DecodeError> {
    let (column, value) = scalar(records)?;
    value.as_i64().ok_or_else(|| DecodeError::UnexpectedType {
        column: column.to_string(),
        expected: "integer",
        found: value.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["s_no".to_string(), "tool_name".to_string(), "is_display".to_string()]
    }

    fn page(rows: Vec<Vec<Field>>) -> ResultPage {
        ResultPage {
            column_metadata: None,
            records: rows,
            next_token: None,
            total_num_rows: None,
        }
    }

    #[test]
    fn test_materialize_preserves_order_across_pages() {
        let pages = vec![
            page(vec![
                vec![Field::long(3), Field::string("c"), Field::boolean(true)],
                vec![Field::long(1), Field::string("a"), Field::boolean(true)],
            ]),
            page(vec![vec![Field::long(2), Field::null(), Field::boolean(false)]]),
        ];

        let records = materialize(&pages, &columns()).unwrap();
        let order: Vec<i64> = records
            .iter()
            .map(|r| r.get("s_no").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(order, vec![3, 1, 2]);
        assert_eq!(records[2].get("tool_name"), Some(&Value::Null));
        assert_eq!(records[2].get("is_display"), Some(&Value::Boolean(false)));
    }

    #[test]
    fn test_row_width_mismatch() {
        let pages = vec![
            page(vec![vec![Field::long(1), Field::string("a"), Field::boolean(true)]]),
            page(vec![vec![Field::long(2)]]),
        ];

        assert_eq!(
            materialize(&pages, &columns()),
            Err(DecodeError::RowWidth {
                row: 1,
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn test_bad_field_surfaces() {
        let mut field = Field::default();
        field
            .unrecognized
            .insert("blobValue".to_string(), serde_json::json!("AA=="));
        let pages = vec![page(vec![vec![Field::long(1), field, Field::boolean(true)]])];

        assert_eq!(
            materialize(&pages, &columns()),
            Err(DecodeError::UnrecognizedTag("blobValue".to_string()))
        );
    }

    #[test]
    fn test_empty_pages() {
        let pages = vec![page(vec![])];
        assert!(materialize(&pages, &columns()).unwrap().is_empty());
    }

    #[test]
    fn test_scalars() {
        let exists = materialize(&[page(vec![vec![Field::boolean(true)]])], &["exists".to_string()])
            .unwrap();
        assert!(scalar_bool(&exists).unwrap());

        let max = materialize(&[page(vec![vec![Field::long(41)]])], &["max".to_string()]).unwrap();
        assert_eq!(scalar_i64(&max).unwrap(), 41);

        assert_eq!(
            scalar_bool(&max),
            Err(DecodeError::UnexpectedType {
                column: "max".to_string(),
                expected: "boolean",
                found: "integer"
            })
        );
        assert_eq!(scalar_i64(&[]), Err(DecodeError::EmptyResult));
    }
}
