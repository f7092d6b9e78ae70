//! Statement service client
//!
//! [`DataApiClient`] is the seam between the executor and whatever runs
//! the SQL. [`RedshiftDataClient`] calls the managed service through the
//! AWS SDK; [`super::memory::InMemoryDataApi`] simulates it in-process.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_redshiftdata::config::http::HttpResponse;
use aws_sdk_redshiftdata::config::timeout::TimeoutConfig;
use aws_sdk_redshiftdata::config::{BehaviorVersion, Credentials as SdkCredentials, Region};
use aws_sdk_redshiftdata::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_redshiftdata::types::{Field as SdkField, SqlParameter as SdkSqlParameter};
use tracing::trace;

use super::errors::{DataApiError, DataApiResult};
use super::types::{
    ColumnMetadata, ExecuteStatementOutput, ResultPage, SessionId, SessionScope, Statement,
    StatementDescription, StatementId, StatementStatus,
};
use super::value::Field;
use crate::credentials::{ConnectionContext, Credentials};

/// Provider name attached to the SDK credentials
const CREDENTIALS_PROVIDER: &str = "toolstore";

/// Submits SQL and reports statement status and results.
#[async_trait]
pub trait DataApiClient: Send + Sync {
    /// Submit a single statement or a batch. Returns once the service has
    /// accepted it; execution continues remotely.
    async fn execute_statement(
        &self,
        conn: &ConnectionContext,
        statement: &Statement,
    ) -> DataApiResult<ExecuteStatementOutput>;

    async fn describe_statement(
        &self,
        conn: &ConnectionContext,
        id: &StatementId,
    ) -> DataApiResult<StatementDescription>;

    /// One page of results; `next_token` is the previous page's token.
    async fn get_statement_result(
        &self,
        conn: &ConnectionContext,
        id: &StatementId,
        next_token: Option<&str>,
    ) -> DataApiResult<ResultPage>;
}

/// Rejects what the service would refuse, before anything is sent.
///
/// Bind parameters are only accepted on a single statement.
pub fn validate_submission(statement: &Statement) -> DataApiResult<()> {
    if statement.sqls().iter().all(|sql| sql.trim().is_empty()) {
        return Err(DataApiError::InvalidRequest(
            "statement carries no SQL".to_string(),
        ));
    }
    if statement.is_batch() && !statement.parameters().is_empty() {
        return Err(DataApiError::InvalidRequest(format!(
            "a batch of {} statements cannot carry bind parameters",
            statement.sqls().len()
        )));
    }
    Ok(())
}

/// Statement service client on the AWS SDK
///
/// Requests are signed with the credentials of the connection they run
/// on. One SDK client is kept and rebuilt when those credentials change.
#[derive(Debug)]
pub struct RedshiftDataClient {
    endpoint_url: Option<String>,
    timeout: Duration,
    cached: Mutex<Option<(Credentials, aws_sdk_redshiftdata::Client)>>,
}

impl RedshiftDataClient {
    /// `endpoint_url` replaces the regional endpoint (local emulators).
    pub fn new(endpoint_url: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint_url,
            timeout,
            cached: Mutex::new(None),
        }
    }

    pub fn endpoint_url(&self) -> Option<&str> {
        self.endpoint_url.as_deref()
    }

    fn sdk_config(&self, credentials: &Credentials) -> aws_sdk_redshiftdata::Config {
        let provider = SdkCredentials::new(
            credentials.access_key_id.clone(),
            credentials.secret_access_key.clone(),
            credentials.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER,
        );
        let mut builder = aws_sdk_redshiftdata::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .credentials_provider(provider)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(self.timeout)
                    .build(),
            );
        if let Some(url) = &self.endpoint_url {
            builder = builder.endpoint_url(url.trim_end_matches('/'));
        }
        builder.build()
    }

    fn sdk(&self, conn: &ConnectionContext) -> aws_sdk_redshiftdata::Client {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((credentials, client)) = cached.as_ref() {
            if *credentials == conn.credentials {
                return client.clone();
            }
        }

        let client = aws_sdk_redshiftdata::Client::from_conf(self.sdk_config(&conn.credentials));
        *cached = Some((conn.credentials.clone(), client.clone()));
        client
    }
}

#[async_trait]
impl DataApiClient for RedshiftDataClient {
    async fn execute_statement(
        &self,
        conn: &ConnectionContext,
        statement: &Statement,
    ) -> DataApiResult<ExecuteStatementOutput> {
        validate_submission(statement)?;
        let client = self.sdk(conn);

        let (id, session_id) = if statement.is_batch() {
            trace!(operation = "BatchExecuteStatement", "statement service call");
            let mut request = client
                .batch_execute_statement()
                .set_sqls(Some(statement.sqls().to_vec()));
            request = match statement.session() {
                SessionScope::Join(session) => request.session_id(session.as_str()),
                scope => {
                    let request = request
                        .cluster_identifier(conn.cluster_id())
                        .database(conn.database())
                        .secret_arn(conn.secret_ref());
                    match scope {
                        SessionScope::Open { keep_alive_seconds } => request
                            .session_keep_alive_seconds(keep_alive(*keep_alive_seconds)),
                        _ => request,
                    }
                }
            };
            let output = request
                .send()
                .await
                .map_err(|e| classify("BatchExecuteStatement", e))?;
            (
                output.id().map(str::to_string),
                output.session_id().map(str::to_string),
            )
        } else {
            trace!(operation = "ExecuteStatement", "statement service call");
            let sql = statement.sqls().first().cloned().unwrap_or_default();
            let mut request = client.execute_statement().sql(sql);
            request = match statement.session() {
                SessionScope::Join(session) => request.session_id(session.as_str()),
                scope => {
                    let request = request
                        .cluster_identifier(conn.cluster_id())
                        .database(conn.database())
                        .secret_arn(conn.secret_ref());
                    match scope {
                        SessionScope::Open { keep_alive_seconds } => request
                            .session_keep_alive_seconds(keep_alive(*keep_alive_seconds)),
                        _ => request,
                    }
                }
            };
            for parameter in statement.parameters() {
                let parameter = SdkSqlParameter::builder()
                    .name(&parameter.name)
                    .value(&parameter.value)
                    .build()
                    .map_err(|e| DataApiError::InvalidRequest(e.to_string()))?;
                request = request.parameters(parameter);
            }
            let output = request
                .send()
                .await
                .map_err(|e| classify("ExecuteStatement", e))?;
            (
                output.id().map(str::to_string),
                output.session_id().map(str::to_string),
            )
        };

        let id = id.ok_or_else(|| {
            DataApiError::InvalidResponse("submission response carries no statement id".to_string())
        })?;
        Ok(ExecuteStatementOutput {
            id: StatementId::new(id),
            session_id: session_id.map(SessionId::new),
        })
    }

    async fn describe_statement(
        &self,
        conn: &ConnectionContext,
        id: &StatementId,
    ) -> DataApiResult<StatementDescription> {
        trace!(operation = "DescribeStatement", statement_id = %id, "statement service call");
        let output = self
            .sdk(conn)
            .describe_statement()
            .id(id.as_str())
            .send()
            .await
            .map_err(|e| classify("DescribeStatement", e))?;

        let reported = output.status().map(|status| status.as_str());
        let status = reported.and_then(StatementStatus::parse).ok_or_else(|| {
            DataApiError::InvalidResponse(format!(
                "statement {} reported status {}",
                id,
                reported.unwrap_or("<none>")
            ))
        })?;

        Ok(StatementDescription {
            id: id.clone(),
            status,
            error: output.error().map(str::to_string),
            has_result_set: output.has_result_set().unwrap_or(false),
            // -1 stands for "not known"
            result_rows: Some(output.result_rows()).filter(|rows| *rows >= 0),
        })
    }

    async fn get_statement_result(
        &self,
        conn: &ConnectionContext,
        id: &StatementId,
        next_token: Option<&str>,
    ) -> DataApiResult<ResultPage> {
        trace!(operation = "GetStatementResult", statement_id = %id, "statement service call");
        let output = self
            .sdk(conn)
            .get_statement_result()
            .id(id.as_str())
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(|e| classify("GetStatementResult", e))?;

        let columns: Vec<ColumnMetadata> = output
            .column_metadata()
            .iter()
            .map(|column| ColumnMetadata::new(column.name().unwrap_or_default(), column.type_name()))
            .collect();

        Ok(ResultPage {
            column_metadata: (!columns.is_empty()).then_some(columns),
            records: output
                .records()
                .iter()
                .map(|row| row.iter().map(field_from_sdk).collect())
                .collect(),
            next_token: output.next_token().map(str::to_string),
            total_num_rows: Some(output.total_num_rows()),
        })
    }
}

fn keep_alive(seconds: u32) -> i32 {
    i32::try_from(seconds).unwrap_or(i32::MAX)
}

/// Carries every SDK tag over, so the codec sees exactly what was sent.
fn field_from_sdk(field: &SdkField) -> Field {
    match field {
        SdkField::IsNull(is_null) => Field {
            is_null: Some(*is_null),
            ..Default::default()
        },
        SdkField::StringValue(s) => Field::string(s.clone()),
        SdkField::LongValue(i) => Field::long(*i),
        SdkField::DoubleValue(f) => Field::double(*f),
        SdkField::BooleanValue(b) => Field::boolean(*b),
        SdkField::BlobValue(_) => unrecognized_field("blobValue"),
        _ => unrecognized_field("unknown"),
    }
}

fn unrecognized_field(tag: &str) -> Field {
    let mut field = Field::default();
    field
        .unrecognized
        .insert(tag.to_string(), serde_json::Value::Null);
    field
}

fn classify<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> DataApiError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &err {
        SdkError::ServiceError(context) => {
            let fault = context.err();
            let message = match (fault.code(), fault.message()) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (Some(code), None) => code.to_string(),
                (None, Some(message)) => message.to_string(),
                (None, None) => DisplayErrorContext(&err).to_string(),
            };
            DataApiError::Service {
                status: context.raw().status().as_u16(),
                message,
            }
        }
        SdkError::ResponseError(_) => DataApiError::InvalidResponse(format!(
            "{}: {}",
            operation,
            DisplayErrorContext(&err)
        )),
        _ => DataApiError::Transport(format!("{}: {}", operation, DisplayErrorContext(&err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ConnectionSecret;
    use crate::dataapi::errors::DecodeError;
    use crate::dataapi::value::Value;
    use aws_sdk_redshiftdata::primitives::Blob;

    fn conn() -> ConnectionContext {
        ConnectionContext {
            credentials: Credentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: Some("token".to_string()),
                region: "eu-west-1".to_string(),
            },
            secret: ConnectionSecret {
                cluster_id: "tooling".to_string(),
                database: "dev".to_string(),
                secret_ref: "arn:aws:secretsmanager:eu-west-1:1:secret:tooling".to_string(),
            },
        }
    }

    #[test]
    fn test_batch_with_parameters_is_refused() {
        let batch = Statement::batch(vec![
            "LOCK TABLE \"s\".\"t\" IN EXCLUSIVE MODE".to_string(),
            "INSERT INTO \"s\".\"t\" (\"a\") SELECT :p1 FROM \"s\".\"t\"".to_string(),
        ])
        .bind("p1", "x");

        let err = validate_submission(&batch).unwrap_err();
        assert!(matches!(err, DataApiError::InvalidRequest(_)), "{:?}", err);
        assert!(err.to_string().contains("cannot carry bind parameters"));
    }

    #[test]
    fn test_single_with_parameters_and_plain_batch_pass() {
        let single = Statement::single("SELECT * FROM \"s\".\"t\" WHERE \"a\" = :p1").bind("p1", "x");
        assert!(validate_submission(&single).is_ok());

        let batch = Statement::batch(vec!["SELECT 1".to_string(), "SELECT 2".to_string()]);
        assert!(validate_submission(&batch).is_ok());

        assert!(validate_submission(&Statement::single("  ")).is_err());
    }

    #[tokio::test]
    async fn test_client_refuses_parameterized_batch_before_sending() {
        // Nothing listens here; the refusal must happen first.
        let client = RedshiftDataClient::new(
            Some("http://127.0.0.1:9".to_string()),
            Duration::from_millis(100),
        );
        let batch = Statement::batch(vec!["SELECT :p1".to_string(), "SELECT 2".to_string()])
            .bind("p1", "x");

        let err = client.execute_statement(&conn(), &batch).await.unwrap_err();
        assert!(matches!(err, DataApiError::InvalidRequest(_)), "{:?}", err);
    }

    #[test]
    fn test_sdk_config_carries_region_and_endpoint() {
        let client = RedshiftDataClient::new(
            Some("http://localhost:4566/".to_string()),
            Duration::from_secs(5),
        );
        let config = client.sdk_config(&conn().credentials);

        assert_eq!(config.region().map(|r| r.as_ref()), Some("eu-west-1"));
        assert_eq!(client.endpoint_url(), Some("http://localhost:4566/"));
    }

    #[test]
    fn test_sdk_fields_convert_tag_for_tag() {
        assert_eq!(
            field_from_sdk(&SdkField::StringValue("saw".to_string())).decode(),
            Ok(Value::from("saw"))
        );
        assert_eq!(field_from_sdk(&SdkField::LongValue(7)).decode(), Ok(Value::Long(7)));
        assert_eq!(
            field_from_sdk(&SdkField::DoubleValue(1.5)).decode(),
            Ok(Value::Double(1.5))
        );
        assert_eq!(
            field_from_sdk(&SdkField::BooleanValue(true)).decode(),
            Ok(Value::Boolean(true))
        );
        assert_eq!(field_from_sdk(&SdkField::IsNull(true)).decode(), Ok(Value::Null));
        assert_eq!(
            field_from_sdk(&SdkField::IsNull(false)).decode(),
            Err(DecodeError::EmptyField)
        );
        assert_eq!(
            field_from_sdk(&SdkField::BlobValue(Blob::new(vec![0u8, 1, 2]))).decode(),
            Err(DecodeError::UnrecognizedTag("blobValue".to_string()))
        );
    }
}
