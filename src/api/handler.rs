//! Tool request dispatch
//!
//! One call handles one request to completion: parse the inputs, resolve
//! a connection, run the store operation, shape the payload. Every
//! failure becomes a structured JSON error; nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::request::{GatewayEvent, ToolOperation, ToolRequest};
use super::response::{ApiResponse, GatewayResponse};
use crate::config::ServiceConfig;
use crate::credentials::{Connector, StaticCredentialProvider, StaticSecretResolver};
use crate::dataapi::{DataApiClient, StatementExecutor};
use crate::observability::Event;
use crate::store::{StoreError, StoreResult, ToolStore};

/// Request handler shared by the HTTP routes and `invoke`
#[derive(Clone)]
pub struct ToolService {
    connector: Connector,
    store: ToolStore,
    route_prefix: String,
}

impl ToolService {
    pub fn new(connector: Connector, store: ToolStore, route_prefix: impl Into<String>) -> Self {
        Self {
            connector,
            store,
            route_prefix: route_prefix.into(),
        }
    }

    /// Wires configuration to a statement service client.
    pub fn from_config(config: &ServiceConfig, client: Arc<dyn DataApiClient>) -> Self {
        let connector = Connector::new(
            Arc::new(StaticCredentialProvider::new(
                config.credentials.to_credentials(),
            )),
            Arc::new(StaticSecretResolver::new(
                config.secret.name.clone(),
                config.secret.arn.clone(),
                config.secret.document.clone(),
            )),
            config.secret.name.clone(),
        );
        let store = ToolStore::new(
            StatementExecutor::new(client, config.poll.policy()),
            config.table.layout(),
        )
        .with_unique_key(config.table.unique_key.clone())
        .with_null_markers(config.table.null_markers.clone())
        .with_session_keep_alive(config.data_api.session_keep_alive_secs);

        Self::new(connector, store, config.route_prefix.clone())
    }

    pub fn store(&self) -> &ToolStore {
        &self.store
    }

    pub fn route_prefix(&self) -> &str {
        &self.route_prefix
    }

    /// Runs one operation and renders its outcome.
    pub async fn dispatch(
        &self,
        operation: ToolOperation,
        query: Option<&HashMap<String, String>>,
        body: Option<&str>,
    ) -> ApiResponse {
        info!(
            event = Event::InvokeReceived.as_str(),
            operation = operation.segment(),
            "request received"
        );

        match self.try_dispatch(operation, query, body).await {
            Ok(response) => response,
            Err(err) => {
                log_failure(operation, &err);
                ApiResponse::from_error(&err)
            }
        }
    }

    async fn try_dispatch(
        &self,
        operation: ToolOperation,
        query: Option<&HashMap<String, String>>,
        body: Option<&str>,
    ) -> StoreResult<ApiResponse> {
        let request = ToolRequest::parse(operation, query, body, self.store.layout())?;
        let conn = self.connector.connect().await?;

        let response = match request {
            ToolRequest::Get { s_no } => ApiResponse::record(self.store.get_live(&conn, s_no).await?),
            ToolRequest::ListByOwner { owner } => {
                ApiResponse::listing(&self.store.list_live_by_secondary(&conn, &owner).await?)
            }
            ToolRequest::ListAll => ApiResponse::listing(&self.store.list_live(&conn).await?),
            ToolRequest::Create { fields, data } => {
                let s_no = self.store.create(&conn, fields).await?;
                ApiResponse::created(s_no, data)
            }
            ToolRequest::Update { s_no, fields, data } => {
                self.store.update(&conn, s_no, fields).await?;
                ApiResponse::updated(s_no, data)
            }
            ToolRequest::Delete { s_no } => {
                self.store.soft_delete(&conn, s_no).await?;
                ApiResponse::deleted(s_no)
            }
        };
        Ok(response)
    }

    /// Routes a gateway event by its path and wraps the outcome.
    pub async fn handle_event(&self, event: &GatewayEvent) -> GatewayResponse {
        let response = match ToolOperation::resolve(&event.raw_path, &self.route_prefix) {
            Some(operation) => {
                self.dispatch(
                    operation,
                    event.query_string_parameters.as_ref(),
                    event.body.as_deref(),
                )
                .await
            }
            None => {
                debug!(
                    event = Event::RequestRejected.as_str(),
                    path = %event.raw_path,
                    "no operation at path"
                );
                ApiResponse::not_found_route(&event.raw_path)
            }
        };
        response.into_gateway()
    }
}

fn log_failure(operation: ToolOperation, err: &StoreError) {
    if err.status_code().is_server_error() {
        warn!(
            event = Event::RequestFailed.as_str(),
            operation = operation.segment(),
            code = err.code(),
            error = %err,
            "request failed"
        );
    } else {
        debug!(
            event = Event::RequestRejected.as_str(),
            operation = operation.segment(),
            code = err.code(),
            error = %err,
            "request rejected"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataapi::InMemoryDataApi;
    use serde_json::json;

    fn config() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.table.schema = "tooling".to_string();
        config.table.table = "tools".to_string();
        config.credentials.access_key_id = "AKIDLOCAL".to_string();
        config.credentials.secret_access_key = "local".to_string();
        config.secret.name = "tooling/redshift".to_string();
        config.secret.document = json!({"dbClusterIdentifier": "local", "dbname": "dev"});
        config
    }

    fn event(path: &str, query: Option<&[(&str, &str)]>, body: Option<serde_json::Value>) -> GatewayEvent {
        GatewayEvent {
            raw_path: format!("/csp-tooling-lambda1/{}", path),
            query_string_parameters: query.map(|pairs| {
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            body: body.map(|b| b.to_string()),
        }
    }

    fn body(response: &GatewayResponse) -> serde_json::Value {
        serde_json::from_str(&response.body).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_round_trip() {
        let api = Arc::new(InMemoryDataApi::new());
        let service = ToolService::from_config(&config(), api.clone());

        let created = service
            .handle_event(&event("createTool", None, Some(json!({"tool_name": "saw"}))))
            .await;
        assert_eq!(created.status_code, 201);
        assert_eq!(body(&created)["s_no"], json!(1));

        let fetched = service
            .handle_event(&event("getTools", Some(&[("s_no", "1")]), None))
            .await;
        assert_eq!(fetched.status_code, 200);
        assert_eq!(body(&fetched)["tool_name"], json!("saw"));
        assert_eq!(body(&fetched)["is_display"], json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_path() {
        let service = ToolService::from_config(&config(), Arc::new(InMemoryDataApi::new()));
        let response = service.handle_event(&event("dropTools", None, None)).await;
        assert_eq!(response.status_code, 404);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_credentials_is_upstream_error() {
        let mut config = config();
        config.credentials.access_key_id.clear();
        let service = ToolService::from_config(&config, Arc::new(InMemoryDataApi::new()));

        let response = service.handle_event(&event("getTools", None, None)).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(body(&response)["code"], json!("UPSTREAM_ERROR"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_errors_skip_connection() {
        let mut config = config();
        config.credentials.access_key_id.clear();
        let service = ToolService::from_config(&config, Arc::new(InMemoryDataApi::new()));

        let response = service
            .handle_event(&event("deleteTool", None, Some(json!({}))))
            .await;
        assert_eq!(response.status_code, 400);
        assert_eq!(
            body(&response)["error"],
            json!("s_no is required in the request")
        );
    }
}
