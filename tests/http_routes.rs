//! HTTP Route Tests
//!
//! Drives the axum router directly with `oneshot`:
//! - routes are mounted under the configured prefix
//! - status codes mirror the response payloads
//! - `/health` answers without touching the statement service

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as Json};
use tower::ServiceExt;

use toolstore::api::ToolService;
use toolstore::config::ServiceConfig;
use toolstore::dataapi::InMemoryDataApi;
use toolstore::http_server::{HttpServer, HttpServerConfig};

// =============================================================================
// Test Utilities
// =============================================================================

fn router_with_prefix(prefix: &str) -> (Router, Arc<InMemoryDataApi>) {
    let mut config = ServiceConfig::default();
    config.route_prefix = prefix.to_string();
    config.table.schema = "tooling".to_string();
    config.table.table = "tools".to_string();
    config.credentials.access_key_id = "AKIDLOCAL".to_string();
    config.credentials.secret_access_key = "local".to_string();
    config.secret.name = "tooling/redshift".to_string();
    config.secret.document = json!({"dbClusterIdentifier": "tooling", "dbname": "dev"});

    let api = Arc::new(InMemoryDataApi::new());
    let service = ToolService::from_config(&config, api.clone());
    let router = HttpServer::new(HttpServerConfig::default(), service).router();
    (router, api)
}

fn router() -> (Router, Arc<InMemoryDataApi>) {
    router_with_prefix("/csp-tooling-lambda1")
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// =============================================================================
// Routes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_health() {
    let (router, api) = router();
    let (status, body) = call(&router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert!(api.submitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_over_http() {
    let (router, _api) = router();

    let (status, body) = call(
        &router,
        Method::POST,
        "/csp-tooling-lambda1/createTool",
        Some(json!({"tool_name": "X", "login": "alice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let k = body["s_no"].as_i64().unwrap();

    let uri = format!("/csp-tooling-lambda1/getTools?s_no={}", k);
    let (status, body) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tool_name"], json!("X"));

    let (status, _) = call(
        &router,
        Method::PUT,
        "/csp-tooling-lambda1/updateTool",
        Some(json!({"s_no": k, "tool_name": "Y"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(
        &router,
        Method::DELETE,
        "/csp-tooling-lambda1/deleteTool",
        Some(json!({"s_no": k})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&router, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NOT_FOUND"));
}

#[tokio::test(start_paused = true)]
async fn test_list_by_login() {
    let (router, _api) = router();
    call(
        &router,
        Method::POST,
        "/csp-tooling-lambda1/createTool",
        Some(json!({"tool_name": "saw", "login": "alice"})),
    )
    .await;

    let (status, body) = call(
        &router,
        Method::GET,
        "/csp-tooling-lambda1/getTools?login=bob",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"total_count": 0, "records": []}));

    let (_, body) = call(
        &router,
        Method::GET,
        "/csp-tooling-lambda1/getTools?login=alice",
        None,
    )
    .await;
    assert_eq!(body["total_count"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_body_is_bad_request() {
    let (router, api) = router();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/csp-tooling-lambda1/createTool")
        .body(Body::from("{not json"))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(api.submitted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_non_integer_key_is_bad_request() {
    let (router, _api) = router();
    let (status, body) = call(
        &router,
        Method::GET,
        "/csp-tooling-lambda1/getTools?s_no=abc",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("INPUT_ERROR"));
}

#[tokio::test(start_paused = true)]
async fn test_routes_outside_prefix_are_not_found() {
    let (router, _api) = router();
    let (status, _) = call(&router, Method::GET, "/getTools", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_root_prefix() {
    let (router, _api) = router_with_prefix("");
    let (status, body) = call(&router, Method::GET, "/getTools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_count"], json!(0));
}
