//! Tool HTTP Routes
//!
//! `getTools` reads the query string; the mutating operations take the
//! raw request body, parsed by the shared request layer so that bad JSON
//! is reported the same way over HTTP and through `invoke`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Router,
};

use crate::api::{ApiResponse, ToolOperation, ToolService};

/// Tool operation routes, relative to the configured prefix
pub fn tool_routes(service: Arc<ToolService>) -> Router {
    Router::new()
        .route("/getTools", get(get_tools))
        .route("/createTool", post(create_tool))
        .route(
            "/updateTool",
            post(update_tool).put(update_tool).patch(update_tool),
        )
        .route("/deleteTool", post(delete_tool).delete(delete_tool))
        .with_state(service)
}

async fn get_tools(
    State(service): State<Arc<ToolService>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResponse {
    service
        .dispatch(ToolOperation::GetTools, Some(&params), None)
        .await
}

async fn create_tool(State(service): State<Arc<ToolService>>, body: String) -> ApiResponse {
    service
        .dispatch(ToolOperation::CreateTool, None, Some(&body))
        .await
}

async fn update_tool(State(service): State<Arc<ToolService>>, body: String) -> ApiResponse {
    service
        .dispatch(ToolOperation::UpdateTool, None, Some(&body))
        .await
}

async fn delete_tool(State(service): State<Arc<ToolService>>, body: String) -> ApiResponse {
    service
        .dispatch(ToolOperation::DeleteTool, None, Some(&body))
        .await
}
