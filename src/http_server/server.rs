//! # HTTP Server
//!
//! Serves the tool operations under the configured route prefix, plus
//! `/health` at the root.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::HttpServerConfig;
use super::health_routes::health_routes;
use super::tool_routes::tool_routes;
use crate::api::ToolService;
use crate::observability::Event;

/// HTTP server for the tool API
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, service: ToolService) -> Self {
        let router = Self::build_router(&config, Arc::new(service));
        Self { config, router }
    }

    fn build_router(config: &HttpServerConfig, service: Arc<ToolService>) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(config.allow_origin())
            .allow_methods(Any)
            .allow_headers(Any);

        let prefix = service.route_prefix().trim_end_matches('/').to_string();
        let tools = tool_routes(service);

        let router = Router::new().merge(health_routes());
        let router = if prefix.is_empty() {
            router.merge(tools)
        } else {
            router.nest(&prefix, tools)
        };

        router.layer(TraceLayer::new_for_http()).layer(cors)
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Binds and serves until the process is stopped.
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.bind_addr().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address {}: {}", self.config.socket_addr(), e),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        info!(
            event = Event::Serving.as_str(),
            addr = %addr,
            "tool API listening"
        );
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}
