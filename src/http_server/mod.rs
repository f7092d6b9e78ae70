//! # HTTP Server Module
//!
//! Axum server exposing the tool operations.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `{prefix}/getTools` - GET, `?s_no=` or `?login=` or neither
//! - `{prefix}/createTool` - POST
//! - `{prefix}/updateTool` - POST, PUT or PATCH
//! - `{prefix}/deleteTool` - POST or DELETE

pub mod config;
pub mod health_routes;
pub mod server;
pub mod tool_routes;

pub use config::HttpServerConfig;
pub use server::HttpServer;
