//! # Tool API
//!
//! The four tool operations (`getTools`, `createTool`, `updateTool`,
//! `deleteTool`) independent of transport. The HTTP routes and the
//! `invoke` command both go through [`ToolService`].

mod handler;
mod request;
mod response;

pub use handler::ToolService;
pub use request::{GatewayEvent, ToolOperation, ToolRequest};
pub use response::{ApiResponse, GatewayResponse};
