//! toolstore - a tool registry on top of an asynchronous SQL statement service
//!
//! Records live in one remote table. Every operation is a fixed,
//! parameterized statement submitted to the service, polled to a terminal
//! state, and materialized from typed result pages.

pub mod api;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod dataapi;
pub mod http_server;
pub mod observability;
pub mod store;
