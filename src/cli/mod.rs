//! CLI module for toolstore
//!
//! Provides command-line interface for:
//! - serve: run the HTTP server
//! - invoke: handle one gateway event from stdin

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{invoke, run, run_command, serve};
pub use errors::{CliError, CliResult};
pub use io::{read_event, read_event_from, write_json};
