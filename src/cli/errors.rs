//! CLI-specific error types
//!
//! All CLI errors are fatal: the process prints the error and exits 1.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::observability::LoggingError;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("logging setup failed: {0}")]
    Logging(#[from] LoggingError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid event JSON: {0}")]
    Event(#[from] serde_json::Error),

    #[error("empty input")]
    EmptyInput,

    #[error("boot failed: {0}")]
    BootFailed(String),
}

impl CliError {
    /// Error code string
    pub fn code(&self) -> &'static str {
        match self {
            CliError::Config(_) => "TOOLSTORE_CLI_CONFIG_ERROR",
            CliError::Logging(_) => "TOOLSTORE_CLI_LOGGING_ERROR",
            CliError::Io(_) | CliError::Event(_) | CliError::EmptyInput => "TOOLSTORE_CLI_IO_ERROR",
            CliError::BootFailed(_) => "TOOLSTORE_CLI_BOOT_FAILED",
        }
    }
}
