//! CLI command implementations
//!
//! Both commands load the configuration once, install logging, and build
//! one [`ToolService`] that everything else borrows from.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::api::ToolService;
use crate::config::ServiceConfig;
use crate::dataapi::{DataApiClient, InMemoryDataApi, RedshiftDataClient};
use crate::http_server::HttpServer;
use crate::observability::{init_logging, Event};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_event, write_json};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Serve {
            config,
            port,
            in_memory,
        } => serve(&config, port, in_memory),
        Command::Invoke { config, in_memory } => invoke(&config, in_memory),
    }
}

/// Run the HTTP server until the process is stopped.
pub fn serve(config_path: &Path, port: Option<u16>, in_memory: bool) -> CliResult<()> {
    let (mut config, service) = prepare(config_path, in_memory)?;
    if let Some(port) = port {
        config.http.port = port;
    }

    let server = HttpServer::new(config.http.clone(), service);
    runtime()?.block_on(async {
        server
            .start()
            .await
            .map_err(|e| CliError::BootFailed(format!("HTTP server failed: {}", e)))
    })
}

/// Handle one event from stdin and write the response envelope to stdout.
pub fn invoke(config_path: &Path, in_memory: bool) -> CliResult<()> {
    let (_, service) = prepare(config_path, in_memory)?;
    let event = read_event()?;

    let response = runtime()?.block_on(service.handle_event(&event));
    write_json(&response)
}

fn prepare(config_path: &Path, in_memory: bool) -> CliResult<(ServiceConfig, ToolService)> {
    let mut config = ServiceConfig::load(config_path)?;
    if in_memory {
        apply_local_defaults(&mut config);
    }
    init_logging(&config.logging)?;

    info!(
        event = Event::ConfigLoaded.as_str(),
        path = %config_path.display(),
        schema = %config.table.schema,
        table = %config.table.table,
        in_memory,
        "configuration loaded"
    );

    let client: Arc<dyn DataApiClient> = if in_memory {
        Arc::new(InMemoryDataApi::new())
    } else {
        Arc::new(RedshiftDataClient::new(
            config.data_api.endpoint.clone(),
            config.data_api.request_timeout(),
        ))
    };

    let service = ToolService::from_config(&config, client);
    Ok((config, service))
}

/// Placeholder credentials and secret for the simulated service, where
/// the configuration leaves them unset.
fn apply_local_defaults(config: &mut ServiceConfig) {
    if config.credentials.access_key_id.is_empty() {
        config.credentials.access_key_id = "local".to_string();
        config.credentials.secret_access_key = "local".to_string();
    }
    if config.secret.name.is_empty() {
        config.secret.name = "local".to_string();
    }
    if config.secret.document.is_null() {
        config.secret.document = json!({"dbClusterIdentifier": "local", "dbname": "dev"});
    }
}

fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new()
        .map_err(|e| CliError::BootFailed(format!("Failed to create tokio runtime: {}", e)))
}
