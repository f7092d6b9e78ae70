//! CLI argument definitions using clap
//!
//! Commands:
//! - toolstore serve --config <path> [--port N] [--in-memory]
//! - toolstore invoke --config <path> [--in-memory]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Tool registry over a remote SQL statement service
#[derive(Parser, Debug)]
#[command(name = "toolstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the tool operations over HTTP
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        /// Overrides `http.port`
        #[arg(long)]
        port: Option<u16>,

        /// Use the in-process simulated statement service
        #[arg(long)]
        in_memory: bool,
    },

    /// Handle one gateway event read from stdin and exit
    Invoke {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        /// Use the in-process simulated statement service
        #[arg(long)]
        in_memory: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_flags() {
        let cli = Cli::try_parse_from([
            "toolstore", "serve", "--config", "svc.json", "--port", "9000", "--in-memory",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                config,
                port,
                in_memory,
            } => {
                assert_eq!(config, PathBuf::from("svc.json"));
                assert_eq!(port, Some(9000));
                assert!(in_memory);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invoke_defaults() {
        let cli = Cli::try_parse_from(["toolstore", "invoke"]).unwrap();
        match cli.command {
            Command::Invoke { config, in_memory } => {
                assert_eq!(config, PathBuf::from("./toolstore.json"));
                assert!(!in_memory);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
