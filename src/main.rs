//! toolstore CLI entry point
//!
//! Parses arguments and dispatches through `cli::run`; prints the error
//! to stderr and exits non-zero on failure.

use toolstore::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}: {}", e.code(), e);
        std::process::exit(1);
    }
}
