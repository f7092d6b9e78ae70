//! JSON I/O for `invoke`
//!
//! - Input: one gateway event, the whole of stdin
//! - Output: one JSON object on stdout
//!
//! Logs go to stderr, so stdout carries only the response.

use std::io::{self, Read, Write};

use serde::Serialize;

use super::errors::{CliError, CliResult};
use crate::api::GatewayEvent;

/// Parses an event from `reader`.
pub fn read_event_from<R: Read>(mut reader: R) -> CliResult<GatewayEvent> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;

    if input.trim().is_empty() {
        return Err(CliError::EmptyInput);
    }

    Ok(serde_json::from_str(&input)?)
}

/// Read the event from stdin
pub fn read_event() -> CliResult<GatewayEvent> {
    read_event_from(io::stdin().lock())
}

/// Write a JSON value and a newline to stdout
pub fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, value)?;
    writeln!(stdout)?;
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_event() {
        let input = r#"{"rawPath": "/p/getTools", "queryStringParameters": {"login": "alice"}}"#;
        let event = read_event_from(input.as_bytes()).unwrap();
        assert_eq!(event.raw_path, "/p/getTools");
        assert_eq!(
            event.query_string_parameters.unwrap().get("login").map(String::as_str),
            Some("alice")
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(
            read_event_from("  \n".as_bytes()),
            Err(CliError::EmptyInput)
        ));
    }
}
