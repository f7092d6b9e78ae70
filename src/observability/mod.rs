//! Observability for toolstore
//!
//! Structured logging through `tracing`. Every event carries a typed
//! [`Event`] name in its `event` field.
//!
//! # Usage
//!
//! ```ignore
//! use toolstore::observability::Event;
//!
//! tracing::info!(event = Event::RecordCreated.as_str(), s_no = 7, "record created");
//! ```

mod events;
pub mod logging;

pub use events::Event;
pub use logging::{init_logging, LogFormat, LoggingError};
