//! Tool record store
//!
//! Statement shapes, sequence allocation and the CRUD state machine on
//! top of [`crate::dataapi`].

pub mod allocator;
pub mod errors;
pub mod fields;
pub mod orchestrator;
pub mod sql;

pub use allocator::{AllocationError, SequenceAllocator};
pub use errors::{ErrorBody, StoreError, StoreResult};
pub use fields::{is_valid_identifier, parse_key, parse_key_str, FieldSet};
pub use orchestrator::{record_key, Listing, ToolStore};
pub use sql::{quote_identifier, ParamBinder, TableLayout};
