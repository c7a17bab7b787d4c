//! Domain module - token records and payload shapes
//!
//! Everything here is pure: no I/O, no locking. The application layer
//! composes these pieces into the accumulator and the orchestrator.

pub mod extract;
pub mod token;

pub use extract::{Extraction, PayloadError, decode_payload, extract_records};
pub use token::{IDENTIFIER_FIELDS, Identifier, Record, record_identifier};
