//! Chatvault import crate - text export parser and working set producer.
//!
//! Detects the line format of a chat export from its first line, parses
//! every line into timestamp, sender and payload, and builds a
//! `WorkingSet` whose entities carry runtime ids only.

pub mod error;
pub mod importer;
pub mod parser;

pub use error::ImportError;
pub use importer::{import_from_file, import_from_reader, ImportOptions};
pub use parser::{Attachment, DateLayout, LineFormat, ParsedLine, Payload, Platform};
