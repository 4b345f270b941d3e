//! Job export parsing and storage
//!
//! This crate handles:
//! - Tokenizing and parsing `.dsx` export text into record trees
//! - Byte-exact round-tripping of documents and whole export files
//! - Copy-on-write document revisions
//! - A shared, revision-checked document store

pub mod lexer;
pub mod parser;
pub mod record;
pub mod document;
pub mod revision;
pub mod store;

pub use parser::{parse_documents, DocumentStream, ParseError};
pub use record::{PathStep, Property, PropertyValue, Record, RecordPath, RecordPathError, Span, EncodeError};
pub use document::{ExportFile, ExportHeader, JobDocument, Segment};
pub use revision::{DocumentRevision, Modification};
pub use store::{ConflictError, DocumentStore, LoadOutcome, StoreError};
