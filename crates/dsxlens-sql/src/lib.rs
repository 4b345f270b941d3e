//! SQL fragment analysis
//!
//! This crate handles:
//! - Parsing SQL embedded in job properties using sqlparser-rs
//! - Extracting table and column references (AST first, token scan fallback)
//! - Rewriting table and column names on identifier boundaries

pub mod parser;
pub mod scanner;
pub mod rewrite;

pub use parser::{SqlParser, ParsedSql, SqlParseError, StatementKind};
pub use scanner::{table_reference, SqlScanner, SqlScan, SqlReference, ScanMethod};
pub use rewrite::{rewrite_table, rewrite_column, Rewrite};
