//! dsxlens core
//!
//! Core domain model with stable, versioned types shared by every other crate.
//! Never rename issue codes - they are part of the public API.

pub mod diagnostic;
pub mod schema;
pub mod report;
pub mod config;
pub mod hash;

pub use diagnostic::{IntegrityIssue, IssueKind, Severity, EventSeverity, Location};
pub use schema::{
    TypeFamily, PhysicalReference, PhysicalColumn, PhysicalTable, KeyConstraint, ConstraintKind,
    ColumnChange, JobColumn, JobTableMetadata, UsageKind,
};
pub use report::{Report, ReportVersion, ReportSummary};
pub use config::{Config, ConfigError, DialectConfig, SchemaMatchPolicy, Vocabulary, ClassifierConfig};
pub use hash::content_hash;
