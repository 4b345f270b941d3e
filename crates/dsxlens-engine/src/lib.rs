//! dsxlens engine - dependency analysis and schema-safe changes
//!
//! This crate implements the analysis and change logic on top of parsed exports:
//! - Reverse dependency index from physical objects to job records
//! - Scoped value rewrites producing copy-on-write revisions
//! - Job-vs-database integrity validation gating schema changes
//! - Ordered DDL planning with per-step preconditions
//! - SQLSTATE classification of diagnostic text
//! - Multi-level impact tracing through job data flow

pub mod index;
pub mod metadata;
pub mod mutator;
pub mod integrity;
pub mod ddl;
pub mod classifier;
pub mod lineage;

pub use index::{Confidence, DependencyEdge, DependencyIndex, IndexOptions, SharedIndex};
pub use metadata::FromDocument;
pub use mutator::{
    apply, plan_column_deletion, plan_replacement, BackupCopy, ChangelogEntry, DeletionAdvisory, MutateError,
    MutationOutcome, ReplacementRequest,
};
pub use integrity::{validate, validate_change, ValidatedChange, ValidationBlocked, ValidationGate};
pub use ddl::{DdlExecution, DdlPhase, DdlPlan, DdlPlanner, DdlStep, PreconditionFailed, StepOutcome};
pub use classifier::{summarize, ErrorCategory, ErrorClassifier, ErrorEvent, ErrorGroup, ErrorSummary, KILLED_CODE};
pub use lineage::{trace_impact, ImpactLevel, JobImpact};
