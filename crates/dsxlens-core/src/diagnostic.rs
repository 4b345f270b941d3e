//! Integrity issue codes and severities
//!
//! IMPORTANT: Issue codes are versioned and stable.
//! NEVER rename or remove codes - they are part of the public API.
//! Add new codes with new names only.

use serde::{Deserialize, Serialize};

/// Integrity issue code registry (v1)
///
/// These codes are STABLE and VERSIONED.
/// Do NOT rename or remove codes - only add new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    /// Declared length/precision differs between job and database
    LengthMismatch,

    /// Type family differs between job and database
    TypeMismatch,

    /// Nullability differs between job and database
    NullabilityMismatch,

    /// A uniqueness guarantee the job depends on is missing or being dropped
    KeyViolation,

    /// The job declares a column the table does not have
    MissingColumn,

    /// A key column is written through TRIM/UPPER, which can collapse distinct keys
    KeyTransform,
}

impl IssueKind {
    /// Get the issue code as a stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LengthMismatch => "LENGTH_MISMATCH",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::NullabilityMismatch => "NULLABILITY_MISMATCH",
            Self::KeyViolation => "KEY_VIOLATION",
            Self::MissingColumn => "MISSING_COLUMN",
            Self::KeyTransform => "KEY_TRANSFORM",
        }
    }
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Issue severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Should be reviewed, does not stop a schema change
    Warning,

    /// Stops DDL planning until resolved
    Blocking,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Blocking => write!(f, "blocking"),
        }
    }
}

/// Severity of an event extracted from diagnostic text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Location of a finding inside an export document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Job name
    pub job: String,

    /// Record path inside the job (e.g. `DSRECORD[2]/DSSUBRECORD[0]`)
    pub record_path: String,

    /// Optional line number (1-indexed, relative to the job block)
    pub line: Option<usize>,
}

impl Location {
    /// Create a new location without a line number
    pub fn new(job: impl Into<String>, record_path: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            record_path: record_path.into(),
            line: None,
        }
    }

    /// Create a location with a line number
    pub fn with_line(job: impl Into<String>, record_path: impl Into<String>, line: usize) -> Self {
        Self {
            job: job.into(),
            record_path: record_path.into(),
            line: Some(line),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{} (line {})", self.job, self.record_path, line),
            None => write!(f, "{}:{}", self.job, self.record_path),
        }
    }
}

/// A physical-vs-logical schema consistency finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Table the issue was found on (display form, e.g. `ERP.ORDERS`)
    pub table: String,

    /// Column the issue was found on
    pub column: String,

    /// Severity level
    pub severity: Severity,

    /// Stable issue code
    pub kind: IssueKind,

    /// Human-readable detail
    pub detail: String,

    /// Value declared by the job (for comparison issues)
    pub job_value: Option<String>,

    /// Value found in the database (for comparison issues)
    pub physical_value: Option<String>,

    /// Suggested remediation
    pub recommendation: Option<String>,

    /// Where the job declares the column (best-effort)
    pub location: Option<Location>,
}

impl IntegrityIssue {
    /// Create a new issue with minimal fields
    pub fn new(
        kind: IssueKind,
        severity: Severity,
        table: impl Into<String>,
        column: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            severity,
            kind,
            detail: detail.into(),
            job_value: None,
            physical_value: None,
            recommendation: None,
            location: None,
        }
    }

    /// Set job/physical comparison values
    pub fn with_comparison(mut self, job: impl Into<String>, physical: impl Into<String>) -> Self {
        self.job_value = Some(job.into());
        self.physical_value = Some(physical.into());
        self
    }

    /// Set a recommendation
    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    /// Set the location
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}
