//! Report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use serde::{Deserialize, Serialize};
use crate::diagnostic::{IntegrityIssue, Severity};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Summary statistics for a report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Total number of issues
    pub total: usize,

    /// Number of blocking issues
    pub blocking: usize,

    /// Number of warnings
    pub warnings: usize,

    /// Number of jobs inspected
    pub jobs_checked: usize,

    /// Number of physical tables compared
    pub tables_checked: usize,
}

/// Validation report (report.json v1)
///
/// This is the stable output format.
/// All fields are versioned and backward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Schema version
    pub version: ReportVersion,

    /// Timestamp (ISO 8601)
    pub timestamp: String,

    /// Summary statistics
    pub summary: ReportSummary,

    /// All integrity issues
    pub issues: Vec<IntegrityIssue>,

    /// Command-specific payload (impact edges, DDL plan, error events)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Report {
    /// Create a new empty report
    pub fn new() -> Self {
        Self {
            version: ReportVersion::CURRENT,
            timestamp: chrono::Utc::now().to_rfc3339(),
            summary: ReportSummary::default(),
            issues: Vec::new(),
            metadata: None,
        }
    }

    /// Create a report from issues
    pub fn from_issues(issues: Vec<IntegrityIssue>) -> Self {
        let mut report = Self::new();
        for issue in issues {
            report.add_issue(issue);
        }
        report
    }

    /// Add an issue to the report
    pub fn add_issue(&mut self, issue: IntegrityIssue) {
        match issue.severity {
            Severity::Blocking => self.summary.blocking += 1,
            Severity::Warning => self.summary.warnings += 1,
        }

        self.summary.total += 1;
        self.issues.push(issue);
    }

    /// Attach a command-specific payload
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Check if the report has any blocking issues
    pub fn has_blocking(&self) -> bool {
        self.summary.blocking > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::IssueKind;

    #[test]
    fn empty_report() {
        let report = Report::new();
        assert_eq!(report.version, ReportVersion::CURRENT);
        assert_eq!(report.summary.total, 0);
        assert!(!report.has_blocking());
    }

    #[test]
    fn report_with_issues() {
        let issues = vec![
            IntegrityIssue::new(IssueKind::LengthMismatch, Severity::Blocking, "ERP.ORDERS", "ORDER_NO", "trimming"),
            IntegrityIssue::new(IssueKind::NullabilityMismatch, Severity::Warning, "ERP.ORDERS", "NOTE", "nullable"),
        ];

        let report = Report::from_issues(issues);
        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.blocking, 1);
        assert_eq!(report.summary.warnings, 1);
        assert!(report.has_blocking());
    }

    #[test]
    fn report_serialization() {
        let report = Report::new().with_metadata(serde_json::json!({ "edges": [] }));
        let json = report.to_json().unwrap();
        assert!(json.contains("\"version\""));
        assert!(json.contains("\"issues\""));
        assert!(json.contains("\"edges\""));
    }
}
