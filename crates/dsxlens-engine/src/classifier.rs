//! SQLSTATE classification of job logs and other diagnostic text
//!
//! Each line is searched for a SQLSTATE code and for signs of a killed
//! process. Severity and category come from the two-character class of the
//! code, so unknown codes of a known class still classify sensibly.

use chrono::NaiveDateTime;
use dsxlens_core::{ClassifierConfig, EventSeverity};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static SQLSTATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i:sql\s?state)[\s=:\[]*([0-9A-Z]{5})\b").expect("SQLSTATE pattern is valid")
});

static KILL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:SIGKILL|killed|signal\s+\d+)\b").expect("kill pattern is valid"));

static ISO_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2})[ T](\d{2}:\d{2}:\d{2})").expect("timestamp pattern is valid")
});

static US_TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{2}/\d{2}/\d{4})\s+(\d{2}:\d{2}:\d{2})").expect("timestamp pattern is valid")
});

static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\btable\s+['"\[]?(\w+\.\w+)"#).expect("table pattern is valid"));

static COLUMN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bcolumn\s+['"\[]?(\w+)"#).expect("column pattern is valid"));

/// Code given to killed-process events
pub const KILLED_CODE: &str = "SIGKILL";

/// Broad cause of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Success,
    Warning,
    Connection,
    DataException,
    IntegrityConstraint,
    TransactionRollback,
    SyntaxOrAccess,
    InsufficientResources,
    OperatorIntervention,
    SystemError,
    Driver,
    ProcessKilled,
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Connection => "connection",
            Self::DataException => "data exception",
            Self::IntegrityConstraint => "integrity constraint",
            Self::TransactionRollback => "transaction rollback",
            Self::SyntaxOrAccess => "syntax or access rule",
            Self::InsufficientResources => "insufficient resources",
            Self::OperatorIntervention => "operator intervention",
            Self::SystemError => "system error",
            Self::Driver => "driver",
            Self::ProcessKilled => "process killed",
            Self::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// Static class table: SQLSTATE class -> category and default severity
fn class_entry(class: &str) -> (ErrorCategory, EventSeverity) {
    match class {
        "00" => (ErrorCategory::Success, EventSeverity::Info),
        "01" => (ErrorCategory::Warning, EventSeverity::Warning),
        "08" => (ErrorCategory::Connection, EventSeverity::Critical),
        "22" => (ErrorCategory::DataException, EventSeverity::Error),
        "23" => (ErrorCategory::IntegrityConstraint, EventSeverity::Error),
        "40" => (ErrorCategory::TransactionRollback, EventSeverity::Error),
        "42" => (ErrorCategory::SyntaxOrAccess, EventSeverity::Error),
        "53" => (ErrorCategory::InsufficientResources, EventSeverity::Critical),
        "57" => (ErrorCategory::OperatorIntervention, EventSeverity::Critical),
        "58" => (ErrorCategory::SystemError, EventSeverity::Critical),
        "HY" | "IM" => (ErrorCategory::Driver, EventSeverity::Error),
        _ => (ErrorCategory::Unknown, EventSeverity::Error),
    }
}

/// Known codes with a description and what to check
fn known_code(code: &str) -> Option<(&'static str, &'static [&'static str])> {
    let entry: (&'static str, &'static [&'static str]) = match code {
        "23505" => (
            "unique constraint violation",
            &[
                "look for duplicate keys in the source data",
                "check whether key columns are trimmed before the load",
                "check the job's de-duplication logic",
            ],
        ),
        "23503" => (
            "foreign key constraint violation",
            &[
                "check that referenced rows exist",
                "check the order in which tables are loaded",
            ],
        ),
        "22001" => (
            "string data right truncated",
            &[
                "compare the job link length with the column length",
                "widen the column or truncate values in the job",
            ],
        ),
        "22003" => (
            "numeric value out of range",
            &["compare the job precision with the column precision"],
        ),
        "42S02" => (
            "base table or view not found",
            &["check the table name and schema the job uses"],
        ),
        "42S22" => ("column not found", &["check the column names the job uses"]),
        KILLED_CODE => (
            "process killed",
            &[
                "check memory and CPU on the engine host",
                "check the job's run time and data volume",
            ],
        ),
        _ => return None,
    };
    Some(entry)
}

/// One error found in diagnostic text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    /// 1-based line the event was found on
    pub line: usize,

    pub timestamp: Option<NaiveDateTime>,

    /// SQLSTATE code, or [`KILLED_CODE`]
    pub code: String,

    pub category: ErrorCategory,
    pub severity: EventSeverity,

    /// Description of a well-known code
    pub description: Option<String>,

    /// Table named in the message (`schema.table`)
    pub table: Option<String>,

    pub column: Option<String>,

    /// Trimmed source line
    pub message: String,
}

impl ErrorEvent {
    /// Two-character SQLSTATE class; empty for killed processes
    pub fn class(&self) -> &str {
        if self.code == KILLED_CODE {
            ""
        } else {
            self.code.get(..2).unwrap_or_default()
        }
    }

    pub fn recommendations(&self) -> &'static [&'static str] {
        known_code(&self.code).map(|(_, advice)| advice).unwrap_or_default()
    }
}

fn timestamp_of(line: &str) -> Option<NaiveDateTime> {
    if let Some(caps) = ISO_TIMESTAMP_RE.captures(line) {
        let text = format!("{} {}", &caps[1], &caps[2]);
        if let Ok(timestamp) = NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
            return Some(timestamp);
        }
    }
    let caps = US_TIMESTAMP_RE.captures(line)?;
    let text = format!("{} {}", &caps[1], &caps[2]);
    NaiveDateTime::parse_from_str(&text, "%m/%d/%Y %H:%M:%S").ok()
}

fn capture(re: &Regex, line: &str) -> Option<String> {
    re.captures(line).map(|caps| caps[1].to_string())
}

/// Extracts [`ErrorEvent`]s from log text
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    config: ClassifierConfig,
}

impl ErrorClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    fn severity(&self, code: &str, class: &str, default: EventSeverity) -> EventSeverity {
        self.config
            .override_for(code)
            .or_else(|| self.config.override_for(class))
            .unwrap_or(default)
    }

    /// Every event in `text`, in line order
    ///
    /// Lines without a recognisable code are skipped; a line can yield both
    /// a SQLSTATE event and a killed-process event.
    pub fn classify(&self, text: &str) -> Vec<ErrorEvent> {
        let mut events = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let sqlstate = SQLSTATE_RE.captures(line).map(|caps| caps[1].to_string());
            let killed = KILL_RE.is_match(line);
            if sqlstate.is_none() && !killed {
                continue;
            }

            let timestamp = timestamp_of(line);
            let message = line.trim().to_string();

            if let Some(code) = sqlstate {
                let class = &code[..2];
                let (category, default) = class_entry(class);
                events.push(ErrorEvent {
                    line: index + 1,
                    timestamp,
                    severity: self.severity(&code, class, default),
                    category,
                    description: known_code(&code).map(|(description, _)| description.to_string()),
                    table: capture(&TABLE_RE, line),
                    column: capture(&COLUMN_RE, line),
                    message: message.clone(),
                    code,
                });
            }

            if killed {
                events.push(ErrorEvent {
                    line: index + 1,
                    timestamp,
                    code: KILLED_CODE.to_string(),
                    category: ErrorCategory::ProcessKilled,
                    severity: self.severity(KILLED_CODE, KILLED_CODE, EventSeverity::Critical),
                    description: known_code(KILLED_CODE).map(|(description, _)| description.to_string()),
                    table: None,
                    column: None,
                    message,
                });
            }
        }

        tracing::debug!(events = events.len(), "classified diagnostic text");
        events
    }
}

/// Events sharing a code and table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorGroup {
    pub code: String,
    pub table: Option<String>,
    pub count: usize,

    /// Line of the first occurrence
    pub first_line: usize,
}

/// Counts and affected objects over a set of events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_code: BTreeMap<String, usize>,
    pub by_category: BTreeMap<ErrorCategory, usize>,
    pub by_severity: BTreeMap<EventSeverity, usize>,
    pub tables: BTreeSet<String>,
    pub columns: BTreeSet<String>,

    /// Groups in order of first occurrence
    pub groups: Vec<ErrorGroup>,

    /// Overall advice for what was found
    pub recommendations: Vec<String>,
}

impl ErrorSummary {
    pub fn critical(&self) -> usize {
        self.by_severity.get(&EventSeverity::Critical).copied().unwrap_or(0)
    }

    /// Groups seen more than once
    pub fn repeated(&self) -> impl Iterator<Item = &ErrorGroup> {
        self.groups.iter().filter(|g| g.count > 1)
    }
}

/// Group events by code and category and collect affected objects
pub fn summarize(events: &[ErrorEvent]) -> ErrorSummary {
    let mut summary = ErrorSummary {
        total: events.len(),
        ..ErrorSummary::default()
    };

    for event in events {
        *summary.by_code.entry(event.code.clone()).or_default() += 1;
        *summary.by_category.entry(event.category).or_default() += 1;
        *summary.by_severity.entry(event.severity).or_default() += 1;
        summary.tables.extend(event.table.clone());
        summary.columns.extend(event.column.clone());

        match summary
            .groups
            .iter_mut()
            .find(|g| g.code == event.code && g.table == event.table)
        {
            Some(group) => group.count += 1,
            None => summary.groups.push(ErrorGroup {
                code: event.code.clone(),
                table: event.table.clone(),
                count: 1,
                first_line: event.line,
            }),
        }
    }

    if summary.critical() > 0 {
        summary
            .recommendations
            .push(format!("{} critical event(s) need immediate attention", summary.critical()));
    }
    if summary.by_code.contains_key("23505") {
        summary
            .recommendations
            .push("unique key violations: check de-duplication and key column transformations in the job".into());
    }
    if summary.by_code.contains_key("22001") {
        summary
            .recommendations
            .push("truncation: compare job link lengths with database column lengths".into());
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn duplicate_key_is_integrity_error() {
        let events = ErrorClassifier::default().classify("SQLSTATE 23505: duplicate key value violates unique constraint");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, "23505");
        assert_eq!(events[0].class(), "23");
        assert_eq!(events[0].category, ErrorCategory::IntegrityConstraint);
        assert_eq!(events[0].severity, EventSeverity::Error);
        assert_eq!(events[0].description.as_deref(), Some("unique constraint violation"));
        assert_eq!(events[0].recommendations().len(), 3);
    }

    #[test]
    fn code_spellings() {
        let text = "\
[SQLSTATE 08001] cannot connect
ODBC error SQLSTATE=42S02 on table ERP.ORDERS_OLD
SQL state: HY000 general error
sqlstate:22001 value too long for column ORDER_NO in table 'ERP.ORDERS'
SQL state: error without code
";
        let events = ErrorClassifier::default().classify(text);
        let codes: Vec<(&str, usize, ErrorCategory)> =
            events.iter().map(|e| (e.code.as_str(), e.line, e.category)).collect();
        assert_eq!(
            codes,
            vec![
                ("08001", 1, ErrorCategory::Connection),
                ("42S02", 2, ErrorCategory::SyntaxOrAccess),
                ("HY000", 3, ErrorCategory::Driver),
                ("22001", 4, ErrorCategory::DataException),
            ]
        );
        assert_eq!(events[0].severity, EventSeverity::Critical);
        assert_eq!(events[1].table.as_deref(), Some("ERP.ORDERS_OLD"));
        assert_eq!(events[3].table.as_deref(), Some("ERP.ORDERS"));
        assert_eq!(events[3].column.as_deref(), Some("ORDER_NO"));
    }

    #[test]
    fn killed_processes_and_timestamps() {
        let text = "\
2024-03-01 02:15:07 LOAD_ORDERS: process killed by signal 9
03/01/2024 02:16:00 Player 3 terminated unexpectedly
[2024-03-01T02:17:30] SIGKILL received
";
        let events = ErrorClassifier::default().classify(text);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.code == KILLED_CODE && e.severity == EventSeverity::Critical));
        assert_eq!(events[0].timestamp.unwrap().to_string(), "2024-03-01 02:15:07");
        assert_eq!(events[1].line, 3);
        assert_eq!(events[1].timestamp.unwrap().to_string(), "2024-03-01 02:17:30");
    }

    #[test]
    fn us_timestamp_is_read() {
        let events = ErrorClassifier::default().classify("03/01/2024 02:16:00 SQLSTATE 40001 deadlock");
        assert_eq!(events[0].timestamp.unwrap().to_string(), "2024-03-01 02:16:00");
        assert_eq!(events[0].category, ErrorCategory::TransactionRollback);
    }

    #[test]
    fn class_overrides_apply() {
        let mut config = ClassifierConfig::default();
        config.set_override("23", EventSeverity::Critical);
        config.set_override("01004", EventSeverity::Error);
        let classifier = ErrorClassifier::new(config);

        let events = classifier.classify("SQLSTATE 23503 fk\nSQLSTATE 01004 truncated\nSQLSTATE 01000 note\n");
        let severities: Vec<EventSeverity> = events.iter().map(|e| e.severity).collect();
        assert_eq!(
            severities,
            vec![EventSeverity::Critical, EventSeverity::Error, EventSeverity::Warning]
        );
    }

    #[test]
    fn summary_groups_repeats() {
        let text = "\
SQLSTATE 23505 duplicate in table ERP.ORDERS
SQLSTATE 23505 duplicate in table ERP.ORDERS
SQLSTATE 23505 duplicate in table ERP.ITEMS
SQLSTATE 22001 too long for column NOTE in table ERP.ORDERS
Killed
";
        let summary = summarize(&ErrorClassifier::default().classify(text));

        assert_eq!(summary.total, 5);
        assert_eq!(summary.by_code["23505"], 3);
        assert_eq!(summary.by_category[&ErrorCategory::IntegrityConstraint], 3);
        assert_eq!(summary.critical(), 1);
        assert_eq!(
            summary.tables.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["ERP.ITEMS", "ERP.ORDERS"]
        );
        assert!(summary.columns.contains("NOTE"));

        let repeated: Vec<&ErrorGroup> = summary.repeated().collect();
        assert_eq!(repeated.len(), 1);
        assert_eq!(repeated[0].count, 2);
        assert_eq!(repeated[0].first_line, 1);
        assert_eq!(summary.groups.len(), 4);
        assert_eq!(summary.recommendations.len(), 3);
    }

    #[test]
    fn plain_text_yields_nothing() {
        assert!(ErrorClassifier::default().classify("job finished\n\nrows written: 120").is_empty());
        assert_eq!(summarize(&[]), ErrorSummary::default());
    }
}
