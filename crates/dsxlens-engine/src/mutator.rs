//! Scoped value rewrites producing copy-on-write revisions
//!
//! Planning walks a document and proposes [`Modification`]s for one request.
//! Applying splices the re-encoded values into the exact value spans of a
//! copy of the text and re-parses it; the input document is never touched.
//! Column deletions are never planned as modifications, only reported.

use crate::index::{record_column, record_tables, DependencyIndex, DocumentScope, IndexOptions};
use chrono::{DateTime, Utc};
use dsxlens_core::{content_hash, Location, PhysicalReference, SchemaMatchPolicy, Severity};
use dsxlens_export::{DocumentRevision, EncodeError, JobDocument, Modification, ParseError, Record, RecordPath, Span};
use dsxlens_sql::{rewrite_column, rewrite_table};
use serde::Serialize;

/// What to replace across a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplacementRequest {
    /// Rename a table; a changed schema is written where the job states one
    RenameTable { from: PhysicalReference, to: PhysicalReference },

    /// Rename one column of `table`
    RenameColumn { table: PhysicalReference, from: String, to: String },

    /// Swap a connection name, either a whole property value or one `key=value` part of it
    ReplaceConnection { from: String, to: String },
}

impl std::fmt::Display for ReplacementRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RenameTable { from, to } => write!(f, "rename table {from} -> {to}"),
            Self::RenameColumn { table, from, to } => write!(f, "rename column {table}.{from} -> {to}"),
            Self::ReplaceConnection { from, to } => write!(f, "replace connection {from} -> {to}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MutateError {
    #[error("{target} not found in job '{job}'")]
    NotFound { job: String, target: String },

    #[error("conflict at {target} in job '{job}': {detail}")]
    Conflict { job: String, target: String, detail: String },

    #[error("cannot write {target} in job '{job}': {source}")]
    Unencodable {
        job: String,
        target: String,
        #[source]
        source: EncodeError,
    },

    #[error("rewritten job '{job}' no longer parses: {source}")]
    Reparse {
        job: String,
        #[source]
        source: ParseError,
    },
}

/// The pre-mutation text of a job, to be persisted before the revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupCopy {
    pub job: String,

    /// Revision number of the backed-up document
    pub revision: u64,

    pub text: String,

    /// SHA-256 of `text`, hex encoded
    pub hash: String,
}

impl BackupCopy {
    /// Whether `text` still matches the recorded hash
    pub fn verify(&self) -> bool {
        content_hash(&self.text) == self.hash
    }
}

/// One applied modification, for the audit trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangelogEntry {
    pub timestamp: DateTime<Utc>,
    pub job: String,
    pub record_path: RecordPath,
    pub property: String,

    /// Line of the property in the base document
    pub line: usize,

    pub old_value: String,
    pub new_value: String,
}

impl std::fmt::Display for ChangelogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} (line {}): '{}' -> '{}'",
            self.timestamp.to_rfc3339(),
            self.job,
            self.record_path,
            self.property,
            self.line,
            self.old_value,
            self.new_value
        )
    }
}

/// Result of a successful [`apply`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    pub revision: DocumentRevision,
    pub backup: BackupCopy,

    /// One entry per applied modification
    pub changelog: Vec<ChangelogEntry>,
}

/// Report for a column deletion request; never applied automatically
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletionAdvisory {
    pub job: String,
    pub reference: PhysicalReference,
    pub severity: Severity,
    pub locations: Vec<Location>,
    pub message: String,
}

struct Planner<'a> {
    options: &'a IndexOptions,
    planned: Vec<Modification>,
}

impl Planner<'_> {
    fn propose(&mut self, path: &RecordPath, property: &str, old_value: String, new_value: String) {
        if old_value == new_value {
            return;
        }
        let modification = Modification::new(path.clone(), property, old_value, new_value);
        match self.planned.iter().find(|m| m.same_target(&modification)) {
            Some(existing) if existing.new_value != modification.new_value => {
                tracing::warn!(
                    record = %path,
                    property,
                    kept = %existing.new_value,
                    dropped = %modification.new_value,
                    "conflicting proposals for one property; keeping the first"
                );
            }
            Some(_) => {}
            None => self.planned.push(modification),
        }
    }

    /// Whether bare names in this record's SQL may mean `table`
    fn unqualified_allowed(&self, scope: &DocumentScope<'_>, path: &RecordPath, table: &PhysicalReference) -> bool {
        if self.options.schema_match == SchemaMatchPolicy::Recall || !table.is_qualified() {
            return true;
        }
        scope
            .table_scope(path, &self.options.vocabulary)
            .map(|(_, declared)| declared.schema_key() == table.schema_key())
            .unwrap_or(false)
    }

    fn sql_properties<'r>(&self, record: &'r Record) -> Vec<(&'r str, String)> {
        if !self.options.rewrite_sql {
            return Vec::new();
        }
        record
            .properties
            .iter()
            .filter(|p| self.options.vocabulary.is_sql_property(&p.name))
            .map(|p| (p.name.as_str(), p.value.as_text()))
            .collect()
    }

    fn rename_table(
        &mut self,
        scope: &DocumentScope<'_>,
        path: &RecordPath,
        record: &Record,
        from: &PhysicalReference,
        to: &PhysicalReference,
    ) {
        let options = self.options;
        let vocabulary = &options.vocabulary;
        let schema_property = record.properties.iter().find(|p| vocabulary.is_schema_property(&p.name));
        let tables = record_tables(record, vocabulary);

        // Another table in this record takes its schema from the same property
        let schema_shared = tables
            .iter()
            .any(|(found, property)| !options.table_matches(found, from) && !property.value.as_text().contains('.'));

        let mut schema_changes = Vec::new();
        let mut table_changes = Vec::new();
        for (found, property) in tables {
            if !options.table_matches(&found, from) {
                continue;
            }

            let text = property.value.as_text();
            if text.contains('.') {
                let rewrite = rewrite_table(&text, from, to, false);
                let new_text = if rewrite.changed() {
                    rewrite.text
                } else {
                    // `from` was unqualified; keep the schema written in the value
                    let schema = to.schema.clone().or(found.schema.clone()).unwrap_or_default();
                    format!("{}.{}", schema, to.table)
                };
                table_changes.push((property.name.clone(), text, new_text));
            } else {
                match (schema_property, to.schema.as_deref(), found.is_qualified()) {
                    (Some(_), Some(new_schema), true)
                        if schema_shared && !found.schema.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(new_schema)) =>
                    {
                        table_changes.push((property.name.clone(), text, format!("{}.{}", new_schema, to.table)));
                    }
                    (Some(schema_property), Some(new_schema), true) => {
                        table_changes.push((property.name.clone(), text, to.table.clone()));
                        schema_changes.push((
                            schema_property.name.clone(),
                            schema_property.value.as_text(),
                            new_schema.to_string(),
                        ));
                    }
                    _ => table_changes.push((property.name.clone(), text, to.table.clone())),
                }
            }
        }

        for (property, old, new) in schema_changes.into_iter().chain(table_changes) {
            self.propose(path, &property, old, new);
        }

        let include_unqualified = self.unqualified_allowed(scope, path, from);
        for (property, sql) in self.sql_properties(record) {
            let rewrite = rewrite_table(&sql, from, to, include_unqualified);
            if rewrite.changed() {
                self.propose(path, property, sql, rewrite.text);
            }
        }
    }

    fn rename_column(
        &mut self,
        scope: &DocumentScope<'_>,
        path: &RecordPath,
        record: &Record,
        table: &PhysicalReference,
        from: &str,
        to: &str,
    ) {
        let options = self.options;
        let vocabulary = &options.vocabulary;

        if let Some(property) = record_column(record, vocabulary) {
            let name = property.value.as_text();
            let in_scope = scope
                .table_scope(path, vocabulary)
                .map(|(_, declared)| options.table_matches(&declared, table))
                .unwrap_or(false);
            if in_scope && name.trim().eq_ignore_ascii_case(from) {
                let property = property.name.clone();
                self.propose(path, &property, name, to.to_string());
            }
        }

        let include_unqualified = self.unqualified_allowed(scope, path, table);
        for (property, sql) in self.sql_properties(record) {
            let rewrite = rewrite_column(&sql, table, from, to, include_unqualified);
            if rewrite.changed() {
                self.propose(path, property, sql, rewrite.text);
            }
        }
    }

    fn replace_connection(&mut self, path: &RecordPath, record: &Record, from: &str, to: &str) {
        let vocabulary = &self.options.vocabulary;
        let mut found = Vec::new();
        for property in record.properties.iter().filter(|p| vocabulary.is_connection_property(&p.name)) {
            let text = property.value.as_text();
            if let Some(new_text) = replace_connection_value(&text, from, to) {
                found.push((property.name.as_str(), text, new_text));
            }
        }
        for (property, old, new) in found {
            self.propose(path, property, old, new);
        }
    }
}

/// `value` with connection `from` replaced, if it names it
///
/// Matches the whole value, or the value part of `key=value` pairs in a
/// `;`-separated connection string.
fn replace_connection_value(value: &str, from: &str, to: &str) -> Option<String> {
    if value.trim().eq_ignore_ascii_case(from.trim()) {
        return Some(to.to_string());
    }

    let mut changed = false;
    let parts: Vec<String> = value
        .split(';')
        .map(|part| match part.split_once('=') {
            Some((key, current)) if current.trim().eq_ignore_ascii_case(from.trim()) => {
                changed = true;
                format!("{key}={to}")
            }
            _ => part.to_string(),
        })
        .collect();

    changed.then(|| parts.join(";"))
}

/// Propose the modifications `request` implies for one document
///
/// Table and column names are matched case-insensitively, with the same
/// schema rules as the dependency index. SQL text properties are rewritten
/// on identifier boundaries when `options.rewrite_sql` is set.
pub fn plan_replacement(document: &JobDocument, request: &ReplacementRequest, options: &IndexOptions) -> Vec<Modification> {
    let scope = DocumentScope::new(document);
    let mut planner = Planner {
        options,
        planned: Vec::new(),
    };

    for (path, record) in scope.records() {
        match request {
            ReplacementRequest::RenameTable { from, to } => planner.rename_table(&scope, path, record, from, to),
            ReplacementRequest::RenameColumn { table, from, to } => {
                planner.rename_column(&scope, path, record, table, from, to)
            }
            ReplacementRequest::ReplaceConnection { from, to } => planner.replace_connection(path, record, from, to),
        }
    }

    tracing::debug!(job = %document.name, %request, modifications = planner.planned.len(), "planned replacement");
    planner.planned
}

/// Drop identical duplicates; differing new values for one property conflict
fn collapse(job: &str, modifications: &[Modification]) -> Result<Vec<Modification>, MutateError> {
    let mut collapsed: Vec<Modification> = Vec::with_capacity(modifications.len());
    for modification in modifications {
        match collapsed.iter().find(|existing| existing.same_target(modification)) {
            Some(existing) if existing.new_value == modification.new_value => continue,
            Some(existing) => {
                return Err(MutateError::Conflict {
                    job: job.to_string(),
                    target: format!("{} {}", modification.record_path, modification.property),
                    detail: format!(
                        "new values '{}' and '{}' disagree",
                        existing.new_value, modification.new_value
                    ),
                })
            }
            None => collapsed.push(modification.clone()),
        }
    }
    Ok(collapsed)
}

/// Apply modifications to a copy of `document`
///
/// The revised text equals the original except inside the value spans of
/// the modified properties. Values keep the form they were written in.
pub fn apply(document: &JobDocument, modifications: &[Modification]) -> Result<MutationOutcome, MutateError> {
    let job = document.name.as_str();
    let modifications = collapse(job, modifications)?;

    let mut edits: Vec<(Span, String)> = Vec::with_capacity(modifications.len());
    let mut lines = Vec::with_capacity(modifications.len());

    for modification in &modifications {
        let target = format!("{} {}", modification.record_path, modification.property);
        let record = document
            .record_at(&modification.record_path)
            .ok_or_else(|| MutateError::NotFound {
                job: job.to_string(),
                target: format!("record {}", modification.record_path),
            })?;
        let property = record
            .property(&modification.property)
            .ok_or_else(|| MutateError::NotFound {
                job: job.to_string(),
                target: format!("property {target}"),
            })?;

        let current = property.value.as_text();
        if current != modification.old_value {
            return Err(MutateError::Conflict {
                job: job.to_string(),
                target,
                detail: format!("expected '{}' but the document holds '{}'", modification.old_value, current),
            });
        }

        let encoded = property
            .value
            .with_text(&modification.new_value)
            .and_then(|value| value.encode())
            .map_err(|source| MutateError::Unencodable {
                job: job.to_string(),
                target,
                source,
            })?;

        edits.push((property.value_span, encoded));
        lines.push(property.line);
    }

    let mut order: Vec<usize> = (0..edits.len()).collect();
    order.sort_by_key(|&i| edits[i].0.start);

    let mut text = String::with_capacity(document.text.len());
    let mut cursor = 0;
    for &i in &order {
        let (span, encoded) = &edits[i];
        text.push_str(&document.text[cursor..span.start]);
        text.push_str(encoded);
        cursor = span.end;
    }
    text.push_str(&document.text[cursor..]);

    let revised = document.revise(text).map_err(|source| MutateError::Reparse {
        job: job.to_string(),
        source,
    })?;

    let timestamp = Utc::now();
    let changelog = modifications
        .iter()
        .zip(lines)
        .map(|(modification, line)| ChangelogEntry {
            timestamp,
            job: job.to_string(),
            record_path: modification.record_path.clone(),
            property: modification.property.clone(),
            line,
            old_value: modification.old_value.clone(),
            new_value: modification.new_value.clone(),
        })
        .collect();

    tracing::info!(job, revision = revised.revision, modifications = modifications.len(), "applied modifications");

    Ok(MutationOutcome {
        backup: BackupCopy {
            job: job.to_string(),
            revision: document.revision,
            text: document.text.clone(),
            hash: document.hash.clone(),
        },
        revision: DocumentRevision {
            document: revised,
            base_revision: document.revision,
            base_hash: document.hash.clone(),
            modifications,
        },
        changelog,
    })
}

/// Locations a column deletion would affect, for manual review
///
/// `reference` names a column (`schema.table.column`) or a whole table.
pub fn plan_column_deletion(document: &JobDocument, reference: &PhysicalReference, options: &IndexOptions) -> DeletionAdvisory {
    let index = DependencyIndex::build(std::iter::once(document), options);
    let edges = match &reference.column {
        Some(column) => index.find_by_column(reference.schema.as_deref().unwrap_or_default(), &reference.table, column),
        None => index.find_table(reference),
    };

    let mut locations: Vec<Location> = Vec::new();
    for edge in edges {
        let location = edge.location();
        if !locations.contains(&location) {
            locations.push(location);
        }
    }

    let message = if locations.is_empty() {
        format!("job '{}' does not reference {}", document.name, reference)
    } else {
        format!(
            "deleting {} affects {} location(s) in job '{}'; remove them manually and check stage links",
            reference,
            locations.len(),
            document.name
        )
    };

    tracing::warn!(job = %document.name, %reference, locations = locations.len(), "column deletion needs manual review");

    DeletionAdvisory {
        job: document.name.clone(),
        reference: reference.clone(),
        severity: Severity::Warning,
        locations,
        message,
    }
}
