//! Column metadata a job declares for one table

use crate::index::{record_column, record_tables, DocumentScope, IndexOptions};
use dsxlens_core::{JobColumn, JobTableMetadata, PhysicalReference, UsageKind, Vocabulary};
use dsxlens_export::{JobDocument, Record};

/// Extraction of typed metadata from a parsed job
pub trait FromDocument: Sized {
    /// `None` when the document does not declare `reference`
    fn from_document(document: &JobDocument, reference: &PhysicalReference, options: &IndexOptions) -> Option<Self>;
}

fn positive(value: Option<i64>) -> Option<u32> {
    value.filter(|v| *v > 0).and_then(|v| u32::try_from(v).ok())
}

fn column_from_record(name: String, record: &Record, options: &IndexOptions) -> JobColumn {
    let vocabulary = &options.vocabulary;
    let find = |is_match: fn(&Vocabulary, &str) -> bool| {
        record
            .properties
            .iter()
            .find(|p| is_match(vocabulary, &p.name))
            .map(|p| &p.value)
    };

    let mut column = JobColumn::new(name);
    column.type_label = find(Vocabulary::is_type_property)
        .map(|v| v.as_text().trim().to_string())
        .filter(|label| !label.is_empty());
    column.length = positive(find(Vocabulary::is_length_property).and_then(|v| v.as_integer()));
    column.scale = find(Vocabulary::is_scale_property)
        .and_then(|v| v.as_integer())
        .and_then(|v| u32::try_from(v).ok());
    column.nullable = find(Vocabulary::is_nullable_property).and_then(|v| v.as_flag());
    column.key = find(Vocabulary::is_key_property)
        .and_then(|v| v.as_integer().map(|position| position > 0).or_else(|| v.as_flag()))
        .unwrap_or(false);
    column.derivation = find(Vocabulary::is_derivation_property)
        .map(|v| v.as_text().trim().to_string())
        .filter(|expression| !expression.is_empty());
    column.line = record.line;
    column
}

impl FromDocument for JobTableMetadata {
    /// Columns declared under every record scoped to `reference`
    ///
    /// Usage is the usage of the first matching table record. Columns
    /// declared more than once keep their first declaration.
    fn from_document(document: &JobDocument, reference: &PhysicalReference, options: &IndexOptions) -> Option<Self> {
        let vocabulary = &options.vocabulary;
        let scope = DocumentScope::new(document);
        let wanted = reference.table_only();

        let table_record = scope.records().iter().find(|(_, record)| {
            record_tables(record, vocabulary)
                .iter()
                .any(|(found, _)| options.table_matches(found, &wanted))
        })?;

        let usage = scope
            .usage_hint(&table_record.0, vocabulary)
            .unwrap_or(UsageKind::Source);
        let mut metadata = JobTableMetadata::new(document.name.clone(), wanted.clone(), usage);

        for (path, record) in scope.records() {
            let Some(property) = record_column(record, vocabulary) else {
                continue;
            };
            let in_scope = scope
                .table_scope(path, vocabulary)
                .map(|(_, table)| options.table_matches(&table, &wanted))
                .unwrap_or(false);
            if !in_scope {
                continue;
            }

            let name = property.value.as_text().trim().to_string();
            if metadata.find_column(&name).is_some() {
                continue;
            }

            let mut column = column_from_record(name, record, options);
            column.record_path = path.to_string();
            metadata.columns.push(column);
        }

        tracing::debug!(
            job = %document.name,
            table = %wanted,
            columns = metadata.columns.len(),
            "extracted job table metadata"
        );

        Some(metadata)
    }
}
