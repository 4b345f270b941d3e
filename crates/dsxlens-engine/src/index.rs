//! Reverse dependency index from physical objects to job records
//!
//! Every record of every document is scanned for reference-carrying
//! properties. Structured properties (table, schema and column names) are
//! read directly; SQL text is handed to the SQL scanner.
//!
//! Unqualified table references are kept under a wildcard schema. Whether a
//! schema-qualified query also returns them is decided by
//! [`SchemaMatchPolicy`].

use dsxlens_core::schema::normalize_ident;
use dsxlens_core::{Config, DialectConfig, Location, PhysicalReference, SchemaMatchPolicy, UsageKind, Vocabulary};
use dsxlens_export::{DocumentStore, JobDocument, Property, PropertyValue, Record, RecordPath};
use dsxlens_sql::{table_reference, SqlScanner};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// How an edge was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// A table, schema or column property
    Structured,

    /// A name inside SQL text (best effort)
    SqlFragment,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured => write!(f, "structured"),
            Self::SqlFragment => write!(f, "sql"),
        }
    }
}

/// One use of a physical object by one job record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub job: String,
    pub record_path: RecordPath,

    /// Line of the property in the file the job came from
    pub line: usize,

    /// Property the reference was read from, original case
    pub property: String,

    pub reference: PhysicalReference,
    pub usage: UsageKind,
    pub confidence: Confidence,

    /// Table found without a schema (indexed under the wildcard schema)
    pub ambiguous: bool,
}

impl DependencyEdge {
    pub fn location(&self) -> Location {
        Location::with_line(&self.job, self.record_path.to_string(), self.line)
    }
}

/// Settings for reference extraction
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub vocabulary: Vocabulary,
    pub schema_match: SchemaMatchPolicy,

    /// Dialect used to parse SQL text
    pub dialect: DialectConfig,

    /// Rewrite names inside SQL text properties when mutating
    pub rewrite_sql: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            vocabulary: Vocabulary::default(),
            schema_match: SchemaMatchPolicy::default(),
            dialect: DialectConfig::default(),
            rewrite_sql: true,
        }
    }
}

impl IndexOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            vocabulary: config.vocabulary.clone(),
            schema_match: config.schema_match,
            dialect: config.dialect,
            rewrite_sql: config.rewrite_sql,
        }
    }

    /// Whether a reference found in a job answers for `wanted`
    ///
    /// Both are compared as tables. An unqualified `wanted` matches any
    /// schema; an unqualified `found` matches only under the recall policy.
    pub fn table_matches(&self, found: &PhysicalReference, wanted: &PhysicalReference) -> bool {
        if found.table_key() != wanted.table_key() {
            return false;
        }
        match (wanted.schema_key(), found.schema_key()) {
            (None, _) => true,
            (Some(wanted), Some(found)) => wanted == found,
            (Some(_), None) => self.schema_match == SchemaMatchPolicy::Recall,
        }
    }
}

/// Read a table property value; `schema` qualifies bare names
pub(crate) fn parse_table_value(value: &str, schema: Option<&str>) -> Option<PhysicalReference> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let parts: Vec<String> = value.split('.').map(normalize_ident).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    match (parts.as_slice(), schema.map(str::trim)) {
        ([table], Some(schema)) if !schema.is_empty() => Some(PhysicalReference::table(schema, table)),
        _ => table_reference(&parts),
    }
}

/// Every table a record declares through table properties
pub(crate) fn record_tables<'r>(record: &'r Record, vocabulary: &Vocabulary) -> Vec<(PhysicalReference, &'r Property)> {
    let schema = record
        .properties
        .iter()
        .find(|p| vocabulary.is_schema_property(&p.name))
        .map(|p| p.value.as_text());

    record
        .properties
        .iter()
        .filter(|p| vocabulary.is_table_property(&p.name))
        .filter_map(|p| parse_table_value(&p.value.as_text(), schema.as_deref()).map(|r| (r, p)))
        .collect()
}

/// The property naming the column a record defines, if it defines one
///
/// Either an explicit column property, or `Name` in a record that also
/// carries a type property.
pub(crate) fn record_column<'r>(record: &'r Record, vocabulary: &Vocabulary) -> Option<&'r Property> {
    let explicit = record.properties.iter().find(|p| vocabulary.is_column_property(&p.name));
    let typed_name = || {
        record
            .properties
            .iter()
            .any(|p| vocabulary.is_type_property(&p.name))
            .then(|| record.property("Name"))
            .flatten()
    };

    explicit
        .or_else(typed_name)
        .filter(|p| !p.value.as_text().trim().is_empty())
}

fn usage_from_value(value: &PropertyValue) -> Option<UsageKind> {
    match value.as_text().trim().to_ascii_lowercase().as_str() {
        "1" | "source" => Some(UsageKind::Source),
        "2" | "target" => Some(UsageKind::Target),
        "3" | "lookup" | "reference" => Some(UsageKind::Lookup),
        _ => None,
    }
}

fn usage_from_stage_type(value: &PropertyValue) -> Option<UsageKind> {
    let text = value.as_text().to_ascii_lowercase();
    if text.contains("lookup") {
        Some(UsageKind::Lookup)
    } else if text.contains("output") {
        Some(UsageKind::Source)
    } else if text.contains("input") {
        Some(UsageKind::Target)
    } else {
        None
    }
}

/// Path lookups over one document, for ancestor-scoped questions
pub(crate) struct DocumentScope<'d> {
    records: Vec<(RecordPath, &'d Record)>,
    by_path: HashMap<RecordPath, &'d Record>,
}

impl<'d> DocumentScope<'d> {
    pub(crate) fn new(document: &'d JobDocument) -> Self {
        let records = document.records();
        let by_path = records.iter().map(|(path, record)| (path.clone(), *record)).collect();
        Self { records, by_path }
    }

    /// Records in pre-order
    pub(crate) fn records(&self) -> &[(RecordPath, &'d Record)] {
        &self.records
    }

    fn chain(&self, path: &RecordPath) -> Vec<&'d Record> {
        path.ancestors_or_self()
            .iter()
            .filter_map(|p| self.by_path.get(p).copied())
            .collect()
    }

    /// Usage stated by the nearest ancestor-or-self, then stage-type hints
    pub(crate) fn usage_hint(&self, path: &RecordPath, vocabulary: &Vocabulary) -> Option<UsageKind> {
        let chain = self.chain(path);

        let stated = chain.iter().find_map(|record| {
            record
                .properties
                .iter()
                .filter(|p| vocabulary.is_usage_property(&p.name))
                .find_map(|p| usage_from_value(&p.value))
        });

        stated.or_else(|| {
            chain.iter().find_map(|record| {
                record
                    .properties
                    .iter()
                    .filter(|p| vocabulary.is_stage_type_property(&p.name))
                    .find_map(|p| usage_from_stage_type(&p.value))
            })
        })
    }

    /// Nearest ancestor-or-self record declaring a table, and that table
    pub(crate) fn table_scope(&self, path: &RecordPath, vocabulary: &Vocabulary) -> Option<(RecordPath, PhysicalReference)> {
        path.ancestors_or_self().into_iter().find_map(|p| {
            let record = self.by_path.get(&p)?;
            let (reference, _) = record_tables(record, vocabulary).into_iter().next()?;
            Some((p, reference))
        })
    }
}

type EdgeKey = (String, RecordPath, PhysicalReference, UsageKind);

/// Reverse index from physical references to the job records using them
#[derive(Debug, Clone)]
pub struct DependencyIndex {
    /// Edges in discovery order
    edges: Vec<DependencyEdge>,

    /// Upper-case table name -> positions in `edges`
    by_table: HashMap<String, Vec<usize>>,

    schema_match: SchemaMatchPolicy,

    /// Store generation the index was built from
    generation: u64,
}

struct Builder<'o> {
    options: &'o IndexOptions,
    scanner: SqlScanner,
    edges: Vec<DependencyEdge>,
    seen: HashSet<EdgeKey>,
}

impl Builder<'_> {
    fn push(&mut self, edge: DependencyEdge) {
        let key = (edge.job.clone(), edge.record_path.clone(), edge.reference.clone(), edge.usage);
        if self.seen.insert(key) {
            self.edges.push(edge);
        }
    }

    fn add_document(&mut self, document: &JobDocument) {
        let options = self.options;
        let vocabulary = &options.vocabulary;
        let scope = DocumentScope::new(document);

        for (path, record) in scope.records() {
            let hint = scope.usage_hint(path, vocabulary);
            let edge = |property: &Property, reference: PhysicalReference, usage, confidence| DependencyEdge {
                job: document.name.clone(),
                record_path: path.clone(),
                line: property.line,
                property: property.name.clone(),
                ambiguous: !reference.is_qualified(),
                reference,
                usage,
                confidence,
            };

            for (reference, property) in record_tables(record, vocabulary) {
                self.push(edge(property, reference, hint.unwrap_or(UsageKind::Source), Confidence::Structured));
            }

            if let Some(property) = record_column(record, vocabulary) {
                if let Some((_, table)) = scope.table_scope(path, vocabulary) {
                    let reference = table.with_column(property.value.as_text());
                    self.push(edge(property, reference, hint.unwrap_or(UsageKind::Source), Confidence::Structured));
                }
            }

            for property in record.properties.iter().filter(|p| vocabulary.is_sql_property(&p.name)) {
                let sql = property.value.as_text();
                if sql.trim().is_empty() {
                    continue;
                }

                let scan = self.scanner.scan(&sql);
                for found in scan.references {
                    // DML names its target explicitly; a plain query takes the record's usage
                    let usage = if scan.statement.is_dml() {
                        found.usage.or(hint)
                    } else {
                        hint.or(found.usage)
                    };
                    self.push(edge(
                        property,
                        found.reference,
                        usage.unwrap_or(UsageKind::Source),
                        Confidence::SqlFragment,
                    ));
                }
            }
        }
    }
}

impl DependencyIndex {
    /// An index with no edges
    pub fn empty(options: &IndexOptions) -> Self {
        Self {
            edges: Vec::new(),
            by_table: HashMap::new(),
            schema_match: options.schema_match,
            generation: 0,
        }
    }

    /// Scan every record of every document
    pub fn build<'a>(documents: impl IntoIterator<Item = &'a JobDocument>, options: &IndexOptions) -> Self {
        let mut builder = Builder {
            options,
            scanner: SqlScanner::from_dialect(&options.dialect),
            edges: Vec::new(),
            seen: HashSet::new(),
        };

        let mut jobs = 0;
        for document in documents {
            builder.add_document(document);
            jobs += 1;
        }

        let mut by_table: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, edge) in builder.edges.iter().enumerate() {
            by_table.entry(edge.reference.table_key()).or_default().push(position);
        }

        tracing::info!(jobs, edges = builder.edges.len(), tables = by_table.len(), "built dependency index");

        Self {
            edges: builder.edges,
            by_table,
            schema_match: options.schema_match,
            generation: 0,
        }
    }

    /// Record the store generation this index reflects
    pub fn at_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    fn matching<'s>(&'s self, query: &PhysicalReference) -> impl Iterator<Item = &'s DependencyEdge> + 's {
        let wanted_schema = query.schema_key();
        let recall = self.schema_match == SchemaMatchPolicy::Recall;

        self.by_table
            .get(&query.table_key())
            .into_iter()
            .flatten()
            .map(move |&position| &self.edges[position])
            .filter(move |edge| match (&wanted_schema, edge.reference.schema_key()) {
                (None, _) => true,
                (Some(wanted), Some(found)) => *wanted == found,
                (Some(_), None) => recall,
            })
    }

    /// Table-level edges for a table; an empty schema matches every schema
    pub fn find_by_table(&self, schema: &str, table: &str) -> Vec<&DependencyEdge> {
        self.find_table(&PhysicalReference::table(schema, table))
    }

    /// Table-level edges for the table part of `reference`
    pub fn find_table(&self, reference: &PhysicalReference) -> Vec<&DependencyEdge> {
        self.matching(reference)
            .filter(|edge| edge.reference.column.is_none())
            .collect()
    }

    /// Column-level edges for one column
    pub fn find_by_column(&self, schema: &str, table: &str, column: &str) -> Vec<&DependencyEdge> {
        let query = PhysicalReference::column(schema, table, column);
        let column = query.column_key();
        self.matching(&query)
            .filter(|edge| edge.reference.column_key() == column)
            .collect()
    }

    pub fn edges_for_job(&self, job: &str) -> Vec<&DependencyEdge> {
        self.edges.iter().filter(|edge| edge.job == job).collect()
    }

    /// All edges in discovery order
    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    /// Distinct tables in discovery order (column edges contribute their table)
    pub fn tables(&self) -> Vec<PhysicalReference> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .map(|edge| edge.reference.table_only())
            .filter(|table| seen.insert(table.clone()))
            .collect()
    }

    /// Distinct job names in discovery order
    pub fn jobs(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .map(|edge| edge.job.as_str())
            .filter(|job| seen.insert(*job))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn schema_match(&self) -> SchemaMatchPolicy {
        self.schema_match
    }
}

/// An index that is rebuilt whole and swapped in
///
/// Readers keep the snapshot they took; a rebuild never blocks them for
/// longer than the pointer swap.
#[derive(Debug)]
pub struct SharedIndex {
    options: IndexOptions,
    current: RwLock<Arc<DependencyIndex>>,
}

impl SharedIndex {
    pub fn new(options: IndexOptions) -> Self {
        let empty = Arc::new(DependencyIndex::empty(&options));
        Self {
            options,
            current: RwLock::new(empty),
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// The current index
    pub fn snapshot(&self) -> Arc<DependencyIndex> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Build a new index from the store's current documents and swap it in
    pub fn rebuild(&self, store: &DocumentStore) -> Arc<DependencyIndex> {
        let generation = store.generation();
        let documents = store.documents();
        let index = Arc::new(
            DependencyIndex::build(documents.iter().map(|document| document.as_ref()), &self.options)
                .at_generation(generation),
        );

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        // A slower rebuild from an older generation must not replace a newer one
        if current.generation() <= generation {
            *current = Arc::clone(&index);
        }
        tracing::debug!(generation, "swapped dependency index");

        index
    }

    /// Whether the store changed since the current index was built
    pub fn is_stale(&self, store: &DocumentStore) -> bool {
        self.snapshot().generation() != store.generation()
    }
}
