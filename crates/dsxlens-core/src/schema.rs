//! Schema types shared by the index, validator and DDL planner
//!
//! Physical identifiers are compared case-insensitively (the governing
//! database collation is case-insensitive) but displayed case-preserving.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Portable type family
///
/// Job exports and databases disagree on concrete type names, so columns are
/// compared by family only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeFamily {
    Numeric,
    Character,
    Date,
    Other,
}

impl TypeFamily {
    /// Classify a type label
    ///
    /// Accepts ODBC SQL type codes as written by job exports (`12`, `-9`, `93`)
    /// and database type names with or without a length suffix (`VARCHAR(50)`).
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();

        if let Ok(code) = label.parse::<i32>() {
            return match code {
                1 | 12 | -1 | -8 | -9 | -10 => Self::Character,
                2 | 3 | 4 | 5 | 6 | 7 | 8 | -5 | -6 | -7 => Self::Numeric,
                9 | 10 | 11 | 91 | 92 | 93 => Self::Date,
                _ => Self::Other,
            };
        }

        let base = label
            .split(|c: char| c == '(' || c.is_whitespace())
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        match base.as_str() {
            "CHAR" | "VARCHAR" | "NCHAR" | "NVARCHAR" | "TEXT" | "NTEXT" | "CHARACTER"
            | "VARCHAR2" | "NVARCHAR2" | "LONGVARCHAR" | "STRING" | "CLOB" | "LONG" => Self::Character,
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" | "DECIMAL" | "NUMERIC"
            | "NUMBER" | "FLOAT" | "REAL" | "DOUBLE" | "MONEY" | "SMALLMONEY" | "BIT" => Self::Numeric,
            "DATE" | "TIME" | "DATETIME" | "DATETIME2" | "SMALLDATETIME" | "TIMESTAMP"
            | "TIMESTAMPTZ" | "DATETIMEOFFSET" => Self::Date,
            _ => Self::Other,
        }
    }

    /// Whether two families are compatible (`Other` matches anything)
    pub fn compatible_with(&self, other: &TypeFamily) -> bool {
        matches!((self, other), (Self::Other, _) | (_, Self::Other)) || self == other
    }
}

impl std::fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::Character => write!(f, "character"),
            Self::Date => write!(f, "date"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// How a job uses a physical object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    /// Read from
    Source,

    /// Written to
    Target,

    /// Read as a keyed lookup/reference
    Lookup,
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Target => write!(f, "target"),
            Self::Lookup => write!(f, "lookup"),
        }
    }
}

/// Strip identifier quoting (`[x]`, `"x"`, `` `x` ``) and surrounding whitespace
pub fn normalize_ident(ident: &str) -> String {
    let trimmed = ident.trim();
    let unquoted = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .or_else(|| trimmed.strip_prefix('`').and_then(|s| s.strip_suffix('`')))
        .unwrap_or(trimmed);
    unquoted.trim().to_string()
}

/// Reference to a schema object in the governing database
///
/// Equality and hashing are case-insensitive; `schema == None` means the
/// reference was found without a schema qualifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicalReference {
    pub schema: Option<String>,
    pub table: String,
    pub column: Option<String>,
}

impl PhysicalReference {
    /// Schema-qualified table reference
    pub fn table(schema: impl AsRef<str>, table: impl AsRef<str>) -> Self {
        let schema = normalize_ident(schema.as_ref());
        Self {
            schema: (!schema.is_empty()).then_some(schema),
            table: normalize_ident(table.as_ref()),
            column: None,
        }
    }

    /// Table reference without a schema
    pub fn unqualified(table: impl AsRef<str>) -> Self {
        Self {
            schema: None,
            table: normalize_ident(table.as_ref()),
            column: None,
        }
    }

    /// Schema-qualified column reference
    pub fn column(schema: impl AsRef<str>, table: impl AsRef<str>, column: impl AsRef<str>) -> Self {
        Self::table(schema, table).with_column(column)
    }

    /// Attach a column to this reference
    pub fn with_column(mut self, column: impl AsRef<str>) -> Self {
        self.column = Some(normalize_ident(column.as_ref()));
        self
    }

    /// Drop the column, keeping the table part
    pub fn table_only(&self) -> Self {
        Self {
            schema: self.schema.clone(),
            table: self.table.clone(),
            column: None,
        }
    }

    /// Parse a dotted name
    ///
    /// `T` is an unqualified table, `S.T` a table, `S.T.C` a column.
    /// `DB.dbo.T` is read as table `T` in schema `DB`, since `dbo` is the
    /// default owner rather than a meaningful schema.
    pub fn parse_qualified(name: &str) -> Option<Self> {
        let parts: Vec<String> = name.split('.').map(normalize_ident).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return None;
        }

        match parts.as_slice() {
            [table] => Some(Self::unqualified(table)),
            [schema, table] => Some(Self::table(schema, table)),
            [db, owner, table] if owner.eq_ignore_ascii_case("dbo") => Some(Self::table(db, table)),
            [schema, table, column] => Some(Self::column(schema, table, column)),
            _ => None,
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.schema.is_some()
    }

    /// Normalized schema key (upper-case)
    pub fn schema_key(&self) -> Option<String> {
        self.schema.as_ref().map(|s| s.to_uppercase())
    }

    /// Normalized table key (upper-case)
    pub fn table_key(&self) -> String {
        self.table.to_uppercase()
    }

    /// Normalized column key (upper-case)
    pub fn column_key(&self) -> Option<String> {
        self.column.as_ref().map(|c| c.to_uppercase())
    }

    /// Display form of the table part (`ERP.ORDERS` or `ORDERS`)
    pub fn table_name(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    fn key(&self) -> (Option<String>, String, Option<String>) {
        (self.schema_key(), self.table_key(), self.column_key())
    }
}

impl PartialEq for PhysicalReference {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for PhysicalReference {}

impl Hash for PhysicalReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl std::fmt::Display for PhysicalReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(column) => write!(f, "{}.{}", self.table_name(), column),
            None => write!(f, "{}", self.table_name()),
        }
    }
}

/// A column as described by the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalColumn {
    pub name: String,

    /// Database-specific type name (e.g. `VARCHAR`)
    pub type_name: String,

    /// Length or numeric precision
    #[serde(default)]
    pub length: Option<u32>,

    /// Numeric scale
    #[serde(default)]
    pub scale: Option<u32>,

    pub nullable: bool,

    /// Part of the primary key
    #[serde(default)]
    pub is_key: bool,
}

impl PhysicalColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            length: None,
            scale: None,
            nullable: true,
            is_key: false,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn key(mut self) -> Self {
        self.is_key = true;
        self.nullable = false;
        self
    }

    pub fn family(&self) -> TypeFamily {
        TypeFamily::from_label(&self.type_name)
    }

    /// Full type definition, e.g. `VARCHAR(50)` or `DECIMAL(10,2)`
    pub fn type_definition(&self) -> String {
        match (self.length, self.scale) {
            (Some(length), Some(scale)) => format!("{}({},{})", self.type_name, length, scale),
            (Some(length), None) => format!("{}({})", self.type_name, length),
            _ => self.type_name.clone(),
        }
    }
}

/// Kind of a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    PrimaryKey,
    Unique,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrimaryKey => write!(f, "PRIMARY KEY"),
            Self::Unique => write!(f, "UNIQUE"),
        }
    }
}

/// A primary-key or unique constraint, captured with its full definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConstraint {
    pub name: String,
    pub kind: ConstraintKind,

    /// Key columns in definition order
    pub columns: Vec<String>,
}

impl KeyConstraint {
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// A table as described by the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalTable {
    pub schema: String,
    pub table: String,

    /// Ordered list of columns
    pub columns: Vec<PhysicalColumn>,

    #[serde(default)]
    pub constraints: Vec<KeyConstraint>,
}

impl PhysicalTable {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, columns: Vec<PhysicalColumn>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            columns,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: KeyConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Find a column by name (case-insensitive)
    pub fn find_column(&self, name: &str) -> Option<&PhysicalColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Constraints covering a column
    pub fn constraints_on(&self, column: &str) -> Vec<&KeyConstraint> {
        self.constraints.iter().filter(|c| c.covers(column)).collect()
    }

    /// Whether some uniqueness guarantee covers the column
    pub fn is_unique(&self, column: &str) -> bool {
        !self.constraints_on(column).is_empty()
            || self.find_column(column).map(|c| c.is_key).unwrap_or(false)
    }

    pub fn reference(&self) -> PhysicalReference {
        PhysicalReference::table(&self.schema, &self.table)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// A requested change to one physical column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChange {
    /// Column being changed
    pub column: String,

    #[serde(default)]
    pub new_type: Option<String>,

    #[serde(default)]
    pub new_length: Option<u32>,

    #[serde(default)]
    pub new_scale: Option<u32>,

    #[serde(default)]
    pub new_nullable: Option<bool>,

    #[serde(default)]
    pub new_name: Option<String>,

    /// Recreate constraints without this column
    #[serde(default)]
    pub drop_from_key: bool,
}

impl ColumnChange {
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ..Self::default()
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.new_length = Some(length);
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.new_type = Some(type_name.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.new_nullable = Some(nullable);
        self
    }

    pub fn renamed(mut self, new_name: impl Into<String>) -> Self {
        self.new_name = Some(new_name.into());
        self
    }

    pub fn dropping_key(mut self) -> Self {
        self.drop_from_key = true;
        self
    }

    /// Whether the column's definition (type/length/nullability) changes
    pub fn alters_definition(&self) -> bool {
        self.new_type.is_some() || self.new_length.is_some() || self.new_scale.is_some() || self.new_nullable.is_some()
    }

    /// Project the change onto a table, producing the proposed table shape
    pub fn apply_to(&self, table: &PhysicalTable) -> PhysicalTable {
        let mut proposed = table.clone();

        for column in proposed.columns.iter_mut().filter(|c| c.name.eq_ignore_ascii_case(&self.column)) {
            if let Some(type_name) = &self.new_type {
                column.type_name = type_name.clone();
            }
            if let Some(length) = self.new_length {
                column.length = Some(length);
            }
            if let Some(scale) = self.new_scale {
                column.scale = Some(scale);
            }
            if let Some(nullable) = self.new_nullable {
                column.nullable = nullable;
            }
            if self.drop_from_key {
                column.is_key = false;
            }
            if let Some(new_name) = &self.new_name {
                column.name = new_name.clone();
            }
        }

        for constraint in proposed.constraints.iter_mut() {
            if self.drop_from_key {
                constraint.columns.retain(|c| !c.eq_ignore_ascii_case(&self.column));
            } else if let Some(new_name) = &self.new_name {
                for c in constraint.columns.iter_mut().filter(|c| c.eq_ignore_ascii_case(&self.column)) {
                    *c = new_name.clone();
                }
            }
        }
        proposed.constraints.retain(|c| !c.columns.is_empty());

        proposed
    }
}

/// A column as declared inside a job definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobColumn {
    pub name: String,

    /// Raw type label from the export (ODBC code or type name)
    pub type_label: Option<String>,

    pub length: Option<u32>,
    pub scale: Option<u32>,

    /// `None` when the export does not say
    pub nullable: Option<bool>,

    /// The job treats this column as a key (lookup key or key position)
    pub key: bool,

    /// Derivation expression feeding the column, when the job has one
    #[serde(default)]
    pub derivation: Option<String>,

    /// Record path of the declaring record
    pub record_path: String,

    pub line: usize,
}

impl JobColumn {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_label: None,
            length: None,
            scale: None,
            nullable: None,
            key: false,
            derivation: None,
            record_path: String::from("/"),
            line: 0,
        }
    }

    pub fn with_type(mut self, label: impl Into<String>) -> Self {
        self.type_label = Some(label.into());
        self
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = Some(nullable);
        self
    }

    pub fn keyed(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn with_derivation(mut self, expression: impl Into<String>) -> Self {
        self.derivation = Some(expression.into());
        self
    }

    pub fn family(&self) -> TypeFamily {
        self.type_label
            .as_deref()
            .map(TypeFamily::from_label)
            .unwrap_or(TypeFamily::Other)
    }
}

/// Columns one job declares for one physical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTableMetadata {
    pub job: String,
    pub reference: PhysicalReference,
    pub usage: UsageKind,
    pub columns: Vec<JobColumn>,
}

impl JobTableMetadata {
    pub fn new(job: impl Into<String>, reference: PhysicalReference, usage: UsageKind) -> Self {
        Self {
            job: job.into(),
            reference,
            usage,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: JobColumn) -> Self {
        self.columns.push(column);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&JobColumn> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn type_family_from_odbc_codes_and_names() {
        assert_eq!(TypeFamily::from_label("12"), TypeFamily::Character);
        assert_eq!(TypeFamily::from_label("-9"), TypeFamily::Character);
        assert_eq!(TypeFamily::from_label("3"), TypeFamily::Numeric);
        assert_eq!(TypeFamily::from_label("93"), TypeFamily::Date);
        assert_eq!(TypeFamily::from_label("varchar(50)"), TypeFamily::Character);
        assert_eq!(TypeFamily::from_label("DECIMAL(10, 2)"), TypeFamily::Numeric);
        assert_eq!(TypeFamily::from_label("geometry"), TypeFamily::Other);
        assert!(TypeFamily::Other.compatible_with(&TypeFamily::Date));
        assert!(!TypeFamily::Numeric.compatible_with(&TypeFamily::Character));
    }

    #[test]
    fn reference_comparison_is_case_insensitive() {
        let a = PhysicalReference::table("erp", "Orders");
        let b = PhysicalReference::table("[ERP]", "\"ORDERS\"");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));

        // Display keeps the original case
        assert_eq!(a.to_string(), "erp.Orders");
    }

    #[test]
    fn parse_qualified_names() {
        assert_eq!(PhysicalReference::parse_qualified("ORDERS"), Some(PhysicalReference::unqualified("ORDERS")));
        assert_eq!(PhysicalReference::parse_qualified("ERP.ORDERS"), Some(PhysicalReference::table("ERP", "ORDERS")));
        assert_eq!(
            PhysicalReference::parse_qualified("ERP.ORDERS.ORDER_NO"),
            Some(PhysicalReference::column("ERP", "ORDERS", "ORDER_NO"))
        );
        assert_eq!(
            PhysicalReference::parse_qualified("FILA_ERP.dbo.DW_ETL_L"),
            Some(PhysicalReference::table("FILA_ERP", "DW_ETL_L"))
        );
        assert_eq!(PhysicalReference::parse_qualified("a..b"), None);
    }

    #[test]
    fn column_change_projects_onto_table() {
        let table = PhysicalTable::new(
            "ERP",
            "ORDERS",
            vec![
                PhysicalColumn::new("ORDER_NO", "VARCHAR").with_length(20).key(),
                PhysicalColumn::new("NOTE", "VARCHAR").with_length(100),
            ],
        )
        .with_constraint(KeyConstraint {
            name: "PK_ORDERS".into(),
            kind: ConstraintKind::PrimaryKey,
            columns: vec!["ORDER_NO".into()],
        });

        let proposed = ColumnChange::new("order_no").with_length(50).apply_to(&table);
        assert_eq!(proposed.find_column("ORDER_NO").unwrap().length, Some(50));
        assert!(proposed.is_unique("ORDER_NO"));

        let dropped = ColumnChange::new("ORDER_NO").dropping_key().apply_to(&table);
        assert!(!dropped.is_unique("ORDER_NO"));
        assert!(dropped.constraints.is_empty());
    }

    #[test]
    fn type_definition_rendering() {
        assert_eq!(PhysicalColumn::new("A", "VARCHAR").with_length(20).type_definition(), "VARCHAR(20)");
        assert_eq!(
            PhysicalColumn::new("B", "DECIMAL").with_length(10).with_scale(2).type_definition(),
            "DECIMAL(10,2)"
        );
        assert_eq!(PhysicalColumn::new("C", "DATE").type_definition(), "DATE");
    }
}
