//! Catalog trait for describing physical tables

use dsxlens_core::{PhysicalReference, PhysicalTable};
use std::fmt;

/// Identifies a table in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableIdentifier {
    pub schema: String,
    pub table: String,
}

impl TableIdentifier {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Case-insensitive lookup key
    pub fn reference(&self) -> PhysicalReference {
        PhysicalReference::table(&self.schema, &self.table)
    }
}

impl From<&PhysicalReference> for TableIdentifier {
    fn from(reference: &PhysicalReference) -> Self {
        Self::new(reference.schema.clone().unwrap_or_default(), reference.table.clone())
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Errors that can occur when describing tables
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Source of physical table descriptions
#[async_trait::async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Short name for logs, e.g. "Snapshot"
    fn name(&self) -> &'static str;

    /// Columns and key constraints of one table
    async fn describe_table(&self, table: &TableIdentifier) -> Result<PhysicalTable, FetchError>;

    /// Check that the catalog is reachable
    async fn test_connection(&self) -> Result<(), FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_keys_ignore_case_and_quoting() {
        let table = TableIdentifier::new("erp", "[Orders]");
        assert_eq!(table.to_string(), "erp.[Orders]");
        assert_eq!(table.reference(), PhysicalReference::table("ERP", "ORDERS"));

        let from_reference = TableIdentifier::from(&PhysicalReference::column("DW", "FACT", "ID"));
        assert_eq!(from_reference, TableIdentifier::new("DW", "FACT"));
    }
}
