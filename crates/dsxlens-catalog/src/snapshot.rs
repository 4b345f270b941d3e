//! Catalog backed by a JSON capture of table descriptions

use crate::adapter::{FetchError, SchemaCatalog, TableIdentifier};
use chrono::{DateTime, Utc};
use dsxlens_core::{PhysicalReference, PhysicalTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// On-disk snapshot format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    /// When the catalog was read, if recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,

    pub tables: Vec<PhysicalTable>,
}

/// Read-only catalog over a [`CatalogSnapshot`]
#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    captured_at: Option<DateTime<Utc>>,
    tables: HashMap<PhysicalReference, PhysicalTable>,
}

impl SnapshotCatalog {
    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let mut tables = HashMap::with_capacity(snapshot.tables.len());
        for table in snapshot.tables {
            if let Some(previous) = tables.insert(table.reference(), table) {
                tracing::warn!(table = %previous.qualified_name(), "duplicate table in catalog snapshot, keeping the last");
            }
        }
        Self {
            captured_at: snapshot.captured_at,
            tables,
        }
    }

    pub fn from_json(content: &str) -> Result<Self, FetchError> {
        let snapshot: CatalogSnapshot =
            serde_json::from_str(content).map_err(|e| FetchError::InvalidSnapshot(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| FetchError::InvalidSnapshot(format!("{}: {e}", path.display())))?;
        let catalog = Self::from_json(&content)?;
        tracing::debug!(path = %path.display(), tables = catalog.tables.len(), "loaded catalog snapshot");
        Ok(catalog)
    }

    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.captured_at
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait::async_trait]
impl SchemaCatalog for SnapshotCatalog {
    fn name(&self) -> &'static str {
        "Snapshot"
    }

    async fn describe_table(&self, table: &TableIdentifier) -> Result<PhysicalTable, FetchError> {
        self.tables
            .get(&table.reference())
            .cloned()
            .ok_or_else(|| FetchError::TableNotFound(table.to_string()))
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SNAPSHOT: &str = r#"{
        "tables": [
            {
                "schema": "ERP",
                "table": "ORDERS",
                "columns": [
                    {"name": "ORDER_NO", "type_name": "VARCHAR", "length": 20, "nullable": false}
                ]
            }
        ]
    }"#;

    #[tokio::test]
    async fn reads_tables_from_json() {
        let catalog = SnapshotCatalog::from_json(SNAPSHOT).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.captured_at().is_none());

        let orders = catalog.describe_table(&TableIdentifier::new("erp", "orders")).await.unwrap();
        assert_eq!(orders.columns[0].length, Some(20));
        assert!(orders.constraints.is_empty());
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        assert!(matches!(
            SnapshotCatalog::from_json("{\"tables\": 3}"),
            Err(FetchError::InvalidSnapshot(_))
        ));
    }

    #[tokio::test]
    async fn reads_snapshot_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SNAPSHOT.as_bytes()).unwrap();

        let catalog = SnapshotCatalog::from_file(file.path()).unwrap();
        assert!(catalog.describe_table(&TableIdentifier::new("ERP", "CUSTOMERS")).await.is_err());
        assert!(SnapshotCatalog::from_file(file.path().with_extension("missing")).is_err());
    }
}
