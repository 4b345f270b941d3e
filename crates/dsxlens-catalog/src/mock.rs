//! In-memory catalog for tests
//!
//! Tables are stored by case-insensitive name and returned as registered.
//! Failures can be simulated per table or for the whole connection.
//!
//! ```rust,ignore
//! let catalog = MockCatalog::new();
//! catalog.add_table(orders).await;
//! catalog.add_error_for_table(
//!     TableIdentifier::new("ERP", "SECRET"),
//!     FetchError::PermissionDenied("no grant".into()),
//! ).await;
//! ```

use crate::adapter::{FetchError, SchemaCatalog, TableIdentifier};
use dsxlens_core::{PhysicalReference, PhysicalTable};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct MockCatalog {
    tables: Arc<RwLock<HashMap<PhysicalReference, PhysicalTable>>>,
    errors: Arc<RwLock<HashMap<PhysicalReference, FetchError>>>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::from_tables(Vec::new())
    }

    pub fn from_tables(tables: impl IntoIterator<Item = PhysicalTable>) -> Self {
        Self {
            tables: Arc::new(RwLock::new(tables.into_iter().map(|t| (t.reference(), t)).collect())),
            errors: Arc::new(RwLock::new(HashMap::new())),
            fail_connection: false,
            latency_ms: 0,
        }
    }

    /// Register a table, replacing any earlier description of it
    pub async fn add_table(&self, table: PhysicalTable) {
        self.tables.write().await.insert(table.reference(), table);
    }

    /// Return `error` whenever `table` is described
    pub async fn add_error_for_table(&self, table: TableIdentifier, error: FetchError) {
        self.errors.write().await.insert(table.reference(), error);
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    /// Delay every call by `latency_ms` milliseconds
    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub async fn table_count(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn has_table(&self, table: &TableIdentifier) -> bool {
        self.tables.read().await.contains_key(&table.reference())
    }

    async fn simulate_latency(&self) {
        if self.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.latency_ms)).await;
        }
    }
}

impl Default for MockCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SchemaCatalog for MockCatalog {
    fn name(&self) -> &'static str {
        "Mock"
    }

    async fn describe_table(&self, table: &TableIdentifier) -> Result<PhysicalTable, FetchError> {
        self.simulate_latency().await;

        let key = table.reference();
        if let Some(error) = self.errors.read().await.get(&key) {
            return Err(error.clone());
        }

        self.tables
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| FetchError::TableNotFound(table.to_string()))
    }

    async fn test_connection(&self) -> Result<(), FetchError> {
        self.simulate_latency().await;

        if self.fail_connection {
            Err(FetchError::NetworkError("Simulated connection failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Fluent construction of a [`MockCatalog`]
#[derive(Default)]
pub struct MockCatalogBuilder {
    tables: Vec<PhysicalTable>,
    errors: Vec<(TableIdentifier, FetchError)>,
    fail_connection: bool,
    latency_ms: u64,
}

impl MockCatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: PhysicalTable) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_error(mut self, table: TableIdentifier, error: FetchError) -> Self {
        self.errors.push((table, error));
        self
    }

    pub fn with_connection_failure(mut self) -> Self {
        self.fail_connection = true;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn build(self) -> MockCatalog {
        let errors = self.errors.into_iter().map(|(table, error)| (table.reference(), error)).collect();
        MockCatalog {
            tables: Arc::new(RwLock::new(self.tables.into_iter().map(|t| (t.reference(), t)).collect())),
            errors: Arc::new(RwLock::new(errors)),
            fail_connection: self.fail_connection,
            latency_ms: self.latency_ms,
        }
    }
}
