//! Database-side collaborators for schema changes
//!
//! Physical table descriptions come from a [`SchemaCatalog`]: an in-memory
//! [`MockCatalog`] for tests, or a [`SnapshotCatalog`] read from a JSON
//! capture of the database catalog. DDL plans run through a
//! [`StatementExecutor`] with [`run_plan`], which stops at the first failed
//! step.
//!
//! ```rust,ignore
//! use dsxlens_catalog::{SchemaCatalog, SnapshotCatalog, TableIdentifier};
//!
//! let catalog = SnapshotCatalog::from_file("fixtures/catalog/erp.json")?;
//! let orders = catalog.describe_table(&TableIdentifier::new("ERP", "ORDERS")).await?;
//! ```

pub mod adapter;
pub mod mock;
pub mod snapshot;
pub mod executor;

pub use adapter::{FetchError, SchemaCatalog, TableIdentifier};
pub use mock::{MockCatalog, MockCatalogBuilder};
pub use snapshot::{CatalogSnapshot, SnapshotCatalog};
pub use executor::{run_plan, ExecuteError, PlanRun, RecordingExecutor, StatementExecutor};
