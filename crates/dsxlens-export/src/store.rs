//! Shared document store
//!
//! Holds the current revision of every loaded job. Documents are handed out
//! as `Arc<JobDocument>` so readers never block writers for longer than a
//! map lookup.

use crate::document::{ExportHeader, JobDocument};
use crate::parser::{parse_documents, ParseError};
use crate::revision::DocumentRevision;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Revision history conflict
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("revision of '{job}' is based on revision {base}, but the store holds revision {current}")]
    StaleRevision { job: String, base: u64, current: u64 },

    #[error("revision of '{job}' was planned against content that has since been reloaded")]
    BaseChanged { job: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("job '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

/// Result of loading one export text
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// Documents inserted into the store, in file order
    pub documents: Vec<Arc<JobDocument>>,

    /// Blocks that failed to parse
    pub errors: Vec<ParseError>,

    /// Last export header of the text
    pub header: Option<ExportHeader>,
}

#[derive(Debug, Default)]
struct StoreInner {
    documents: HashMap<String, Arc<JobDocument>>,

    /// Job names in first-load order
    order: Vec<String>,
}

impl StoreInner {
    fn insert(&mut self, document: Arc<JobDocument>) {
        if !self.documents.contains_key(&document.name) {
            self.order.push(document.name.clone());
        }
        self.documents.insert(document.name.clone(), document);
    }
}

/// Thread-safe store of current job documents
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
    generation: AtomicU64,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `text` and insert every valid document, replacing same-named ones
    pub fn load(&self, text: &str) -> LoadOutcome {
        let mut stream = parse_documents(text);
        let mut outcome = LoadOutcome::default();

        for result in stream.by_ref() {
            match result {
                Ok(document) => outcome.documents.push(Arc::new(document)),
                Err(error) => outcome.errors.push(error),
            }
        }
        outcome.header = stream.header().cloned();

        if !outcome.documents.is_empty() {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            for document in &outcome.documents {
                inner.insert(Arc::clone(document));
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        tracing::info!(
            documents = outcome.documents.len(),
            errors = outcome.errors.len(),
            "loaded export text"
        );

        outcome
    }

    /// Load a file from disk
    pub fn load_file(&self, path: &std::path::Path) -> Result<LoadOutcome, std::io::Error> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading export file");
        Ok(self.load(&text))
    }

    /// Current revision of a job
    pub fn get(&self, name: &str) -> Result<Arc<JobDocument>, StoreError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .documents
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Install a revision of job `name`
    ///
    /// Accepted only when the revision was derived from the revision the
    /// store currently holds, which keeps one linear history per job.
    pub fn replace(&self, name: &str, revision: &DocumentRevision) -> Result<Arc<JobDocument>, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let current = inner
            .documents
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        if current.revision != revision.base_revision {
            return Err(ConflictError::StaleRevision {
                job: name.to_string(),
                base: revision.base_revision,
                current: current.revision,
            }
            .into());
        }
        if current.hash != revision.base_hash {
            return Err(ConflictError::BaseChanged { job: name.to_string() }.into());
        }

        let document = Arc::new(revision.document.clone());
        if document.name != name {
            inner.documents.remove(name);
            if let Some(slot) = inner.order.iter_mut().find(|n| n.as_str() == name) {
                *slot = document.name.clone();
            }
        }
        inner.documents.insert(document.name.clone(), Arc::clone(&document));
        self.generation.fetch_add(1, Ordering::SeqCst);

        tracing::info!(job = %document.name, revision = document.revision, "stored new revision");

        Ok(document)
    }

    /// All current documents in first-load order
    pub fn documents(&self) -> Vec<Arc<JobDocument>> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|name| inner.documents.get(name).cloned())
            .collect()
    }

    pub fn job_names(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Incremented on every successful load or replace
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}
