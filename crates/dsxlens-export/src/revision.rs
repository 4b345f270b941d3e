//! Copy-on-write document revisions

use crate::document::JobDocument;
use crate::record::RecordPath;
use serde::{Deserialize, Serialize};

/// One value rewrite inside a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modification {
    pub record_path: RecordPath,

    /// Property whose value changes; the name itself never changes
    pub property: String,

    /// Decoded value the property is expected to hold
    pub old_value: String,

    /// Decoded replacement value
    pub new_value: String,
}

impl Modification {
    pub fn new(
        record_path: RecordPath,
        property: impl Into<String>,
        old_value: impl Into<String>,
        new_value: impl Into<String>,
    ) -> Self {
        Self {
            record_path,
            property: property.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    /// Whether both modifications address the same property
    pub fn same_target(&self, other: &Modification) -> bool {
        self.record_path == other.record_path && self.property.eq_ignore_ascii_case(&other.property)
    }
}

impl std::fmt::Display for Modification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: '{}' -> '{}'",
            self.record_path, self.property, self.old_value, self.new_value
        )
    }
}

/// A new document derived from a base revision
///
/// The base document is never touched; the revision is accepted by the
/// store only while the base is still the current revision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentRevision {
    pub document: JobDocument,

    /// Revision number of the document this one was derived from
    pub base_revision: u64,

    /// Content hash of the base document
    pub base_hash: String,

    /// Applied modifications, in application order
    pub modifications: Vec<Modification>,
}

impl DocumentRevision {
    pub fn job(&self) -> &str {
        &self.document.name
    }
}
