//! Document model and the document database abstraction.
//!
//! Documents are exchanged as JSON objects. Store implementations are
//! responsible for mapping their native representation (for example BSON
//! extended JSON) onto this shape without losing identifier types.

use crate::error::Result;
use serde_json::{Map, Value};
use std::fmt;

/// A structured record from a document collection.
pub type Document = Map<String, Value>;

/// Field holding a document's primary identifier.
pub const ID_FIELD: &str = "_id";
/// Domain key component: owning workspace.
pub const WORKSPACE_FIELD: &str = "workspace";
/// Domain key component: tag path.
pub const PATH_FIELD: &str = "path";
/// Foreign key from a values document to its metadata document.
pub const METADATA_ID_FIELD: &str = "metadataId";

/// Streaming iterator over the documents of a collection.
pub type DocumentIter<'a> = Box<dyn Iterator<Item = Result<Document>> + 'a>;

/// Identifies a logically unique metadata record independent of its storage id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainKey {
    pub workspace: Value,
    pub path: Value,
}

impl DomainKey {
    pub fn new(workspace: impl Into<Value>, path: impl Into<Value>) -> Self {
        Self {
            workspace: workspace.into(),
            path: path.into(),
        }
    }

    /// Extracts the key from a document; `None` if either field is missing.
    pub fn of(document: &Document) -> Option<Self> {
        Some(Self {
            workspace: document.get(WORKSPACE_FIELD)?.clone(),
            path: document.get(PATH_FIELD)?.clone(),
        })
    }

    /// Whether a document carries exactly this key.
    pub fn matches(&self, document: &Document) -> bool {
        document.get(WORKSPACE_FIELD) == Some(&self.workspace)
            && document.get(PATH_FIELD) == Some(&self.path)
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.workspace, self.path)
    }
}

/// Collision between a source and a destination metadata document sharing a
/// domain key. Lives only for the duration of one merge step.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataConflict {
    pub source_id: Value,
    pub destination_id: Value,
}

/// Result of inserting a single document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A document with the same primary identifier already exists.
    DuplicateId,
}

/// Returns the primary identifier of a document.
pub fn document_id(document: &Document) -> Option<&Value> {
    document.get(ID_FIELD)
}

/// Renders a document's identifier for messages.
pub fn describe_id(document: &Document) -> String {
    document_id(document).map_or_else(|| "<no _id>".to_string(), Value::to_string)
}

/// Access to one database of a running document database engine.
///
/// Mutating methods take `&mut self`; a run owns its database handles
/// exclusively.
pub trait DocumentDatabase {
    /// Database name, used in log messages.
    fn name(&self) -> &str;

    /// Iterates every document of a collection.
    fn documents(&self, collection: &str) -> Result<DocumentIter<'_>>;

    /// Finds one document carrying the given domain key.
    fn find_by_domain_key(&self, collection: &str, key: &DomainKey) -> Result<Option<Document>>;

    /// Inserts a document, reporting an identifier collision instead of failing.
    fn insert_one(&mut self, collection: &str, document: Document) -> Result<InsertOutcome>;

    /// Points every document whose `field` equals `from` at `to`. Returns the
    /// number of documents rewritten.
    fn relink(&mut self, collection: &str, field: &str, from: &Value, to: &Value) -> Result<u64>;

    /// Counts documents lacking `field`.
    fn count_missing_field(&self, collection: &str, field: &str) -> Result<u64>;
}
