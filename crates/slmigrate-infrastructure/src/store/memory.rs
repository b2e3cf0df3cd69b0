use serde_json::Value;
use slmigrate_core::document::{ID_FIELD, document_id};
use slmigrate_core::{Document, DocumentDatabase, DocumentIter, DomainKey, InsertOutcome, Result};
use std::collections::BTreeMap;

/// In-memory document database with `_id` uniqueness per collection.
///
/// Documents keep insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryDatabase {
    name: String,
    collections: BTreeMap<String, Vec<Document>>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: BTreeMap::new(),
        }
    }

    /// Seeds a collection, skipping documents whose `_id` already exists.
    pub fn with_documents(
        mut self,
        collection: &str,
        documents: impl IntoIterator<Item = Document>,
    ) -> Self {
        for document in documents {
            self.insert(collection, document);
        }
        self
    }

    /// Documents of a collection; empty if it was never written.
    pub fn collection(&self, collection: &str) -> &[Document] {
        self.collections
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert(&mut self, collection: &str, document: Document) -> InsertOutcome {
        let documents = self.collections.entry(collection.to_string()).or_default();
        if let Some(id) = document_id(&document) {
            if documents.iter().any(|d| d.get(ID_FIELD) == Some(id)) {
                return InsertOutcome::DuplicateId;
            }
        }
        documents.push(document);
        InsertOutcome::Inserted
    }
}

impl DocumentDatabase for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn documents(&self, collection: &str) -> Result<DocumentIter<'_>> {
        Ok(Box::new(self.collection(collection).iter().cloned().map(Ok)))
    }

    fn find_by_domain_key(&self, collection: &str, key: &DomainKey) -> Result<Option<Document>> {
        Ok(self
            .collection(collection)
            .iter()
            .find(|d| key.matches(d))
            .cloned())
    }

    fn insert_one(&mut self, collection: &str, document: Document) -> Result<InsertOutcome> {
        Ok(self.insert(collection, document))
    }

    fn relink(&mut self, collection: &str, field: &str, from: &Value, to: &Value) -> Result<u64> {
        let mut rewritten = 0;
        if let Some(documents) = self.collections.get_mut(collection) {
            for document in documents.iter_mut() {
                if document.get(field) == Some(from) {
                    document.insert(field.to_string(), to.clone());
                    rewritten += 1;
                }
            }
        }
        Ok(rewritten)
    }

    fn count_missing_field(&self, collection: &str, field: &str) -> Result<u64> {
        Ok(self
            .collection(collection)
            .iter()
            .filter(|d| !d.contains_key(field))
            .count() as u64)
    }
}
