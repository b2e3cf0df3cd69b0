//! Conflict-aware merge of tag history between two databases of one engine.
//!
//! Repairs installations whose history was written to the wrong database.
//! The values collection is copied first, then metadata. A source metadata
//! document whose domain key already exists in the destination is not
//! copied; instead every values document pointing at it is relinked to the
//! surviving destination document, so no history is lost and no duplicate
//! metadata is created.
//!
//! Re-running the merge is safe: identifier collisions are skipped.

use slmigrate_core::document::{METADATA_ID_FIELD, WORKSPACE_FIELD, describe_id, document_id};
use slmigrate_core::{
    Document, DocumentDatabase, DomainKey, InsertOutcome, MetadataConflict, MigrationError, Result,
};

/// Collection holding one document per tag.
pub const METADATA_COLLECTION: &str = "metadata";
/// Collection holding history points referencing metadata by `metadataId`.
pub const VALUES_COLLECTION: &str = "values";

/// Counters for one merge run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub values_inserted: u64,
    pub values_skipped: u64,
    pub metadata_inserted: u64,
    pub metadata_skipped: u64,
    pub conflicts_resolved: u64,
    pub values_relinked: u64,
}

/// Merges the history collections of `source` into `destination`.
pub struct HistoryMerge<'a> {
    source: &'a dyn DocumentDatabase,
    destination: &'a mut dyn DocumentDatabase,
}

impl<'a> HistoryMerge<'a> {
    pub fn new(
        source: &'a dyn DocumentDatabase,
        destination: &'a mut dyn DocumentDatabase,
    ) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Runs the readiness check, then merges values and metadata.
    pub fn run(mut self) -> Result<MergeReport> {
        self.check_readiness()?;

        tracing::info!(
            "Merging tag history from '{}' into '{}'",
            self.source.name(),
            self.destination.name()
        );
        let mut report = MergeReport::default();
        self.migrate_values(&mut report)?;
        self.migrate_metadata(&mut report)?;

        tracing::info!(
            "Tag history merge complete: {} values inserted ({} already present), \
             {} metadata inserted ({} already present), {} conflicts resolved, {} values relinked",
            report.values_inserted,
            report.values_skipped,
            report.metadata_inserted,
            report.metadata_skipped,
            report.conflicts_resolved,
            report.values_relinked
        );
        Ok(report)
    }

    /// Fails unless every destination metadata document carries a workspace.
    ///
    /// Missing workspaces mean the destination predates workspace support,
    /// and merging into it would mix keyed and unkeyed documents.
    pub fn check_readiness(&self) -> Result<()> {
        let unready = self
            .destination
            .count_missing_field(METADATA_COLLECTION, WORKSPACE_FIELD)?;
        if unready > 0 {
            return Err(MigrationError::MergeReadiness(format!(
                "{} metadata document(s) in database '{}' have no '{}' field. \
                 Update the TagHistorian service configuration to point at the tag history \
                 database of this instance, restart the services, then run the repair again",
                unready,
                self.destination.name(),
                WORKSPACE_FIELD
            )));
        }
        Ok(())
    }

    /// Copies every values document; documents already present are skipped.
    pub fn migrate_values(&mut self, report: &mut MergeReport) -> Result<()> {
        let source = self.source;
        for document in source.documents(VALUES_COLLECTION)? {
            match insert(&mut *self.destination, VALUES_COLLECTION, document?)? {
                InsertOutcome::Inserted => report.values_inserted += 1,
                InsertOutcome::DuplicateId => report.values_skipped += 1,
            }
        }
        Ok(())
    }

    /// Copies metadata documents, resolving domain key conflicts by relinking
    /// history instead of inserting.
    pub fn migrate_metadata(&mut self, report: &mut MergeReport) -> Result<()> {
        let source = self.source;
        for document in source.documents(METADATA_COLLECTION)? {
            let document = document?;
            match self.identify_conflict(&document)? {
                None => match insert(&mut *self.destination, METADATA_COLLECTION, document)? {
                    InsertOutcome::Inserted => report.metadata_inserted += 1,
                    InsertOutcome::DuplicateId => report.metadata_skipped += 1,
                },
                // The document itself was merged by an earlier run.
                Some(conflict) if conflict.source_id == conflict.destination_id => {
                    report.metadata_skipped += 1;
                }
                Some(conflict) => {
                    tracing::info!(
                        "Conflict found: source_id={} destination_id={}",
                        conflict.source_id,
                        conflict.destination_id
                    );
                    report.values_relinked += self.merge_history(&conflict)?;
                    report.conflicts_resolved += 1;
                }
            }
        }
        Ok(())
    }

    /// Finds the destination document sharing `source_document`'s domain key.
    pub fn identify_conflict(&self, source_document: &Document) -> Result<Option<MetadataConflict>> {
        let malformed = || MigrationError::MalformedDocument {
            collection: METADATA_COLLECTION.to_string(),
            id: describe_id(source_document),
        };
        let key = DomainKey::of(source_document).ok_or_else(malformed)?;
        let source_id = document_id(source_document).ok_or_else(malformed)?;

        let Some(existing) = self
            .destination
            .find_by_domain_key(METADATA_COLLECTION, &key)?
        else {
            return Ok(None);
        };
        let destination_id = document_id(&existing).ok_or_else(|| {
            MigrationError::MalformedDocument {
                collection: METADATA_COLLECTION.to_string(),
                id: describe_id(&existing),
            }
        })?;

        Ok(Some(MetadataConflict {
            source_id: source_id.clone(),
            destination_id: destination_id.clone(),
        }))
    }

    /// Points every destination values document at the surviving metadata.
    fn merge_history(&mut self, conflict: &MetadataConflict) -> Result<u64> {
        let relinked = self.destination.relink(
            VALUES_COLLECTION,
            METADATA_ID_FIELD,
            &conflict.source_id,
            &conflict.destination_id,
        )?;
        tracing::debug!(
            "Relinked {} values from {} to {}",
            relinked,
            conflict.source_id,
            conflict.destination_id
        );
        Ok(relinked)
    }
}

fn insert(
    destination: &mut dyn DocumentDatabase,
    collection: &str,
    document: Document,
) -> Result<InsertOutcome> {
    let id = describe_id(&document);
    let outcome = destination.insert_one(collection, document)?;
    match outcome {
        InsertOutcome::Inserted => tracing::debug!("Migrated {} {}", collection, id),
        InsertOutcome::DuplicateId => {
            tracing::warn!("Document {} already exists in {}, skipping", id, collection)
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDatabase;
    use serde_json::{Value, json};

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn source() -> MemoryDatabase {
        MemoryDatabase::new("admin")
    }

    fn destination() -> MemoryDatabase {
        MemoryDatabase::new("nitaghistorian")
    }

    #[test]
    fn test_conflict_relinks_history_to_surviving_metadata() {
        let src = source()
            .with_documents(
                METADATA_COLLECTION,
                vec![doc(json!({"_id": "S1", "workspace": "W", "path": "P", "origin": "src"}))],
            )
            .with_documents(
                VALUES_COLLECTION,
                vec![doc(json!({"_id": "V1", "metadataId": "S1", "value": 42}))],
            );
        let mut dst = destination().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P", "origin": "dst"}))],
        );

        let report = HistoryMerge::new(&src, &mut dst).run().unwrap();

        let metadata = dst.collection(METADATA_COLLECTION);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata[0], doc(json!({"_id": "D1", "workspace": "W", "path": "P", "origin": "dst"})));

        let values = dst.collection(VALUES_COLLECTION);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["metadataId"], json!("D1"));
        assert!(values.iter().all(|v| v["metadataId"] != json!("S1")));

        assert_eq!(report.conflicts_resolved, 1);
        assert_eq!(report.values_relinked, 1);
        assert_eq!(report.metadata_inserted, 0);
    }

    #[test]
    fn test_conflict_relinks_every_referencing_value() {
        let src = source()
            .with_documents(
                METADATA_COLLECTION,
                vec![doc(json!({"_id": "S1", "workspace": "W", "path": "P"}))],
            )
            .with_documents(
                VALUES_COLLECTION,
                (1..=3).map(|i| doc(json!({"_id": i, "metadataId": "S1"}))),
            );
        let mut dst = destination().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P"}))],
        );

        let report = HistoryMerge::new(&src, &mut dst).run().unwrap();

        assert_eq!(report.values_relinked, 3);
        assert!(dst
            .collection(VALUES_COLLECTION)
            .iter()
            .all(|v| v["metadataId"] == json!("D1")));
    }

    #[test]
    fn test_no_conflict_inserts_source_metadata() {
        let src = source().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "S2", "workspace": "W2", "path": "P2"}))],
        );
        let mut dst = destination().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P"}))],
        );

        let report = HistoryMerge::new(&src, &mut dst).run().unwrap();

        let matching: Vec<_> = dst
            .collection(METADATA_COLLECTION)
            .iter()
            .filter(|d| DomainKey::new("W2", "P2").matches(d))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(matching[0]["_id"], json!("S2"));
        assert_eq!(report.metadata_inserted, 1);
        assert_eq!(report.conflicts_resolved, 0);
    }

    #[test]
    fn test_values_rerun_is_a_no_op() {
        let src = source().with_documents(
            VALUES_COLLECTION,
            vec![
                doc(json!({"_id": "V1", "metadataId": "M"})),
                doc(json!({"_id": "V2", "metadataId": "M"})),
            ],
        );
        let mut dst = destination();

        let mut first = MergeReport::default();
        HistoryMerge::new(&src, &mut dst)
            .migrate_values(&mut first)
            .unwrap();
        let mut second = MergeReport::default();
        HistoryMerge::new(&src, &mut dst)
            .migrate_values(&mut second)
            .unwrap();

        assert_eq!(dst.collection(VALUES_COLLECTION).len(), 2);
        assert_eq!(first.values_inserted, 2);
        assert_eq!(second.values_inserted, 0);
        assert_eq!(second.values_skipped, 2);
    }

    #[test]
    fn test_full_rerun_does_not_duplicate_or_fail() {
        let src = source()
            .with_documents(
                METADATA_COLLECTION,
                vec![
                    doc(json!({"_id": "S1", "workspace": "W", "path": "P"})),
                    doc(json!({"_id": "S2", "workspace": "W2", "path": "P2"})),
                ],
            )
            .with_documents(
                VALUES_COLLECTION,
                vec![
                    doc(json!({"_id": "V1", "metadataId": "S1"})),
                    doc(json!({"_id": "V2", "metadataId": "S2"})),
                ],
            );
        let mut dst = destination().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P"}))],
        );

        HistoryMerge::new(&src, &mut dst).run().unwrap();
        let after_first = dst.clone();
        let report = HistoryMerge::new(&src, &mut dst).run().unwrap();

        assert_eq!(
            dst.collection(METADATA_COLLECTION),
            after_first.collection(METADATA_COLLECTION)
        );
        assert_eq!(dst.collection(VALUES_COLLECTION).len(), 2);
        assert_eq!(report.metadata_inserted, 0);
        assert_eq!(report.values_inserted, 0);
        // The existing copy of V1 keeps its relinked reference.
        let v1 = dst
            .collection(VALUES_COLLECTION)
            .iter()
            .find(|v| v["_id"] == json!("V1"))
            .unwrap();
        assert_eq!(v1["metadataId"], json!("D1"));
    }

    #[test]
    fn test_unready_destination_aborts_before_any_write() {
        let src = source()
            .with_documents(
                METADATA_COLLECTION,
                vec![doc(json!({"_id": "S1", "workspace": "W", "path": "P"}))],
            )
            .with_documents(VALUES_COLLECTION, vec![doc(json!({"_id": "V1", "metadataId": "S1"}))]);
        let mut dst = destination().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "D0", "path": "legacy"}))],
        );
        let before = dst.clone();

        let err = HistoryMerge::new(&src, &mut dst).run().unwrap_err();

        assert!(matches!(err, MigrationError::MergeReadiness(_)));
        assert!(err.is_fatal());
        assert!(err.to_string().contains("nitaghistorian"));
        assert_eq!(dst, before);
    }

    #[test]
    fn test_source_metadata_without_domain_key_is_malformed() {
        let src = source().with_documents(
            METADATA_COLLECTION,
            vec![doc(json!({"_id": "S9", "path": "P"}))],
        );
        let mut dst = destination();

        let err = HistoryMerge::new(&src, &mut dst).run().unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MalformedDocument { ref id, .. } if id.contains("S9")
        ));
    }
}
