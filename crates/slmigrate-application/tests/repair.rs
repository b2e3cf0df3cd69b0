use serde_json::{Value, json};
use slmigrate_application::{MigrationFacilitator, RepairRequest};
use slmigrate_core::{
    Document, DocumentDatabase, DocumentIter, DomainKey, InsertOutcome, MigrationError, Result,
};
use slmigrate_infrastructure::dump::recording::RecordingRunner;
use slmigrate_infrastructure::{
    DatabaseConnector, DumpProcessController, EngineSettings, MemoryDatabase, MigrationDirectory,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// A memory database shared between the connector and the test.
#[derive(Clone)]
struct SharedDatabase {
    name: String,
    inner: Arc<Mutex<MemoryDatabase>>,
}

impl SharedDatabase {
    fn new(database: MemoryDatabase) -> Self {
        Self {
            name: database.name().to_string(),
            inner: Arc::new(Mutex::new(database)),
        }
    }

    fn collection(&self, collection: &str) -> Vec<Document> {
        self.inner.lock().unwrap().collection(collection).to_vec()
    }
}

impl DocumentDatabase for SharedDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn documents(&self, collection: &str) -> Result<DocumentIter<'_>> {
        let guard = self.inner.lock().unwrap();
        let documents: Vec<Result<Document>> = guard.documents(collection)?.collect();
        Ok(Box::new(documents.into_iter()))
    }

    fn find_by_domain_key(&self, collection: &str, key: &DomainKey) -> Result<Option<Document>> {
        self.inner.lock().unwrap().find_by_domain_key(collection, key)
    }

    fn insert_one(&mut self, collection: &str, document: Document) -> Result<InsertOutcome> {
        self.inner.lock().unwrap().insert_one(collection, document)
    }

    fn relink(&mut self, collection: &str, field: &str, from: &Value, to: &Value) -> Result<u64> {
        self.inner.lock().unwrap().relink(collection, field, from, to)
    }

    fn count_missing_field(&self, collection: &str, field: &str) -> Result<u64> {
        self.inner.lock().unwrap().count_missing_field(collection, field)
    }
}

#[derive(Default)]
struct Instance {
    databases: BTreeMap<String, SharedDatabase>,
}

impl Instance {
    fn with(mut self, database: MemoryDatabase) -> Self {
        let shared = SharedDatabase::new(database);
        self.databases.insert(shared.name.clone(), shared);
        self
    }

    fn get(&self, name: &str) -> &SharedDatabase {
        &self.databases[name]
    }
}

impl DatabaseConnector for Instance {
    fn open(&self, database: &str) -> Result<Box<dyn DocumentDatabase>> {
        self.databases
            .get(database)
            .cloned()
            .map(|db| Box::new(db) as Box<dyn DocumentDatabase>)
            .ok_or_else(|| MigrationError::store(format!("no database '{}'", database)))
    }
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn request() -> RepairRequest {
    RepairRequest {
        source_database: "admin".into(),
        destination_database: "nitaghistorian".into(),
    }
}

fn facilitator(tmp: &TempDir, runner: &RecordingRunner) -> MigrationFacilitator {
    MigrationFacilitator::new(
        MigrationDirectory::new(tmp.path().join("migration")),
        DumpProcessController::new(EngineSettings::default(), Box::new(runner.clone())),
    )
}

#[test]
fn test_conflict_preserves_referential_integrity() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default()
        .with(
            MemoryDatabase::new("admin")
                .with_documents(
                    "metadata",
                    vec![doc(json!({"_id": "S1", "workspace": "W", "path": "P"}))],
                )
                .with_documents(
                    "values",
                    vec![doc(json!({"_id": "V1", "metadataId": "S1", "value": 1.5}))],
                ),
        )
        .with(MemoryDatabase::new("nitaghistorian").with_documents(
            "metadata",
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P", "keep": true}))],
        ));

    let report = facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .expect("Repair should succeed");
    assert_eq!(report.conflicts_resolved, 1);

    let destination = instance.get("nitaghistorian");
    let metadata = destination.collection("metadata");
    assert_eq!(
        metadata,
        vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P", "keep": true}))]
    );

    let values = destination.collection("values");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0]["metadataId"], json!("D1"));
    assert!(values.iter().all(|v| v["metadataId"] != json!("S1")));
}

#[test]
fn test_merge_without_conflict_inserts() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default()
        .with(MemoryDatabase::new("admin").with_documents(
            "metadata",
            vec![doc(json!({"_id": "S2", "workspace": "W2", "path": "P2"}))],
        ))
        .with(MemoryDatabase::new("nitaghistorian").with_documents(
            "metadata",
            vec![doc(json!({"_id": "D1", "workspace": "W", "path": "P"}))],
        ));

    let report = facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .expect("Repair should succeed");
    assert_eq!(report.metadata_inserted, 1);

    let metadata = instance.get("nitaghistorian").collection("metadata");
    let matching: Vec<_> = metadata
        .iter()
        .filter(|d| d["workspace"] == json!("W2") && d["path"] == json!("P2"))
        .collect();
    assert_eq!(matching.len(), 1);
    assert_eq!(matching[0]["_id"], json!("S2"));
}

#[test]
fn test_repeated_repair_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default()
        .with(
            MemoryDatabase::new("admin")
                .with_documents(
                    "metadata",
                    vec![doc(json!({"_id": "S1", "workspace": "W", "path": "P"}))],
                )
                .with_documents(
                    "values",
                    vec![
                        doc(json!({"_id": "V1", "metadataId": "S1"})),
                        doc(json!({"_id": "V2", "metadataId": "S1"})),
                    ],
                ),
        )
        .with(MemoryDatabase::new("nitaghistorian"));

    let first = facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .expect("First repair should succeed");
    assert_eq!(first.values_inserted, 2);
    let after_first = instance.get("nitaghistorian").collection("values");

    let second = facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .expect("Second repair should not fail on existing identifiers");
    assert_eq!(second.values_inserted, 0);
    assert_eq!(second.values_skipped, 2);
    assert_eq!(second.metadata_inserted, 0);
    assert_eq!(instance.get("nitaghistorian").collection("values"), after_first);
    assert_eq!(instance.get("nitaghistorian").collection("metadata").len(), 1);
}

#[test]
fn test_unready_destination_aborts_without_writes() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default()
        .with(MemoryDatabase::new("admin").with_documents(
            "values",
            vec![doc(json!({"_id": "V1", "metadataId": "S1"}))],
        ))
        .with(MemoryDatabase::new("nitaghistorian").with_documents(
            "metadata",
            vec![doc(json!({"_id": "D1", "path": "P"}))],
        ));

    let err = facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .unwrap_err();
    assert!(matches!(err, MigrationError::MergeReadiness(_)));
    assert!(err.is_fatal());
    assert!(err.to_string().contains("nitaghistorian"));
    assert!(instance.get("nitaghistorian").collection("values").is_empty());
}

#[test]
fn test_repair_releases_engine() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default()
        .with(MemoryDatabase::new("admin"))
        .with(MemoryDatabase::new("nitaghistorian"));

    facilitator(&tmp, &runner)
        .repair_tag_history(&instance, &request())
        .expect("Repair should succeed");
    assert_eq!(runner.spawned().len(), 1);
    assert_eq!(runner.terminated(), 1);

    // Failing to open a database still stops the engine.
    let err = facilitator(&tmp, &runner)
        .repair_tag_history(
            &instance,
            &RepairRequest {
                source_database: "missing".into(),
                destination_database: "nitaghistorian".into(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, MigrationError::Store(_)));
    assert_eq!(runner.terminated(), 2);
}

#[test]
fn test_repair_into_itself_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let runner = RecordingRunner::new();
    let instance = Instance::default().with(MemoryDatabase::new("nitaghistorian"));

    let err = facilitator(&tmp, &runner)
        .repair_tag_history(
            &instance,
            &RepairRequest {
                source_database: "nitaghistorian".into(),
                destination_database: "nitaghistorian".into(),
            },
        )
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(runner.spawned().is_empty());
}
