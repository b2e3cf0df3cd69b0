//! MongoDB backend over the synchronous driver.
//!
//! Documents cross the trait boundary as canonical extended JSON, so
//! `ObjectId`, binary UUIDs and dates survive a read-modify-write unchanged.

use mongodb::bson::{Bson, Document as BsonDocument};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::sync::{Client, Collection, Database};
use serde_json::Value;
use slmigrate_core::document::{PATH_FIELD, WORKSPACE_FIELD};
use slmigrate_core::{
    ConnectionConfig, Document, DocumentDatabase, DocumentIter, DomainKey, InsertOutcome,
    MigrationError, Result,
};

use super::DatabaseConnector;

const DUPLICATE_KEY_CODE: i32 = 11000;

fn store_error(e: MongoError) -> MigrationError {
    MigrationError::store(e.to_string())
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

fn to_bson(value: &Value) -> Result<Bson> {
    Bson::try_from(value.clone())
        .map_err(|e| MigrationError::store(format!("cannot convert {} to BSON: {}", value, e)))
}

fn to_bson_document(document: Document) -> Result<BsonDocument> {
    match to_bson(&Value::Object(document))? {
        Bson::Document(document) => Ok(document),
        other => Err(MigrationError::store(format!(
            "expected a document, got {:?}",
            other.element_type()
        ))),
    }
}

fn to_json_document(document: BsonDocument) -> Result<Document> {
    match Bson::Document(document).into_canonical_extjson() {
        Value::Object(map) => Ok(map),
        other => Err(MigrationError::store(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// Opens a client for the given connection configuration.
pub fn connect(config: &ConnectionConfig) -> Result<Client> {
    match config {
        ConnectionConfig::Discrete {
            host,
            port,
            user,
            password,
            ..
        } => {
            let credential = Credential::builder()
                .username(user.clone())
                .password(password.clone())
                .build();
            let options = ClientOptions::builder()
                .hosts(vec![ServerAddress::Tcp {
                    host: host.clone(),
                    port: Some(*port),
                }])
                .credential(credential)
                .build();
            Client::with_options(options).map_err(store_error)
        }
        ConnectionConfig::Custom {
            connection_string, ..
        } => Client::with_uri_str(connection_string).map_err(store_error),
    }
}

/// Connector over one client, handing out databases of the same instance.
pub struct MongoConnector {
    client: Client,
}

impl MongoConnector {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        Ok(Self {
            client: connect(config)?,
        })
    }
}

impl DatabaseConnector for MongoConnector {
    fn open(&self, database: &str) -> Result<Box<dyn DocumentDatabase>> {
        Ok(Box::new(MongoDatabase::new(&self.client, database)))
    }
}

/// One database of a MongoDB instance.
pub struct MongoDatabase {
    database: Database,
}

impl MongoDatabase {
    pub fn new(client: &Client, name: &str) -> Self {
        Self {
            database: client.database(name),
        }
    }

    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection::<BsonDocument>(name)
    }
}

impl DocumentDatabase for MongoDatabase {
    fn name(&self) -> &str {
        self.database.name()
    }

    fn documents(&self, collection: &str) -> Result<DocumentIter<'_>> {
        let cursor = self
            .collection(collection)
            .find(BsonDocument::new(), None)
            .map_err(store_error)?;
        Ok(Box::new(
            cursor.map(|document| document.map_err(store_error).and_then(to_json_document)),
        ))
    }

    fn find_by_domain_key(&self, collection: &str, key: &DomainKey) -> Result<Option<Document>> {
        let mut filter = BsonDocument::new();
        filter.insert(WORKSPACE_FIELD, to_bson(&key.workspace)?);
        filter.insert(PATH_FIELD, to_bson(&key.path)?);

        self.collection(collection)
            .find_one(filter, None)
            .map_err(store_error)?
            .map(to_json_document)
            .transpose()
    }

    fn insert_one(&mut self, collection: &str, document: Document) -> Result<InsertOutcome> {
        let document = to_bson_document(document)?;
        match self.collection(collection).insert_one(document, None) {
            Ok(_) => Ok(InsertOutcome::Inserted),
            Err(e) if is_duplicate_key(&e) => Ok(InsertOutcome::DuplicateId),
            Err(e) => Err(store_error(e)),
        }
    }

    fn relink(&mut self, collection: &str, field: &str, from: &Value, to: &Value) -> Result<u64> {
        let mut filter = BsonDocument::new();
        filter.insert(field, to_bson(from)?);
        let mut set = BsonDocument::new();
        set.insert(field, to_bson(to)?);
        let mut update = BsonDocument::new();
        update.insert("$set", set);

        let result = self
            .collection(collection)
            .update_many(filter, update, None)
            .map_err(store_error)?;
        Ok(result.modified_count)
    }

    fn count_missing_field(&self, collection: &str, field: &str) -> Result<u64> {
        let mut exists = BsonDocument::new();
        exists.insert("$exists", false);
        let mut filter = BsonDocument::new();
        filter.insert(field, exists);

        self.collection(collection)
            .count_documents(filter, None)
            .map_err(store_error)
    }
}
