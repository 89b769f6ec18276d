use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument as MongoReturnDocument},
    results::UpdateResult as MongoUpdateResult,
};
use docschema_core::{
    backend::{ReturnDocument, StoreBackend, StoreBackendBuilder, UpdateResult},
    error::{StoreError, StoreResult},
    index::{ID_INDEX_NAME, IndexSpec},
};

/// Server error code for a unique index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Maps a driver failure onto the store taxonomy.
///
/// Duplicate key violations become [`StoreError::DocumentAlreadyExists`] when the
/// identity index rejected the write and [`StoreError::DuplicateKey`] otherwise.
fn map_error(err: MongoError, collection: &str, id: Option<&Bson>) -> StoreError {
    let duplicate = match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE => {
            Some(write.message.clone())
        }
        ErrorKind::InsertMany(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.iter().find(|write| write.code == DUPLICATE_KEY_CODE))
            .map(|write| write.message.clone()),
        _ => None,
    };

    let Some(message) = duplicate else {
        return StoreError::Backend(err.to_string());
    };

    match violated_index(&message) {
        Some(index) if index == ID_INDEX_NAME => StoreError::DocumentAlreadyExists(
            id.map(ToString::to_string).unwrap_or(message),
            collection.to_string(),
        ),
        Some(index) => StoreError::DuplicateKey(index, collection.to_string()),
        None => StoreError::DuplicateKey(message, collection.to_string()),
    }
}

/// Extracts the index name from a server message such as
/// `E11000 duplicate key error collection: db.users index: email_1 dup key: ...`.
fn violated_index(message: &str) -> Option<String> {
    let (_, rest) = message.split_once("index: ")?;

    rest.split_whitespace().next().map(str::to_string)
}

fn update_result(result: MongoUpdateResult) -> UpdateResult {
    UpdateResult {
        matched_count: result.matched_count,
        modified_count: result.modified_count,
    }
}

fn return_document(returning: ReturnDocument) -> MongoReturnDocument {
    match returning {
        ReturnDocument::Before => MongoReturnDocument::Before,
        ReturnDocument::After => MongoReturnDocument::After,
    }
}

fn spec_from_model(model: IndexModel) -> Option<IndexSpec> {
    let keys = IndexSpec::keys_from_document(&model.keys)?;
    let options = model.options.unwrap_or_default();

    let mut spec = IndexSpec {
        name: String::new(),
        keys,
        unique: options.unique.unwrap_or(false),
        expire_after_seconds: options.expire_after.map(|ttl| ttl.as_secs()),
    };
    spec.name = options.name.unwrap_or_else(|| spec.default_name());

    Some(spec)
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        let id = document.get("_id").cloned();

        self.get_collection(collection)
            .insert_one(document)
            .await
            .map_err(|e| map_error(e, collection, id.as_ref()))?;

        Ok(())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }

        self.get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| map_error(e, collection, None))?;

        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        self.get_collection(collection)
            .update_one(filter, update)
            .await
            .map(update_result)
            .map_err(|e| map_error(e, collection, None))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        self.get_collection(collection)
            .update_many(filter, update)
            .await
            .map(update_result)
            .map_err(|e| map_error(e, collection, None))
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateResult> {
        let id = replacement.get("_id").cloned();

        self.get_collection(collection)
            .replace_one(filter, replacement)
            .await
            .map(update_result)
            .map_err(|e| map_error(e, collection, id.as_ref()))
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_one(filter)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .deleted_count
        )
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_many(filter)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .deleted_count
        )
    }

    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>> {
        self.get_collection(collection)
            .find(filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one(filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_update(filter, update)
            .return_document(return_document(returning))
            .await
            .map_err(|e| map_error(e, collection, None))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let id = replacement.get("_id").cloned();

        self.get_collection(collection)
            .find_one_and_replace(filter, replacement)
            .return_document(return_document(returning))
            .await
            .map_err(|e| map_error(e, collection, id.as_ref()))
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<Document>> {
        self.get_collection(collection)
            .find_one_and_delete(filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        self.get_collection(collection)
            .count_documents(filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn estimated_count(&self, collection: &str) -> StoreResult<u64> {
        self.get_collection(collection)
            .estimated_document_count()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> StoreResult<Vec<Bson>> {
        self.get_collection(collection)
            .distinct(key, filter)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        let models = match self.get_collection(collection).list_indexes().await {
            Ok(cursor) => cursor
                .try_collect::<Vec<IndexModel>>()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?,
            // A collection that does not exist yet has no indexes.
            Err(e) if matches!(e.kind.as_ref(), ErrorKind::Command(command) if command.code == 26) => {
                Vec::new()
            }
            Err(e) => return Err(StoreError::Backend(e.to_string())),
        };

        Ok(models.into_iter().filter_map(spec_from_model).collect())
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        let mut options = IndexOptions::builder()
            .name(index.name.clone())
            .unique(index.unique)
            .build();
        options.expire_after = index.expire_after_seconds.map(Duration::from_secs);

        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(index.keys_document())
                    .options(options)
                    .build(),
            )
            .await
            .map_err(|e| map_error(e, collection, None))?;

        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn modify_index_ttl(
        &self,
        collection: &str,
        name: &str,
        expire_after_seconds: u64,
    ) -> StoreResult<()> {
        let seconds = i64::try_from(expire_after_seconds)
            .map_err(|_| StoreError::InvalidDocument(format!("TTL {} is out of range", expire_after_seconds)))?;

        self.client
            .database(&self.database)
            .run_command(doc! {
                "collMod": collection,
                "index": { "name": name, "expireAfterSeconds": seconds },
            })
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn shutdown(self) -> StoreResult<()> {
        self.shutdown().await
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(MongoDbStore::new(
            Client::with_options(
                ClientOptions::parse(&self.dsn)
                    .await
                    .map_err(|e| StoreError::Initialization(e.to_string()))?,
            )
            .map_err(|e| StoreError::Initialization(e.to_string()))?,
            self.database,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_violated_index_names() {
        let message = "E11000 duplicate key error collection: app.users index: email_1 dup key: { email: \"a@b.c\" }";

        assert_eq!(violated_index(message).as_deref(), Some("email_1"));
        assert_eq!(violated_index("E11000 duplicate key error"), None);
    }

    #[test]
    fn translates_return_choices() {
        assert!(matches!(return_document(ReturnDocument::Before), MongoReturnDocument::Before));
        assert!(matches!(return_document(ReturnDocument::After), MongoReturnDocument::After));
        assert_eq!(ReturnDocument::default(), ReturnDocument::Before);
    }

    #[test]
    fn reads_index_models_back_into_specs() {
        let model = IndexModel::builder()
            .keys(doc! { "a": 1, "b": -1.0 })
            .options(IndexOptions::builder().unique(true).build())
            .build();

        let spec = spec_from_model(model).unwrap();

        assert_eq!(spec.name, "a_1_b_-1");
        assert!(spec.unique);
        assert_eq!(spec.expire_after_seconds, None);

        let text = IndexModel::builder().keys(doc! { "body": "text" }).build();
        assert!(spec_from_model(text).is_none());
    }
}
