//! The persistence façade for one record type.
//!
//! A [`Collection`] binds a top-level [`RecordSchema`] to a store backend. Every
//! method is either *coerce-then-delegate* (records are built and checked before
//! the backend sees anything) or *delegate-then-wrap* (stored documents are turned
//! into loaded records on the way out).
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::{diff::SaveOptions, store::DocumentStore};
//! use bson::doc;
//!
//! # async fn example(store: &DocumentStore<impl docschema_core::backend::StoreBackend>, posts: std::sync::Arc<docschema_core::schema::RecordSchema>) -> docschema_core::error::ModelResult<()> {
//! let posts = store.collection(&posts).await?;
//!
//! let mut post = posts.insert_one(doc! { "title": "Hello" }).await?;
//! post.set("title", "Hello, world")?;
//! posts.save(&mut post, SaveOptions::default()).await?;
//!
//! let found = posts.find(doc! { "title": "Hello, world" }).await?;
//! # Ok(()) }
//! ```

use bson::{Bson, Document, doc};
use std::sync::Arc;

use crate::{
    backend::{ReturnDocument, StoreBackend, UpdateResult},
    coerce::Coercer,
    diff::{SaveOptions, UpdateDescriptor, WritePlan, plan_save, stored_identity},
    error::{ModelError, ModelResult, StoreError},
    index::{IndexAction, plan_index_sync},
    record::{Record, RecordState},
    schema::RecordSchema,
    update::{clean_update, resolve_path},
    value::Value,
};

/// What a call to [`Collection::save`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// A new document was stored under this `_id`.
    Inserted(Bson),
    /// An atomic partial update was applied.
    Updated(UpdateDescriptor),
    /// The whole document was replaced.
    Replaced,
    /// Nothing had changed, so nothing was written.
    Unchanged,
}

/// A record type's collection, with a reference to a storage backend.
///
/// # Type Parameters
///
/// * `'a` - Lifetime of the backend reference
/// * `B` - The storage backend type
#[derive(Debug)]
pub struct Collection<'a, B: StoreBackend> {
    schema: Arc<RecordSchema>,
    name: String,
    backend: &'a B,
}

impl<'a, B: StoreBackend> Collection<'a, B> {
    /// Binds `schema` to `backend`. Embeddable schemas have no collection and are
    /// rejected.
    pub(crate) fn new(schema: &Arc<RecordSchema>, backend: &'a B) -> ModelResult<Self> {
        let name = schema.collection().ok_or_else(|| {
            ModelError::SchemaDefinition(format!(
                "{:?} is an embeddable record type and has no collection",
                schema.name()
            ))
        })?;

        Ok(Self {
            schema: Arc::clone(schema),
            name: name.to_string(),
            backend,
        })
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    /// Builds a record from `fields` and inserts it.
    ///
    /// # Errors
    ///
    /// Coercion errors and [`ModelError::RequiredField`] are raised before the
    /// backend is called; backend errors are passed through.
    pub async fn insert_one<I, K, V>(&self, fields: I) -> ModelResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut record = Record::new(&self.schema, fields)?;
        self.save(&mut record, SaveOptions::default()).await?;
        Ok(record)
    }

    /// Builds and checks every record first, then inserts them in one batch.
    /// Nothing is written if any record fails.
    pub async fn insert_many<I, F, K, V>(&self, items: I) -> ModelResult<Vec<Record>>
    where
        I: IntoIterator<Item = F>,
        F: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let mut records = Vec::new();
        let mut ids = Vec::new();
        let mut documents = Vec::new();

        for fields in items {
            let record = Record::new(&self.schema, fields)?;
            let WritePlan::Insert { id, document } = plan_save(&record, SaveOptions::default())?
            else {
                return Err(ModelError::InvalidState(
                    "a freshly built record must plan an insert".to_string(),
                ));
            };
            records.push(record);
            ids.push(id);
            documents.push(document);
        }

        if documents.is_empty() {
            return Ok(records);
        }

        tracing::debug!(collection = %self.name, count = documents.len(), "Inserting documents");
        self.backend.insert_many(&self.name, documents).await?;

        for (record, id) in records.iter_mut().zip(ids) {
            record.assign_id(id);
            record.mark_persisted();
        }
        Ok(records)
    }

    /// Returns every record matching `filter` as a loaded record.
    pub async fn find(&self, filter: Document) -> ModelResult<Vec<Record>> {
        let documents = self.backend.find(&self.name, filter).await?;

        let mut coercer = Coercer::new();
        documents
            .into_iter()
            .map(|document| coercer.load(&self.schema, document))
            .collect()
    }

    /// Returns the first record matching `filter`, if any.
    pub async fn find_one(&self, filter: Document) -> ModelResult<Option<Record>> {
        self.backend
            .find_one(&self.name, filter)
            .await?
            .map(|document| Record::from_document(&self.schema, document))
            .transpose()
    }

    pub async fn count(&self, filter: Document) -> ModelResult<u64> {
        Ok(self.backend.count(&self.name, filter).await?)
    }

    /// Counts every document of the collection from the store's metadata where
    /// the backend keeps it.
    pub async fn estimated_document_count(&self) -> ModelResult<u64> {
        Ok(self.backend.estimated_count(&self.name).await?)
    }

    /// The distinct values at the dotted wire path `key` among the documents
    /// matching `filter`.
    pub async fn distinct(&self, key: &str, filter: Document) -> ModelResult<Vec<Bson>> {
        resolve_path(&self.schema, key)?;
        Ok(self.backend.distinct(&self.name, key, filter).await?)
    }

    /// Deletes the first document matching `filter`, returning how many were
    /// removed.
    pub async fn delete_one(&self, filter: Document) -> ModelResult<u64> {
        let deleted = self.backend.delete_one(&self.name, filter).await?;
        tracing::debug!(collection = %self.name, deleted, "Deleted document");
        Ok(deleted)
    }

    /// Deletes every document matching `filter`, returning how many were removed.
    pub async fn delete_many(&self, filter: Document) -> ModelResult<u64> {
        let deleted = self.backend.delete_many(&self.name, filter).await?;
        tracing::debug!(collection = %self.name, deleted, "Deleted documents");
        Ok(deleted)
    }

    /// Checks `update` against the schema, then applies it to the first document
    /// matching `filter`.
    ///
    /// # Errors
    ///
    /// Everything [`clean_update`] raises, before the backend is called; backend
    /// errors are passed through.
    pub async fn update_one(&self, filter: Document, update: Document) -> ModelResult<UpdateResult> {
        let update = clean_update(&self.schema, update)?;
        tracing::debug!(collection = %self.name, update = %update, "Updating document");
        Ok(self.backend.update_one(&self.name, filter, update).await?)
    }

    /// Checks `update` against the schema, then applies it to every document
    /// matching `filter`.
    pub async fn update_many(&self, filter: Document, update: Document) -> ModelResult<UpdateResult> {
        let update = clean_update(&self.schema, update)?;
        tracing::debug!(collection = %self.name, update = %update, "Updating documents");
        Ok(self.backend.update_many(&self.name, filter, update).await?)
    }

    /// Builds a record from `fields` and stores it in place of the first
    /// document matching `filter`.
    ///
    /// # Errors
    ///
    /// Coercion errors and [`ModelError::RequiredField`] are raised before the
    /// backend is called.
    pub async fn replace_one<I, K, V>(&self, filter: Document, fields: I) -> ModelResult<UpdateResult>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let replacement = self.replacement(fields)?;
        tracing::debug!(collection = %self.name, "Replacing document");
        Ok(self.backend.replace_one(&self.name, filter, replacement).await?)
    }

    /// Checks `update`, applies it to the first document matching `filter` and
    /// loads the version of that document chosen by `returning`.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
    ) -> ModelResult<Option<Record>> {
        let update = clean_update(&self.schema, update)?;
        tracing::debug!(collection = %self.name, update = %update, "Updating document");
        let document = self
            .backend
            .find_one_and_update(&self.name, filter, update, returning)
            .await?;

        self.load_optional(document)
    }

    /// Builds a record from `fields`, stores it in place of the first document
    /// matching `filter` and loads the version chosen by `returning`.
    pub async fn find_one_and_replace<I, K, V>(
        &self,
        filter: Document,
        fields: I,
        returning: ReturnDocument,
    ) -> ModelResult<Option<Record>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let replacement = self.replacement(fields)?;
        tracing::debug!(collection = %self.name, "Replacing document");
        let document = self
            .backend
            .find_one_and_replace(&self.name, filter, replacement, returning)
            .await?;

        self.load_optional(document)
    }

    /// Deletes the first document matching `filter` and returns it as a loaded
    /// record.
    pub async fn find_one_and_delete(&self, filter: Document) -> ModelResult<Option<Record>> {
        let document = self.backend.find_one_and_delete(&self.name, filter).await?;
        tracing::debug!(collection = %self.name, deleted = document.is_some(), "Deleted document");

        self.load_optional(document)
    }

    /// Persists `record`: a new record is inserted, a loaded one is updated with
    /// its changes or, with [`SaveOptions::full_update`], replaced.
    ///
    /// The record's baseline moves forward only when the backend reports success,
    /// so a failed save can be retried and computes the same write.
    ///
    /// # Errors
    ///
    /// - [`ModelError::RequiredField`] when required fields are absent
    /// - [`ModelError::InvalidState`] for deleted records, records of another type,
    ///   loaded records without an `_id`, or records whose `_id` was changed
    /// - [`ModelError::Store`] for backend failures, unchanged, and
    ///   [`StoreError::DocumentNotFound`] when the stored document has vanished
    pub async fn save(&self, record: &mut Record, options: SaveOptions) -> ModelResult<SaveOutcome> {
        self.check_owner(record)?;

        let outcome = match plan_save(record, options)? {
            WritePlan::Insert { id, document } => {
                tracing::debug!(collection = %self.name, id = %id, "Inserting document");
                self.backend.insert_one(&self.name, document).await?;
                record.assign_id(id.clone());
                SaveOutcome::Inserted(id)
            }
            WritePlan::Update { id, update } => {
                tracing::debug!(
                    collection = %self.name,
                    id = %id,
                    update = %update.to_update_document(),
                    "Updating document"
                );
                let result = self
                    .backend
                    .update_one(&self.name, doc! { "_id": id.clone() }, update.to_update_document())
                    .await?;
                self.check_matched(result, &id)?;
                SaveOutcome::Updated(update)
            }
            WritePlan::Replace { id, document } => {
                tracing::debug!(collection = %self.name, id = %id, "Replacing document");
                let result = self
                    .backend
                    .replace_one(&self.name, doc! { "_id": id.clone() }, document)
                    .await?;
                self.check_matched(result, &id)?;
                SaveOutcome::Replaced
            }
            WritePlan::Noop => {
                tracing::debug!(collection = %self.name, "No changes to save");
                return Ok(SaveOutcome::Unchanged);
            }
        };

        record.mark_persisted();
        Ok(outcome)
    }

    /// Removes a stored record, addressed by the `_id` it was loaded or last
    /// saved under. Afterwards the record can no longer be saved.
    ///
    /// A record whose `_id` was changed since is refused with
    /// [`ModelError::InvalidState`]. A document already gone is not an error.
    pub async fn delete(&self, record: &mut Record) -> ModelResult<()> {
        self.check_owner(record)?;

        match record.state() {
            RecordState::New => {
                return Err(ModelError::InvalidState(
                    "a record that was never saved cannot be deleted".to_string(),
                ));
            }
            RecordState::Deleted => {
                return Err(ModelError::InvalidState(
                    "the record has already been deleted".to_string(),
                ));
            }
            RecordState::Loaded => {}
        }

        let id = stored_identity(record)?;

        tracing::debug!(collection = %self.name, id = %id, "Deleting document");
        self.backend
            .delete_one(&self.name, doc! { "_id": id })
            .await?;
        record.mark_deleted();
        Ok(())
    }

    /// Reconciles the backend's indexes with the declared ones and returns the
    /// actions taken.
    pub async fn sync_indexes(&self) -> ModelResult<Vec<IndexAction>> {
        let existing = self.backend.list_indexes(&self.name).await?;
        let actions = plan_index_sync(self.schema.indexes(), &existing);

        for action in &actions {
            match action {
                IndexAction::Create(spec) => {
                    tracing::info!(collection = %self.name, index = %spec.name, "Creating index");
                    self.backend.create_index(&self.name, spec).await?;
                }
                IndexAction::Drop(name) => {
                    tracing::info!(collection = %self.name, index = %name, "Dropping index");
                    self.backend.drop_index(&self.name, name).await?;
                }
                IndexAction::ModifyTtl {
                    name,
                    expire_after_seconds,
                } => {
                    tracing::info!(
                        collection = %self.name,
                        index = %name,
                        expire_after_seconds,
                        "Modifying index expiry"
                    );
                    self.backend
                        .modify_index_ttl(&self.name, name, *expire_after_seconds)
                        .await?;
                }
                IndexAction::Recreate { existing, spec } => {
                    tracing::info!(collection = %self.name, index = %spec.name, "Recreating index");
                    self.backend.drop_index(&self.name, existing).await?;
                    self.backend.create_index(&self.name, spec).await?;
                }
            }
        }

        Ok(actions)
    }

    fn replacement<I, K, V>(&self, fields: I) -> ModelResult<Document>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let record = Record::new(&self.schema, fields)?;
        let missing = record.missing_required();
        if !missing.is_empty() {
            return Err(ModelError::RequiredField(missing));
        }

        Ok(record.to_document())
    }

    fn load_optional(&self, document: Option<Document>) -> ModelResult<Option<Record>> {
        document
            .map(|document| Record::from_document(&self.schema, document))
            .transpose()
    }

    fn check_matched(&self, result: UpdateResult, id: &Bson) -> ModelResult<()> {
        if result.matched_count == 0 {
            return Err(StoreError::DocumentNotFound(id.to_string(), self.name.clone()).into());
        }

        Ok(())
    }

    fn check_owner(&self, record: &Record) -> ModelResult<()> {
        if Arc::ptr_eq(record.schema(), &self.schema) {
            Ok(())
        } else {
            Err(ModelError::InvalidState(format!(
                "a {} record does not belong to collection {}",
                record.schema().name(),
                self.name
            )))
        }
    }
}
