//! In-memory storage implementation for document stores.
//!
//! Documents are kept as BSON documents per collection, in insertion order,
//! behind an async-aware read-write lock. Updates run the operators of
//! [`crate::update`] on a copy of the matched documents, and unique indexes are
//! checked before any write becomes visible.

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use docschema_core::{
    backend::{ReturnDocument, StoreBackend, StoreBackendBuilder, UpdateResult},
    error::{StoreError, StoreResult},
    index::{ID_INDEX_NAME, IndexDirection, IndexSpec},
};

use crate::{
    evaluator::{FilterEvaluator, lookup, values_equal},
    update::apply_update,
};

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

type StoreMap = HashMap<String, CollectionData>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Filters scan every document of a collection, and indexes only enforce
/// uniqueness. This is meant for tests and small datasets.
///
/// # Example
///
/// ```ignore
/// use docschema_memory::InMemoryStore;
/// use docschema_core::backend::StoreBackend;
/// use bson::doc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryStore::new();
///
///     store.insert_one("users", doc! { "_id": 1, "name": "Alice" }).await?;
///
///     let found = store.find("users", doc! { "name": "Alice" }).await?;
///     assert_eq!(found.len(), 1);
///
///     Ok(())
/// }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and secondary indexes
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docschema_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().build().await.unwrap();
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

impl CollectionData {
    fn first_match(&self, filter: &Document) -> StoreResult<Option<usize>> {
        for (position, document) in self.documents.iter().enumerate() {
            if FilterEvaluator::new(document).matches(filter)? {
                return Ok(Some(position));
            }
        }

        Ok(None)
    }

    fn matching(&self, filter: &Document) -> StoreResult<Vec<usize>> {
        let mut positions = Vec::new();
        for (position, document) in self.documents.iter().enumerate() {
            if FilterEvaluator::new(document).matches(filter)? {
                positions.push(position);
            }
        }

        Ok(positions)
    }

    /// Applies `update` to the documents at `positions`, all or nothing.
    fn update_at(
        &mut self,
        collection: &str,
        positions: &[usize],
        update: &Document,
    ) -> StoreResult<UpdateResult> {
        let mut next = self.documents.clone();
        let mut modified = 0;

        for &position in positions {
            apply_update(&mut next[position], update)?;
            check_identity(&self.documents[position], &next[position])?;
            if next[position] != self.documents[position] {
                modified += 1;
            }
        }

        for &position in positions {
            self.check_unique(collection, &next[position], next.iter().enumerate(), Some(position))?;
        }

        self.documents = next;

        Ok(UpdateResult {
            matched_count: positions.len() as u64,
            modified_count: modified,
        })
    }

    /// Stores `replacement` at `position` under the `_id` already there.
    fn replace_at(
        &mut self,
        collection: &str,
        position: usize,
        replacement: Document,
    ) -> StoreResult<UpdateResult> {
        let current = &self.documents[position];
        let id = current
            .get("_id")
            .cloned()
            .ok_or_else(|| StoreError::InvalidDocument("document has no _id".to_string()))?;

        let mut document = Document::new();
        document.insert("_id", id);
        for (key, value) in replacement {
            if key.starts_with('$') {
                return Err(StoreError::InvalidDocument(format!(
                    "a replacement cannot hold the update operator {}",
                    key
                )));
            }
            if key != "_id" {
                document.insert(key, value);
            } else if !current.get("_id").is_some_and(|id| values_equal(id, &value)) {
                return Err(StoreError::InvalidDocument(
                    "the _id of a stored document cannot change".to_string(),
                ));
            }
        }

        self.check_unique(collection, &document, self.documents.iter().enumerate(), Some(position))?;

        let modified = self.documents[position] != document;
        self.documents[position] = document;

        Ok(UpdateResult {
            matched_count: 1,
            modified_count: modified as u64,
        })
    }

    /// Checks that `candidate` may be stored next to `others` without breaking
    /// the `_id` or any unique index. `skip` is the position being overwritten.
    fn check_unique<'a>(
        &self,
        collection: &str,
        candidate: &Document,
        others: impl Iterator<Item = (usize, &'a Document)> + Clone,
        skip: Option<usize>,
    ) -> StoreResult<()> {
        let id = candidate
            .get("_id")
            .ok_or_else(|| StoreError::InvalidDocument("document has no _id".to_string()))?;

        let rivals = others.filter(|(position, _)| Some(*position) != skip);

        if rivals
            .clone()
            .any(|(_, other)| other.get("_id").is_some_and(|value| values_equal(value, id)))
        {
            return Err(StoreError::DocumentAlreadyExists(
                id.to_string(),
                collection.to_string(),
            ));
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index_key(index, candidate);
            let clash = rivals.clone().any(|(_, other)| {
                index_key(index, other)
                    .iter()
                    .zip(&key)
                    .all(|(left, right)| values_equal(left, right))
            });

            if clash {
                return Err(StoreError::DuplicateKey(
                    index.name.clone(),
                    collection.to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn check_identity(before: &Document, after: &Document) -> StoreResult<()> {
    match (before.get("_id"), after.get("_id")) {
        (Some(old), Some(new)) if values_equal(old, new) => Ok(()),
        _ => Err(StoreError::InvalidDocument(
            "the _id of a stored document cannot change".to_string(),
        )),
    }
}

fn index_key(index: &IndexSpec, document: &Document) -> Vec<Bson> {
    index
        .keys
        .iter()
        .map(|(path, _)| lookup(document, path).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn id_index() -> IndexSpec {
    IndexSpec {
        name: ID_INDEX_NAME.to_string(),
        keys: vec![("_id".to_string(), IndexDirection::Ascending)],
        unique: true,
        expire_after_seconds: None,
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.insert_many(collection, vec![document]).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        let mut staged: Vec<Document> = Vec::with_capacity(documents.len());
        for document in documents {
            data.check_unique(
                collection,
                &document,
                data.documents.iter().chain(staged.iter()).enumerate(),
                None,
            )?;
            staged.push(document);
        }

        tracing::debug!(collection, count = staged.len(), "Inserted documents");
        data.documents.extend(staged);

        Ok(())
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let result = match data.first_match(&filter)? {
            Some(position) => data.update_at(collection, &[position], &update)?,
            None => UpdateResult::default(),
        };

        tracing::debug!(
            collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "Updated document"
        );
        Ok(result)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let positions = data.matching(&filter)?;
        let result = if positions.is_empty() {
            UpdateResult::default()
        } else {
            data.update_at(collection, &positions, &update)?
        };

        tracing::debug!(
            collection,
            matched = result.matched_count,
            modified = result.modified_count,
            "Updated documents"
        );
        Ok(result)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateResult> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(UpdateResult::default());
        };

        let result = match data.first_match(&filter)? {
            Some(position) => data.replace_at(collection, position, replacement)?,
            None => UpdateResult::default(),
        };

        tracing::debug!(collection, matched = result.matched_count, "Replaced document");
        Ok(result)
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(0);
        };

        let deleted = match data.first_match(&filter)? {
            Some(position) => {
                data.documents.remove(position);
                1
            }
            None => 0,
        };

        tracing::debug!(collection, deleted, "Deleted document");
        Ok(deleted)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::with_capacity(data.documents.len());
        for document in &data.documents {
            doomed.push(FilterEvaluator::new(document).matches(&filter)?);
        }

        let before = data.documents.len();
        let mut flags = doomed.into_iter();
        data.documents
            .retain(|_| !flags.next().unwrap_or(false));

        let deleted = (before - data.documents.len()) as u64;
        tracing::debug!(collection, deleted, "Deleted documents");
        Ok(deleted)
    }

    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>> {
        let store = self.store.read().await;
        let data = match store.get(collection) {
            Some(data) => data,
            None => return Ok(vec![]),
        };

        FilterEvaluator::filter_documents(&data.documents, &filter)
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(None);
        };

        Ok(data
            .first_match(&filter)?
            .map(|position| data.documents[position].clone()))
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(None);
        };
        let Some(position) = data.first_match(&filter)? else {
            return Ok(None);
        };

        let before = data.documents[position].clone();
        data.update_at(collection, &[position], &update)?;
        tracing::debug!(collection, "Updated document");

        Ok(Some(match returning {
            ReturnDocument::Before => before,
            ReturnDocument::After => data.documents[position].clone(),
        }))
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(None);
        };
        let Some(position) = data.first_match(&filter)? else {
            return Ok(None);
        };

        let before = data.documents[position].clone();
        data.replace_at(collection, position, replacement)?;
        tracing::debug!(collection, "Replaced document");

        Ok(Some(match returning {
            ReturnDocument::Before => before,
            ReturnDocument::After => data.documents[position].clone(),
        }))
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<Document>> {
        let mut store = self.store.write().await;
        let Some(data) = store.get_mut(collection) else {
            return Ok(None);
        };

        let deleted = data
            .first_match(&filter)?
            .map(|position| data.documents.remove(position));
        tracing::debug!(collection, deleted = deleted.is_some(), "Deleted document");

        Ok(deleted)
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        let store = self.store.read().await;

        match store.get(collection) {
            Some(data) => Ok(data.matching(&filter)?.len() as u64),
            None => Ok(0),
        }
    }

    async fn estimated_count(&self, collection: &str) -> StoreResult<u64> {
        let store = self.store.read().await;

        Ok(store
            .get(collection)
            .map_or(0, |data| data.documents.len() as u64))
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> StoreResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(data) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut values: Vec<Bson> = Vec::new();
        for position in data.matching(&filter)? {
            let found = match lookup(&data.documents[position], key) {
                Some(Bson::Array(items)) => items.iter().collect::<Vec<_>>(),
                Some(value) => vec![value],
                None => continue,
            };

            for value in found {
                if !values.iter().any(|seen| values_equal(seen, value)) {
                    values.push(value.clone());
                }
            }
        }

        Ok(values)
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        let store = self.store.read().await;

        let mut indexes = vec![id_index()];
        if let Some(data) = store.get(collection) {
            indexes.extend(data.indexes.iter().cloned());
        }

        Ok(indexes)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        if index.name == ID_INDEX_NAME {
            return Ok(());
        }

        if let Some(existing) = data.indexes.iter().find(|existing| existing.name == index.name) {
            if existing == index {
                return Ok(());
            }
            return Err(StoreError::Backend(format!(
                "index {} already exists with different options",
                index.name
            )));
        }

        if index.unique {
            for (position, document) in data.documents.iter().enumerate() {
                let key = index_key(index, document);
                let clash = data.documents[position + 1..].iter().any(|other| {
                    index_key(index, other)
                        .iter()
                        .zip(&key)
                        .all(|(left, right)| values_equal(left, right))
                });
                if clash {
                    return Err(StoreError::DuplicateKey(
                        index.name.clone(),
                        collection.to_string(),
                    ));
                }
            }
        }

        tracing::debug!(collection, index = %index.name, unique = index.unique, "Created index");
        data.indexes.push(index.clone());

        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        if name == ID_INDEX_NAME {
            return Err(StoreError::Backend("cannot drop the _id index".to_string()));
        }

        let mut store = self.store.write().await;
        let data = match store.get_mut(collection) {
            Some(data) => data,
            None => return Err(StoreError::CollectionNotFound(collection.to_string())),
        };

        let before = data.indexes.len();
        data.indexes.retain(|index| index.name != name);
        if data.indexes.len() == before {
            return Err(StoreError::Backend(format!("index not found: {}", name)));
        }

        tracing::debug!(collection, index = name, "Dropped index");
        Ok(())
    }

    async fn modify_index_ttl(
        &self,
        collection: &str,
        name: &str,
        expire_after_seconds: u64,
    ) -> StoreResult<()> {
        let mut store = self.store.write().await;
        let index = store
            .get_mut(collection)
            .and_then(|data| data.indexes.iter_mut().find(|index| index.name == name))
            .ok_or_else(|| StoreError::Backend(format!("index not found: {}", name)))?;

        index.expire_after_seconds = Some(expire_after_seconds);
        tracing::debug!(collection, index = name, expire_after_seconds, "Modified index expiry");

        Ok(())
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docschema_memory::InMemoryStore;
/// use docschema_core::backend::StoreBackendBuilder;
///
/// #[tokio::main]
/// async fn main() {
///     let store = InMemoryStore::builder().build().await.unwrap();
/// }
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> StoreResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn updates_the_first_match_only() {
        let store = InMemoryStore::new();
        store
            .insert_many("posts", vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": 1 }])
            .await
            .unwrap();

        let result = store
            .update_one("posts", doc! { "n": 1 }, doc! { "$set": { "n": 5 } })
            .await
            .unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });
        assert_eq!(
            store.find("posts", doc! {}).await.unwrap(),
            vec![doc! { "_id": 1, "n": 5 }, doc! { "_id": 2, "n": 1 }]
        );

        let result = store
            .update_one("posts", doc! { "_id": 3 }, doc! { "$set": { "n": 5 } })
            .await
            .unwrap();
        assert_eq!(result, UpdateResult::default());
    }

    #[tokio::test]
    async fn update_many_counts_modified_documents() {
        let store = InMemoryStore::new();
        store
            .insert_many(
                "posts",
                vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": 2 }, doc! { "_id": 3, "n": 9 }],
            )
            .await
            .unwrap();

        let result = store
            .update_many("posts", doc! { "n": { "$lt": 5 } }, doc! { "$max": { "n": 2 } })
            .await
            .unwrap();

        assert_eq!(result, UpdateResult { matched_count: 2, modified_count: 1 });
        assert_eq!(store.count("posts", doc! { "n": 2 }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn rejects_duplicate_ids_atomically() {
        let store = InMemoryStore::new();
        store.insert_one("posts", doc! { "_id": 1 }).await.unwrap();

        let result = store
            .insert_many("posts", vec![doc! { "_id": 2 }, doc! { "_id": 1 }])
            .await;

        assert!(matches!(result, Err(StoreError::DocumentAlreadyExists(_, _))));
        assert_eq!(store.count("posts", doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn enforces_unique_indexes() {
        let store = InMemoryStore::new();
        let index = IndexSpec {
            name: "email_1".to_string(),
            keys: vec![("email".to_string(), IndexDirection::Ascending)],
            unique: true,
            expire_after_seconds: None,
        };
        store.create_index("users", &index).await.unwrap();
        store.insert_one("users", doc! { "_id": 1, "email": "a" }).await.unwrap();
        store.insert_one("users", doc! { "_id": 2, "email": "b" }).await.unwrap();

        let result = store.insert_one("users", doc! { "_id": 3, "email": "a" }).await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(name, _)) if name == "email_1"));

        let result = store
            .update_one("users", doc! { "_id": 2 }, doc! { "$set": { "email": "a" } })
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_, _))));

        let result = store
            .update_many("users", doc! {}, doc! { "$set": { "email": "same" } })
            .await;
        assert!(matches!(result, Err(StoreError::DuplicateKey(_, _))));
        assert_eq!(store.count("users", doc! { "email": "same" }).await.unwrap(), 0);

        store
            .update_one("users", doc! { "_id": 1 }, doc! { "$set": { "email": "a" } })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn identity_cannot_change() {
        let store = InMemoryStore::new();
        store.insert_one("posts", doc! { "_id": 1, "n": 1 }).await.unwrap();

        let result = store
            .update_one("posts", doc! { "_id": 1 }, doc! { "$set": { "_id": 2 } })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));

        let result = store
            .replace_one("posts", doc! { "_id": 1 }, doc! { "_id": 2, "n": 2 })
            .await;
        assert!(matches!(result, Err(StoreError::InvalidDocument(_))));

        assert_eq!(
            store.find("posts", doc! {}).await.unwrap(),
            vec![doc! { "_id": 1, "n": 1 }]
        );
    }

    #[tokio::test]
    async fn manages_indexes() {
        let store = InMemoryStore::new();
        let index = IndexSpec {
            name: "at_1".to_string(),
            keys: vec![("at".to_string(), IndexDirection::Ascending)],
            unique: false,
            expire_after_seconds: Some(60),
        };
        store.create_index("events", &index).await.unwrap();
        store.modify_index_ttl("events", "at_1", 120).await.unwrap();

        let indexes = store.list_indexes("events").await.unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, ID_INDEX_NAME);
        assert_eq!(indexes[1].expire_after_seconds, Some(120));

        assert!(store.drop_index("events", ID_INDEX_NAME).await.is_err());
        store.drop_index("events", "at_1").await.unwrap();
        assert_eq!(store.list_indexes("events").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replace_keeps_identity_and_deletes_count() {
        let store = InMemoryStore::new();
        store
            .insert_many("posts", vec![doc! { "_id": 1, "n": 1 }, doc! { "_id": 2, "n": 2 }])
            .await
            .unwrap();

        let result = store
            .replace_one("posts", doc! { "_id": 1 }, doc! { "n": 10 })
            .await
            .unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });
        assert_eq!(
            store.find_one("posts", doc! { "_id": 1 }).await.unwrap(),
            Some(doc! { "_id": 1, "n": 10 })
        );

        assert_eq!(store.delete_one("posts", doc! { "n": { "$gte": 2 } }).await.unwrap(), 1);
        assert_eq!(store.delete_one("posts", doc! { "n": 2 }).await.unwrap(), 0);
        assert_eq!(store.delete_many("posts", doc! {}).await.unwrap(), 1);
        assert_eq!(store.estimated_count("posts").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_and_modify_return_the_requested_version() {
        let store = InMemoryStore::new();
        store
            .insert_many("jobs", vec![doc! { "_id": 1, "runs": 0 }, doc! { "_id": 2, "runs": 0 }])
            .await
            .unwrap();

        let before = store
            .find_one_and_update("jobs", doc! {}, doc! { "$inc": { "runs": 1 } }, ReturnDocument::Before)
            .await
            .unwrap();
        assert_eq!(before, Some(doc! { "_id": 1, "runs": 0 }));

        let after = store
            .find_one_and_update("jobs", doc! { "_id": 1 }, doc! { "$inc": { "runs": 1 } }, ReturnDocument::After)
            .await
            .unwrap();
        assert_eq!(after, Some(doc! { "_id": 1, "runs": 2 }));

        let replaced = store
            .find_one_and_replace("jobs", doc! { "_id": 2 }, doc! { "done": true }, ReturnDocument::After)
            .await
            .unwrap();
        assert_eq!(replaced, Some(doc! { "_id": 2, "done": true }));

        let deleted = store.find_one_and_delete("jobs", doc! { "done": true }).await.unwrap();
        assert_eq!(deleted, Some(doc! { "_id": 2, "done": true }));
        assert_eq!(store.find_one_and_delete("jobs", doc! { "done": true }).await.unwrap(), None);
        assert_eq!(
            store
                .find_one_and_update("missing", doc! {}, doc! { "$set": { "a": 1 } }, ReturnDocument::After)
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let store = InMemoryStore::new();
        store
            .insert_many(
                "posts",
                vec![
                    doc! { "_id": 1, "tags": ["a", "b"], "draft": false },
                    doc! { "_id": 2, "tags": "b", "draft": false },
                    doc! { "_id": 3, "tags": ["c"], "draft": true },
                    doc! { "_id": 4, "draft": false },
                ],
            )
            .await
            .unwrap();

        let values = store
            .distinct("posts", "tags", doc! { "draft": false })
            .await
            .unwrap();

        assert_eq!(values, vec![Bson::from("a"), Bson::from("b")]);
        assert_eq!(store.estimated_count("posts").await.unwrap(), 4);
    }
}
