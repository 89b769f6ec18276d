//! Store backend abstraction.
//!
//! The core never performs I/O itself. It decides *what* to write and hands the
//! write to a [`StoreBackend`], the narrow contract every document store
//! implementation fulfils: inserts, atomic updates and replacements, deletes and
//! find-and-modify calls addressed by opaque filters, plus index management.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docschema_core::backend::{ReturnDocument, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend.insert_one("users", doc! { "_id": 1, "name": "Alice" }).await?;
//!
//! let result = backend
//!     .update_one("users", doc! { "_id": 1 }, doc! { "$set": { "name": "Alicia" } })
//!     .await?;
//! assert_eq!(result.matched_count, 1);
//!
//! let before = backend
//!     .find_one_and_update("users", doc! { "_id": 1 }, doc! { "$inc": { "logins": 1 } }, ReturnDocument::Before)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{error::StoreResult, index::IndexSpec};

/// Which version of a document a find-and-modify call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the write.
    #[default]
    Before,
    /// The document as the write left it.
    After,
}

/// Counts reported by an update or a replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    /// Documents the filter selected.
    pub matched_count: u64,
    /// Documents whose content actually changed.
    pub modified_count: u64,
}

/// Abstract interface for document storage backends.
///
/// Filters are plain BSON documents in the store's query language and are
/// passed through untouched; single-document operations act on the first match
/// in storage order. Update documents use the store's update operators.
///
/// # Thread Safety
///
/// Implementations must be thread-safe and support concurrent access from
/// multiple async tasks.
///
/// # Error Handling
///
/// Every failure is reported as a [`StoreError`](crate::error::StoreError). The
/// persistence façade surfaces these errors to its caller unchanged, so backends
/// should map their native failures onto the closest variant: a duplicate `_id`
/// is [`DocumentAlreadyExists`](crate::error::StoreError::DocumentAlreadyExists)
/// and a unique index violation is
/// [`DuplicateKey`](crate::error::StoreError::DuplicateKey). A write that would
/// change a document's `_id` is refused.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Inserts a new document. The document carries its own `_id`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to insert into. Created on first use.
    /// * `document` - The wire document, `_id` included
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()>;

    /// Inserts several new documents in one batch.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()>;

    /// Applies an atomic update to the first document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection holding the document
    /// * `filter` - Selects the document
    /// * `update` - Update operators such as `$set` and `$unset` with dotted paths
    ///
    /// # Returns
    ///
    /// A zero `matched_count` when nothing matched; that is not an error.
    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult>;

    /// Applies an update to every document matching `filter`.
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult>;

    /// Replaces the first document matching `filter`, keeping its `_id`.
    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateResult>;

    /// Deletes the first document matching `filter` and returns how many were
    /// removed, zero or one.
    async fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Deletes every document matching `filter` and returns how many were removed.
    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Returns every document matching `filter`, in storage order.
    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching `filter`. Only that document is
    /// read from the store.
    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>>;

    /// Updates the first document matching `filter` and returns it as chosen
    /// by `returning`, or `None` when nothing matched.
    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>>;

    /// Replaces the first document matching `filter` and returns it as chosen
    /// by `returning`, or `None` when nothing matched.
    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>>;

    /// Deletes the first document matching `filter` and returns it.
    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<Document>>;

    /// Counts the documents matching `filter`.
    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Counts every document of the collection, possibly from metadata.
    async fn estimated_count(&self, collection: &str) -> StoreResult<u64>;

    /// The distinct values found at the dotted path `key` across the documents
    /// matching `filter`. Array values contribute each of their elements.
    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> StoreResult<Vec<Bson>>;

    /// Lists the indexes of a collection, the built-in `_id_` index included.
    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>>;

    /// Creates an index.
    ///
    /// # Note
    ///
    /// If the index is unique and existing documents violate it, the backend
    /// returns an error and the index is not created.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()>;

    /// Drops the index with the given name.
    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()>;

    /// Changes the expiry of an existing TTL index in place.
    async fn modify_index_ttl(
        &self,
        collection: &str,
        name: &str,
        expire_after_seconds: u64,
    ) -> StoreResult<()>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> StoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
        (*self).insert_one(collection, document).await
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()> {
        (*self).insert_many(collection, documents).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        (*self).update_one(collection, filter, update).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> StoreResult<UpdateResult> {
        (*self).update_many(collection, filter, update).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<UpdateResult> {
        (*self).replace_one(collection, filter, replacement).await
    }

    async fn delete_one(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (*self).delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (*self).delete_many(collection, filter).await
    }

    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>> {
        (*self).find(collection, filter).await
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        (*self).find_one(collection, filter).await
    }

    async fn find_one_and_update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        (*self)
            .find_one_and_update(collection, filter, update, returning)
            .await
    }

    async fn find_one_and_replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        returning: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        (*self)
            .find_one_and_replace(collection, filter, replacement, returning)
            .await
    }

    async fn find_one_and_delete(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<Document>> {
        (*self).find_one_and_delete(collection, filter).await
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        (*self).count(collection, filter).await
    }

    async fn estimated_count(&self, collection: &str) -> StoreResult<u64> {
        (*self).estimated_count(collection).await
    }

    async fn distinct(&self, collection: &str, key: &str, filter: Document) -> StoreResult<Vec<Bson>> {
        (*self).distinct(collection, key, filter).await
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexSpec>> {
        (*self).list_indexes(collection).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StoreResult<()> {
        (*self).create_index(collection, index).await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> StoreResult<()> {
        (*self).drop_index(collection, name).await
    }

    async fn modify_index_ttl(
        &self,
        collection: &str,
        name: &str,
        expire_after_seconds: u64,
    ) -> StoreResult<()> {
        (*self)
            .modify_index_ttl(collection, name, expire_after_seconds)
            .await
    }
}

/// Factory for store backends.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StoreResult<Self::Backend>;
}
