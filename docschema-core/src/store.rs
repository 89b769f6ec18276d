//! The document store entry point.
//!
//! [`DocumentStore`] owns a backend and hands out a [`Collection`] per top-level
//! record type.
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::store::DocumentStore;
//!
//! let store = DocumentStore::new(backend);
//! let posts = store.collection(&post_schema).await?;
//! ```

use std::sync::Arc;

use crate::{
    backend::StoreBackend,
    collection::Collection,
    error::{ModelResult, StoreResult},
    schema::RecordSchema,
};

/// A document store bound to a specific backend implementation.
///
/// # Type Parameters
///
/// * `B` - The backend implementation type
#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> DocumentStore<B> {
    /// Creates a new document store with the given backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the collection of a top-level record type.
    ///
    /// When the schema resolves `auto_build_indexes` to true, the collection's
    /// indexes are reconciled with the declared ones first.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SchemaDefinition`](crate::error::ModelError::SchemaDefinition)
    /// for embeddable schemas, and backend errors raised by index reconciliation.
    pub async fn collection<'a>(&'a self, schema: &Arc<RecordSchema>) -> ModelResult<Collection<'a, B>> {
        let collection = Collection::new(schema, &self.backend)?;

        if schema.options().auto_build_indexes {
            tracing::info!(
                collection = %collection.name(),
                "Synchronizing indexes automatically; disable auto_build_indexes in production"
            );
            collection.sync_indexes().await?;
        }

        Ok(collection)
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Shuts down the store and releases backend resources.
    pub async fn shutdown(self) -> StoreResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}
