//! Main docschema crate providing a unified interface for schema-driven document mapping.
//!
//! This crate is the primary entry point for users of the docschema framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Declarative record types** - Fields with types, aliases, defaults, converters and validators
//! - **Coercion** - Raw documents become canonical records, nested records included
//! - **Change tracking** - Saving a loaded record sends only what changed as `$set`/`$unset`
//! - **Index synchronization** - Declared indexes are reconciled with the store
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docschema::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let user = RecordSchema::builder("User")
//!         .field("name", FieldSpec::of::<String>())
//!         .field("email", FieldSpec::of::<String>().alias("mail"))
//!         .build()?;
//!
//!     let post = RecordSchema::builder("Post")
//!         .collection("posts")
//!         .field("title", FieldSpec::of::<String>().required())
//!         .field("user", TypeDescriptor::record(&user))
//!         .index("title")
//!         .build()?;
//!
//!     // Create an in-memory store backend
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let posts = store.collection(&post).await?;
//!
//!     // Insert a record; nested mappings are coerced into `User` records
//!     let mut first = posts
//!         .insert_one(doc! { "title": "Hello", "user": { "name": "Lucy" } })
//!         .await?;
//!
//!     // Only the changed path is written: { "$set": { "user.mail": "lucy@example.com" } }
//!     if let Some(owner) = first.get_mut("user")?.and_then(Value::as_record_mut) {
//!         owner.set("email", "lucy@example.com")?;
//!     }
//!     posts.save(&mut first, SaveOptions::default()).await?;
//!
//!     let found = posts.find(doc! { "user.mail": "lucy@example.com" }).await?;
//!     println!("Found posts: {:?}", found);
//!
//!     store.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docschema_core::{
    backend, coerce, collection, diff, error, field, index, record, schema, store, types, update,
    value,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docschema_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docschema_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
