//! In-memory document storage backend for docschema.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is meant for development
//! and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Atomic updates** - Field, arithmetic and array update operators with dotted paths
//! - **Find-and-modify** - Update, replace or delete one document and read it back
//! - **Filtering** - Equality, comparison, membership and logical operators
//! - **Unique indexes** - Enforced on insert, update and replace
//!
//! # Quick Start
//!
//! ```ignore
//! use docschema::{memory::InMemoryStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let users = RecordSchema::builder("User")
//!         .collection("users")
//!         .field("name", FieldSpec::of::<String>())
//!         .build()?;
//!
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!     let collection = store.collection(&users).await?;
//!
//!     collection.insert_one(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docschema_memory;

mod evaluator;
pub mod store;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
