//! MongoDB backend implementation for docschema.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait.
//! Partial updates, filters and index management are delegated to the server.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docschema = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Server-side updates** - Minimal `$set`/`$unset` updates are applied atomically by the server
//! - **Native filters** - Filter documents are passed to the query engine untouched
//! - **Index synchronization** - Listing, creating, dropping and TTL changes
//!
//! # Example
//!
//! ```ignore
//! use docschema::{backend::StoreBackendBuilder, mongodb::MongoDbStore, store::DocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!     let store = DocumentStore::new(backend);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docschema_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
