//! A schema-driven mapper between BSON documents and typed, change-tracked records.
//!
//! This crate is the core of the docschema project and provides:
//!
//! - **Values** ([`value`]) - Raw and canonical field values
//! - **Type descriptors** ([`types`]) - The accepted shape of a field
//! - **Field specifications** ([`field`]) - Defaults, aliases, converters, constraints and validators
//! - **Record schemas** ([`schema`]) - Ordered fields plus schema-level options, built once per type
//! - **Coercion** ([`coerce`]) - Raw documents to canonical records
//! - **Records** ([`record`]) - Instance state with a baseline for change tracking
//! - **Diffing** ([`diff`]) - Minimal `$set`/`$unset` updates and save planning
//! - **Update checking** ([`update`]) - Raw update documents held to the schema
//! - **Indexes** ([`index`]) - Index declaration parsing and synchronization planning
//! - **Store backend abstraction** ([`backend`]) - The contract storage implementations fulfil
//! - **Collections** ([`collection`]) and the **document store** ([`store`]) - The persistence façade
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::{field::FieldSpec, record::Record, schema::RecordSchema, types::TypeDescriptor};
//! use bson::doc;
//!
//! let user = RecordSchema::builder("User")
//!     .field("name", FieldSpec::of::<String>())
//!     .field("email", FieldSpec::of::<String>())
//!     .build()?;
//!
//! let post = RecordSchema::builder("Post")
//!     .collection("posts")
//!     .field("title", FieldSpec::of::<String>().required())
//!     .field("user", TypeDescriptor::record(&user))
//!     .build()?;
//!
//! let record = Record::new(&post, doc! { "title": "Hi", "user": { "name": "Lucy" } })?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docschema_core;

pub mod backend;
pub mod coerce;
pub mod collection;
pub mod diff;
pub mod error;
pub mod field;
pub mod index;
pub mod record;
pub mod schema;
pub mod store;
pub mod types;
pub mod update;
pub mod value;
