//! Convenient re-exports of commonly used types from docschema.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docschema::prelude::*;
//! ```
//!
//! This provides access to:
//! - Schema and field declarations
//! - Records and values
//! - Store backends and builders
//! - Collections, save options and update results
//! - Error types

pub use bson::{Bson, Document as BsonDocument, doc};
pub use docschema_core::{
    backend::{ReturnDocument, StoreBackend, StoreBackendBuilder, UpdateResult},
    coerce::Coercer,
    collection::{Collection, SaveOutcome},
    diff::{SaveOptions, UpdateDescriptor},
    error::{ModelError, ModelResult, StoreError, StoreResult},
    field::{Constraint, DefaultPolicy, FieldSpec},
    index::{IndexDecl, IndexSpec},
    record::{Record, RecordState},
    schema::{RecordSchema, SchemaBuilder, SchemaOptions},
    store::DocumentStore,
    types::{DescribeType, TypeDescriptor},
    update::clean_update,
    value::Value,
};
