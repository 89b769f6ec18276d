//! Error types and result types for schema definition, coercion and persistence.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`] is produced by a [`StoreBackend`](crate::backend::StoreBackend)
//!   implementation. The core never inspects or rewraps these beyond carrying them.
//! - [`ModelError`] is the core taxonomy: schema definition failures, coercion
//!   failures carrying the offending field path, required-field failures raised at
//!   save time, lifecycle misuse, rejected update documents and export failures.
//!   Store errors pass through it transparently.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur inside a store backend.
///
/// These are surfaced to the caller of a persistence operation unchanged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization/deserialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given `_id` already exists in the collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// A unique index rejected the write.
    /// The first argument is the index name, the second is the collection name.
    #[error("Duplicate key for index {0} in collection {1}")]
    DuplicateKey(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document id, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure for the requested operation.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// The filter document uses an operator this backend does not understand.
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),
    /// The update document uses an operator or modifier this backend does not
    /// understand.
    #[error("Unsupported update: {0}")]
    UnsupportedUpdate(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for store backend operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Errors raised by the schema, coercion and persistence layers.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A record type could not be defined. Always fatal to that definition.
    #[error("Schema definition error: {0}")]
    SchemaDefinition(String),
    /// A value did not have the kind its field requires.
    #[error("Type mismatch at {path}: expected {expected}, found {actual}")]
    TypeMismatch {
        /// Dotted path of the offending field.
        path: String,
        /// The kind the field accepts.
        expected: String,
        /// The kind that was supplied.
        actual: String,
    },
    /// A value was rejected by a built-in constraint or a field validator.
    #[error("Validation failed at {path}: {reason}")]
    Validation {
        /// Dotted path of the offending field.
        path: String,
        /// Human readable reason.
        reason: String,
    },
    /// A field converter rejected its input.
    #[error("Conversion failed at {path}: {reason}")]
    Conversion {
        /// Dotted path of the offending field.
        path: String,
        /// The message returned by the converter.
        reason: String,
    },
    /// A declared-name lookup named a field the schema does not declare.
    #[error("Field {field} is not declared in {schema}")]
    UnknownField {
        /// The record type name.
        schema: String,
        /// The name that was looked up.
        field: String,
    },
    /// Required fields were absent when the record was persisted.
    #[error("Missing required fields: {}", .0.join(", "))]
    RequiredField(Vec<String>),
    /// The record's lifecycle state does not allow the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// An update document cannot be applied to this record type.
    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
    /// A record could not be rendered in an export format.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerdeJsonError),
    /// An error from the store backend, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModelError {
    pub(crate) fn schema(message: impl Into<String>) -> Self {
        ModelError::SchemaDefinition(message.into())
    }

    pub(crate) fn mismatch(path: &str, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ModelError::TypeMismatch {
            path: path.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub(crate) fn validation(path: &str, reason: impl Into<String>) -> Self {
        ModelError::Validation {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// A specialized `Result` type for schema, coercion and persistence operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_pass_through_transparently() {
        let err: ModelError = StoreError::DuplicateKey("email_1".into(), "users".into()).into();

        assert_eq!(err.to_string(), "Duplicate key for index email_1 in collection users");
        assert!(matches!(err, ModelError::Store(StoreError::DuplicateKey(..))));
    }

    #[test]
    fn export_failures_are_not_store_errors() {
        let cause = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ModelError = cause.into();

        assert!(matches!(err, ModelError::Serialization(_)));
        assert!(err.to_string().starts_with("Serialization error: "));
    }

    #[test]
    fn required_field_lists_every_name() {
        let err = ModelError::RequiredField(vec!["title".into(), "user.email".into()]);

        assert_eq!(err.to_string(), "Missing required fields: title, user.email");
    }
}
