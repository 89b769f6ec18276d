//! Index declarations for top-level record types.
//!
//! Declarations come in several shapes: a single field name, a `(field, direction)`
//! pair, a compound list of those, or an options record carrying a TTL, uniqueness or
//! an explicit name. [`IndexDecl::normalize`] turns each into a uniform [`IndexSpec`].
//! [`plan_index_sync`] compares declared specs with what a store reports and yields
//! the [`IndexAction`]s needed to reconcile them.
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::index::IndexDecl;
//!
//! let decls = vec![
//!     IndexDecl::field("email").unique(),
//!     IndexDecl::compound([IndexDecl::field("a"), IndexDecl::directed("b", -1)]),
//!     IndexDecl::field("created").expire_after(3600),
//! ];
//! ```

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Name of the store's built-in identity index, never dropped.
pub const ID_INDEX_NAME: &str = "_id_";

/// Sort direction of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexDirection {
    Ascending,
    Descending,
}

impl IndexDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            IndexDirection::Ascending => 1,
            IndexDirection::Descending => -1,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            1 => Some(IndexDirection::Ascending),
            -1 => Some(IndexDirection::Descending),
            _ => None,
        }
    }

    /// Reads a direction from a numeric BSON value (`1`, `-1`, `1.0`, `-1.0`).
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::Int32(n) => Self::from_i64(*n as i64),
            Bson::Int64(n) => Self::from_i64(*n),
            Bson::Double(n) if n.fract() == 0.0 => Self::from_i64(*n as i64),
            _ => None,
        }
    }
}

/// A declared index, in any of the accepted shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexDecl {
    /// An ascending index on one field.
    Field(String),
    /// One field with an explicit direction (`1` or `-1`).
    Directed(String, i32),
    /// The concatenated keys of each element.
    Compound(Vec<IndexDecl>),
    /// A key declaration plus options.
    Options {
        key: Box<IndexDecl>,
        unique: bool,
        expire_after_seconds: Option<u64>,
        name: Option<String>,
    },
}

impl IndexDecl {
    pub fn field(name: impl Into<String>) -> Self {
        IndexDecl::Field(name.into())
    }

    pub fn directed(name: impl Into<String>, direction: i32) -> Self {
        IndexDecl::Directed(name.into(), direction)
    }

    pub fn compound(keys: impl IntoIterator<Item = IndexDecl>) -> Self {
        IndexDecl::Compound(keys.into_iter().collect())
    }

    /// Marks the index unique.
    pub fn unique(self) -> Self {
        self.with_options(|unique, _, _| *unique = true)
    }

    /// Makes the index a TTL index.
    pub fn expire_after(self, seconds: u64) -> Self {
        self.with_options(|_, ttl, _| *ttl = Some(seconds))
    }

    /// Overrides the default index name.
    pub fn named(self, index_name: impl Into<String>) -> Self {
        let index_name = index_name.into();
        self.with_options(move |_, _, name| *name = Some(index_name))
    }

    fn with_options<F>(self, apply: F) -> Self
    where
        F: FnOnce(&mut bool, &mut Option<u64>, &mut Option<String>),
    {
        let (key, mut unique, mut ttl, mut name) = match self {
            IndexDecl::Options { key, unique, expire_after_seconds, name } => {
                (key, unique, expire_after_seconds, name)
            }
            other => (Box::new(other), false, None, None),
        };
        apply(&mut unique, &mut ttl, &mut name);

        IndexDecl::Options {
            key,
            unique,
            expire_after_seconds: ttl,
            name,
        }
    }

    /// Normalizes this declaration into an [`IndexSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SchemaDefinition`] for an empty field name, a direction
    /// other than `1`/`-1`, an empty compound list or an options record nested inside
    /// another declaration.
    pub fn normalize(&self) -> ModelResult<IndexSpec> {
        match self {
            IndexDecl::Options { key, unique, expire_after_seconds, name } => {
                let keys = key.keys()?;
                Ok(IndexSpec {
                    name: name
                        .clone()
                        .unwrap_or_else(|| default_index_name(&keys)),
                    keys,
                    unique: *unique,
                    expire_after_seconds: *expire_after_seconds,
                })
            }
            other => {
                let keys = other.keys()?;
                Ok(IndexSpec {
                    name: default_index_name(&keys),
                    keys,
                    unique: false,
                    expire_after_seconds: None,
                })
            }
        }
    }

    fn keys(&self) -> ModelResult<Vec<(String, IndexDirection)>> {
        match self {
            IndexDecl::Field(name) => Ok(vec![(check_key_name(name)?, IndexDirection::Ascending)]),
            IndexDecl::Directed(name, direction) => {
                let direction = IndexDirection::from_i64(*direction as i64).ok_or_else(|| {
                    ModelError::schema(format!(
                        "cannot parse index direction {} for {:?}; expected 1 or -1",
                        direction, name
                    ))
                })?;
                Ok(vec![(check_key_name(name)?, direction)])
            }
            IndexDecl::Compound(items) => {
                if items.is_empty() {
                    return Err(ModelError::schema("cannot parse an empty compound index"));
                }

                let mut keys = Vec::new();
                for item in items {
                    keys.extend(item.keys()?);
                }
                Ok(keys)
            }
            IndexDecl::Options { .. } => Err(ModelError::schema(
                "index options cannot be nested inside another index declaration",
            )),
        }
    }

    /// Parses a declaration from BSON.
    ///
    /// Accepted shapes: `"field"`, `["field", -1]`, an array of those for a compound
    /// index, or `{ key: <shape>, unique: bool, expire_after_seconds: int, name: str }`
    /// (`expireAfterSeconds` is accepted as well).
    pub fn from_bson(value: &Bson) -> ModelResult<Self> {
        match value {
            Bson::String(name) => Ok(IndexDecl::Field(name.clone())),
            Bson::Array(items) => {
                if let [Bson::String(name), direction] = items.as_slice() {
                    if let Some(direction) = IndexDirection::from_bson(direction) {
                        return Ok(IndexDecl::Directed(name.clone(), direction.as_i32()));
                    }
                }

                Ok(IndexDecl::Compound(
                    items
                        .iter()
                        .map(IndexDecl::from_bson)
                        .collect::<ModelResult<Vec<_>>>()?,
                ))
            }
            Bson::Document(document) => Self::options_from_document(document),
            other => Err(ModelError::schema(format!(
                "cannot parse {} to standard index format",
                other
            ))),
        }
    }

    fn options_from_document(document: &Document) -> ModelResult<Self> {
        let mut key = None;
        let mut unique = false;
        let mut expire_after_seconds = None;
        let mut name = None;

        for (option, value) in document {
            match (option.as_str(), value) {
                ("key", value) => key = Some(Box::new(IndexDecl::from_bson(value)?)),
                ("unique", Bson::Boolean(value)) => unique = *value,
                ("expire_after_seconds" | "expireAfterSeconds", value) => {
                    expire_after_seconds = Some(parse_seconds(value)?);
                }
                ("name", Bson::String(value)) => name = Some(value.clone()),
                (option, value) => {
                    return Err(ModelError::schema(format!(
                        "cannot parse index option {:?} with value {}",
                        option, value
                    )));
                }
            }
        }

        Ok(IndexDecl::Options {
            key: key.ok_or_else(|| ModelError::schema("index options require a `key`"))?,
            unique,
            expire_after_seconds,
            name,
        })
    }
}

impl From<&str> for IndexDecl {
    fn from(name: &str) -> Self {
        IndexDecl::Field(name.to_string())
    }
}

impl From<(&str, i32)> for IndexDecl {
    fn from((name, direction): (&str, i32)) -> Self {
        IndexDecl::Directed(name.to_string(), direction)
    }
}

fn check_key_name(name: &str) -> ModelResult<String> {
    if name.is_empty() {
        return Err(ModelError::schema("index keys cannot be empty"));
    }
    Ok(name.to_string())
}

fn parse_seconds(value: &Bson) -> ModelResult<u64> {
    let seconds = match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    };

    seconds
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| ModelError::schema(format!("cannot parse {} as an index TTL in seconds", value)))
}

/// A normalized index: ordered keys plus options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<(String, IndexDirection)>,
    pub unique: bool,
    pub expire_after_seconds: Option<u64>,
}

impl IndexSpec {
    /// The store's default name for these keys.
    pub fn default_name(&self) -> String {
        default_index_name(&self.keys)
    }

    /// The keys as an ordered `{ field: direction }` document.
    pub fn keys_document(&self) -> Document {
        self.keys
            .iter()
            .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
            .collect()
    }

    /// Reads keys back from an ordered `{ field: direction }` document.
    ///
    /// Returns `None` if a key is not a plain ascending/descending direction
    /// (text, hashed or geo indexes).
    pub fn keys_from_document(document: &Document) -> Option<Vec<(String, IndexDirection)>> {
        document
            .iter()
            .map(|(field, direction)| IndexDirection::from_bson(direction).map(|d| (field.clone(), d)))
            .collect()
    }
}

/// The store's default index name, e.g. `a_1_b_-1`.
pub fn default_index_name(keys: &[(String, IndexDirection)]) -> String {
    keys.iter()
        .map(|(field, direction)| format!("{}_{}", field, direction.as_i32()))
        .collect::<Vec<_>>()
        .join("_")
}

/// Normalizes every declaration.
pub fn normalize_indexes(decls: &[IndexDecl]) -> ModelResult<Vec<IndexSpec>> {
    decls.iter().map(IndexDecl::normalize).collect()
}

/// One step needed to bring a store's indexes in line with the declared ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexAction {
    /// Build a declared index the store lacks.
    Create(IndexSpec),
    /// Drop an index the schema no longer declares.
    Drop(String),
    /// Change only the TTL of an existing index in place.
    ModifyTtl { name: String, expire_after_seconds: u64 },
    /// Drop the existing index named `existing` and build `spec`.
    Recreate { existing: String, spec: IndexSpec },
}

/// Compares declared and existing indexes by their default key name.
///
/// The identity index is never dropped.
pub fn plan_index_sync(declared: &[IndexSpec], existing: &[IndexSpec]) -> Vec<IndexAction> {
    let mut actions = Vec::new();

    for spec in declared {
        let key = spec.default_name();
        match existing.iter().find(|old| old.default_name() == key) {
            None => actions.push(IndexAction::Create(spec.clone())),
            Some(old) => {
                let same_options = old.unique == spec.unique && old.name == spec.name;

                match (old.expire_after_seconds, spec.expire_after_seconds) {
                    (old_ttl, new_ttl) if same_options && old_ttl == new_ttl => {}
                    (Some(_), Some(seconds)) if same_options => actions.push(IndexAction::ModifyTtl {
                        name: old.name.clone(),
                        expire_after_seconds: seconds,
                    }),
                    _ => actions.push(IndexAction::Recreate {
                        existing: old.name.clone(),
                        spec: spec.clone(),
                    }),
                }
            }
        }
    }

    for old in existing {
        if old.name == ID_INDEX_NAME {
            continue;
        }

        let key = old.default_name();
        if !declared.iter().any(|spec| spec.default_name() == key) {
            actions.push(IndexAction::Drop(old.name.clone()));
        }
    }

    actions
}
