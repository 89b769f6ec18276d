//! Record instances.
//!
//! A [`Record`] holds the canonical values of one document, keyed by declared
//! field name, together with the wire document it had after the last load or save
//! (its baseline) and the set of fields assigned since then.
//!
//! # Change tracking
//!
//! [`Record::set`] and [`Record::unset`] mark a field as touched; the diff engine
//! compares touched fields against the baseline and ignores the rest. Mutation
//! through [`Record::get_mut`] is not tracked, with one exception: a nested record
//! keeps its own tracking, so assignments made on it are picked up as dotted paths.
//! Changes made in place inside an array are never seen; reassign the field or
//! save with a full update.
//!
//! ```ignore
//! let mut post = Record::from_document(&post_schema, document)?;
//! post.set("title", "Hello")?;
//! post.get_mut("user")?
//!     .and_then(Value::as_record_mut)
//!     .map(|user| user.set("name", "Lucy"))
//!     .transpose()?;
//! ```

use std::{collections::HashSet, fmt, sync::Arc};

use bson::{Bson, Document};
use indexmap::IndexMap;

use crate::{
    coerce::Coercer,
    error::{ModelError, ModelResult},
    schema::{ID_FIELD, RecordSchema},
    value::Value,
};

/// Where a record stands in its persistence lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// Constructed in memory and never stored.
    New,
    /// Loaded from or saved to the store.
    Loaded,
    /// Removed from the store.
    Deleted,
}

/// A live instance of a record type.
#[derive(Clone)]
pub struct Record {
    schema: Arc<RecordSchema>,
    values: IndexMap<String, Value>,
    id: Option<Bson>,
    extra: Document,
    baseline: Document,
    touched: HashSet<String>,
    state: RecordState,
}

impl Record {
    /// Builds a new record from user supplied fields keyed by declared or wire name.
    ///
    /// Required fields may be missing; they are checked when the record is saved.
    pub fn new<I, K, V>(schema: &Arc<RecordSchema>, fields: I) -> ModelResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Coercer::new().construct(schema, fields)
    }

    /// Builds a loaded record from a stored document.
    pub fn from_document(schema: &Arc<RecordSchema>, document: Document) -> ModelResult<Record> {
        Coercer::new().load(schema, document)
    }

    pub(crate) fn from_parts(
        schema: Arc<RecordSchema>,
        values: IndexMap<String, Value>,
        id: Option<Bson>,
        extra: Document,
    ) -> Record {
        Record {
            schema,
            values,
            id,
            extra,
            baseline: Document::new(),
            touched: HashSet::new(),
            state: RecordState::New,
        }
    }

    pub fn schema(&self) -> &Arc<RecordSchema> {
        &self.schema
    }

    pub fn state(&self) -> RecordState {
        self.state
    }

    /// The document identity, if known.
    pub fn pk(&self) -> Option<Bson> {
        match self.schema.id_field() {
            Some(field) => self.values.get(field.name()).map(Value::to_bson),
            None => self.id.clone(),
        }
    }

    /// The canonical value of a declared field, or `None` when it is absent or
    /// the name is not declared.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Mutable access to a field's canonical value. The field is not marked as
    /// touched; see the module documentation for what is tracked.
    pub fn get_mut(&mut self, name: &str) -> ModelResult<Option<&mut Value>> {
        self.schema.field_or_err(name)?;
        Ok(self.values.get_mut(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Present fields in declaration order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schema.fields().iter().filter_map(|field| {
            self.values
                .get(field.name())
                .map(|value| (field.name(), value))
        })
    }

    /// Assigns a declared field through the converter, type check, constraints
    /// and validator. On failure the previous value is kept.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> ModelResult<()> {
        let field = self.schema.field_or_err(name)?;
        let value = Coercer::new().coerce_field(field, value.into(), name)?;

        self.values.insert(name.to_string(), value);
        self.touched.insert(name.to_string());
        Ok(())
    }

    /// Removes a declared field. Removing an absent field is not an error.
    pub fn unset(&mut self, name: &str) -> ModelResult<()> {
        self.schema.field_or_err(name)?;

        self.values.shift_remove(name);
        self.touched.insert(name.to_string());
        Ok(())
    }

    /// Undeclared data retained from the input, keyed by wire name.
    pub fn extra(&self) -> &Document {
        &self.extra
    }

    /// The wire document as of the last load or save.
    pub fn baseline(&self) -> &Document {
        &self.baseline
    }

    pub(crate) fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    /// Renders the record as a wire document: identity first, then declared fields
    /// in declaration order under their wire names, then retained extra data.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();

        if let Some(id) = self.pk() {
            document.insert(ID_FIELD, id);
        }

        for field in self.schema.fields() {
            if field.wire_name() == ID_FIELD {
                continue;
            }
            if let Some(value) = self.values.get(field.name()) {
                document.insert(field.wire_name(), value.to_bson());
            }
        }

        for (key, value) in &self.extra {
            if !document.contains_key(key) {
                document.insert(key.clone(), value.clone());
            }
        }

        document
    }

    /// Renders the wire document as JSON. Binary data, timestamps and object ids
    /// use their extended JSON forms.
    pub fn to_json(&self) -> ModelResult<serde_json::Value> {
        Ok(serde_json::to_value(Bson::Document(self.to_document()))?)
    }

    /// Declared paths of required fields that are absent, including those of
    /// nested records and records inside arrays.
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing = Vec::new();
        self.collect_missing("", &mut missing);
        missing
    }

    fn collect_missing(&self, prefix: &str, missing: &mut Vec<String>) {
        for field in self.schema.fields() {
            let path = if prefix.is_empty() {
                field.name().to_string()
            } else {
                format!("{}.{}", prefix, field.name())
            };

            match self.values.get(field.name()) {
                Some(value) => collect_missing_in(value, &path, missing),
                None if field.spec().is_required() => missing.push(path),
                None => {}
            }
        }
    }

    /// Records a successful write: the baseline becomes the current wire document
    /// and tracking is cleared, recursively.
    pub fn mark_persisted(&mut self) {
        for value in self.values.values_mut() {
            persist_nested(value);
        }
        self.baseline = self.to_document();
        self.touched.clear();
        self.state = RecordState::Loaded;
    }

    pub(crate) fn assign_id(&mut self, id: Bson) {
        match self.schema.id_field() {
            Some(field) => {
                self.values.insert(field.name().to_string(), Value::Bson(id));
            }
            None => self.id = Some(id),
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.touched.clear();
        self.state = RecordState::Deleted;
    }
}

/// Required fields absent from the records held by `value`, below `path`.
pub(crate) fn missing_required_in(value: &Value, path: &str) -> Vec<String> {
    let mut missing = Vec::new();
    collect_missing_in(value, path, &mut missing);
    missing
}

fn collect_missing_in(value: &Value, path: &str, missing: &mut Vec<String>) {
    match value {
        Value::Record(record) => record.collect_missing(path, missing),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_missing_in(item, &format!("{}.{}", path, index), missing);
            }
        }
        Value::Bson(_) => {}
    }
}

fn persist_nested(value: &mut Value) {
    match value {
        Value::Record(record) => record.mark_persisted(),
        Value::Array(items) => items.iter_mut().for_each(persist_nested),
        Value::Bson(_) => {}
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.schema, &other.schema)
            && self.values == other.values
            && self.pk() == other.pk()
            && self.extra == other.extra
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("schema", &self.schema.name())
            .field("state", &self.state)
            .field("id", &self.id)
            .field("values", &self.values)
            .field("extra", &self.extra)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{field::FieldSpec, types::TypeDescriptor};
    use bson::{doc, oid::ObjectId, spec::BinarySubtype, Binary};

    fn user() -> Arc<RecordSchema> {
        RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>().required())
            .field("email", FieldSpec::of::<String>())
            .build()
            .unwrap()
    }

    #[test]
    fn set_is_all_or_nothing() {
        let schema = user();
        let mut record = Record::new(&schema, [("name", "Lucy")]).unwrap();

        assert!(record.set("name", 42).is_err());
        assert_eq!(record.get("name").and_then(Value::as_str), Some("Lucy"));
        assert!(matches!(record.set("age", 1), Err(ModelError::UnknownField { .. })));
    }

    #[test]
    fn unset_is_idempotent() {
        let schema = user();
        let mut record = Record::new(&schema, [("name", "Lucy")]).unwrap();

        record.unset("email").unwrap();
        record.unset("name").unwrap();
        record.unset("name").unwrap();

        assert!(record.get("name").is_none());
        assert!(matches!(record.unset("nope"), Err(ModelError::UnknownField { .. })));
    }

    #[test]
    fn exports_in_declaration_order() {
        let schema = user();
        let mut record = Record::new(&schema, [("email", "a@b.com")]).unwrap();
        record.set("name", "Lucy").unwrap();

        let keys: Vec<_> = record.to_document().keys().cloned().collect();
        assert_eq!(keys, ["name", "email"]);
        let names: Vec<_> = record.values().map(|(name, _)| name).collect();
        assert_eq!(names, ["name", "email"]);
    }

    #[test]
    fn declared_identity_field_is_exported_first() {
        let schema = RecordSchema::builder("Tagged")
            .collection("tags")
            .field("label", FieldSpec::of::<String>())
            .field("key", FieldSpec::of::<String>().alias("_id"))
            .build()
            .unwrap();

        let record = Record::from_document(&schema, doc! { "label": "x", "_id": "k" }).unwrap();

        assert_eq!(record.pk(), Some(Bson::from("k")));
        assert_eq!(record.to_document(), doc! { "_id": "k", "label": "x" });
    }

    #[test]
    fn reports_missing_required_in_nested_records() {
        let user = user();
        let schema = RecordSchema::builder("Thread")
            .field("owner", TypeDescriptor::record(&user))
            .field("members", TypeDescriptor::array(TypeDescriptor::record(&user)))
            .build()
            .unwrap();

        let record = Record::new(
            &schema,
            [
                ("owner", Value::from(doc! { "email": "a@b.com" })),
                ("members", Value::from(vec![doc! { "name": "x" }, doc! {}])),
            ],
        )
        .unwrap();

        assert_eq!(record.missing_required(), ["owner.name", "members.1.name"]);
    }

    #[test]
    fn mark_persisted_snapshots_nested_records() {
        let user = user();
        let schema = RecordSchema::builder("Post")
            .field("user", TypeDescriptor::record(&user))
            .build()
            .unwrap();
        let mut record = Record::new(&schema, [("user", doc! { "name": "Lucy" })]).unwrap();
        assert_eq!(record.state(), RecordState::New);

        record.mark_persisted();

        assert_eq!(record.state(), RecordState::Loaded);
        assert_eq!(record.baseline(), &doc! { "user": { "name": "Lucy" } });
        let nested = record.get("user").and_then(Value::as_record).unwrap();
        assert_eq!(nested.baseline(), &doc! { "name": "Lucy" });
    }

    #[test]
    fn json_export_uses_extended_forms() {
        let schema = RecordSchema::builder("Blob")
            .field("data", FieldSpec::of::<Binary>())
            .field("at", FieldSpec::of::<bson::DateTime>())
            .build()
            .unwrap();
        let id = ObjectId::parse_str("5f1d7b2c9a8e4b6c3d2e1f00").unwrap();
        let record = Record::from_document(
            &schema,
            doc! {
                "_id": id,
                "data": Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] },
                "at": bson::DateTime::from_millis(0),
            },
        )
        .unwrap();

        let json = record.to_json().unwrap();

        assert_eq!(json["_id"]["$oid"], "5f1d7b2c9a8e4b6c3d2e1f00");
        assert!(json["data"].get("$binary").is_some());
        assert!(json["at"].get("$date").is_some());
    }
}
