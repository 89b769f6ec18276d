//! The coercion engine.
//!
//! Turns raw, document-shaped input into canonical [`Record`]s. Every declared
//! field goes through the same pipeline, in this order:
//!
//! 1. resolve the raw value by wire name, then by declared name; when both are
//!    present the wire value wins and the declared key is reported as unknown;
//! 2. when absent, apply the field's default policy;
//! 3. run the converter, if any;
//! 4. check the value against the field's [`TypeDescriptor`], recursing into
//!    nested records and arrays;
//! 5. run built-in constraints, then the validator, if any.
//!
//! Required fields are not checked here. Keys that match no declared field are
//! reported through `tracing` and collected on the [`Coercer`] when the schema
//! asks for warnings, and kept on the record when the schema retains extra data.
//!
//! Recursion follows the type structure only, which schema construction bounds by
//! [`MAX_TYPE_DEPTH`](crate::types::MAX_TYPE_DEPTH).

use std::sync::Arc;

use bson::{Bson, Document};
use indexmap::IndexMap;

use crate::{
    error::{ModelError, ModelResult},
    field::Field,
    record::Record,
    schema::{ID_FIELD, RecordSchema},
    types::{ContainerKind, ScalarKind, TypeDescriptor},
    value::{Value, bson_kind},
};

/// Raw input keyed by wire or declared name.
pub type RawFields = IndexMap<String, Value>;

/// Runs the coercion pipeline and remembers the unknown keys it encountered.
///
/// A coercer is cheap to create. Use one directly when the unknown-key report is
/// of interest; otherwise [`Record::new`] and [`Record::from_document`] create
/// one internally.
#[derive(Debug, Default)]
pub struct Coercer {
    unknown_keys: Vec<String>,
}

impl Coercer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dotted wire paths of incoming keys that matched no declared field.
    pub fn unknown_keys(&self) -> &[String] {
        &self.unknown_keys
    }

    /// Builds a new, never persisted record from user supplied fields.
    pub fn construct<I, K, V>(&mut self, schema: &Arc<RecordSchema>, fields: I) -> ModelResult<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let raw = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        self.coerce_record(schema, raw, "")
    }

    /// Builds a loaded record from a document read from the store.
    pub fn load(&mut self, schema: &Arc<RecordSchema>, document: Document) -> ModelResult<Record> {
        let mut record = self.coerce_record(schema, raw_fields(document), "")?;
        record.mark_persisted();
        Ok(record)
    }

    fn coerce_record(
        &mut self,
        schema: &Arc<RecordSchema>,
        mut raw: RawFields,
        prefix: &str,
    ) -> ModelResult<Record> {
        let mut values = IndexMap::with_capacity(schema.fields().len());

        for field in schema.fields() {
            let path = join(prefix, field.name());
            let by_wire = raw.shift_remove(field.wire_name());
            let by_name = if field.wire_name() == field.name() {
                None
            } else {
                raw.shift_remove(field.name())
            };
            let incoming = match (by_wire, by_name) {
                (Some(value), Some(_)) => {
                    if schema.options().warn_extra_data {
                        tracing::warn!(
                            schema = schema.name(),
                            key = %path,
                            wire_name = field.wire_name(),
                            "Incoming data has both the declared and the wire name, keeping the wire value"
                        );
                        self.unknown_keys.push(path.clone());
                    }
                    Some(value)
                }
                (by_wire, by_name) => by_wire.or(by_name),
            };

            let Some(value) = incoming.or_else(|| field.spec().default_policy().produce()) else {
                continue;
            };

            let value = self.coerce_field(field, value, &path)?;
            values.insert(field.name().to_string(), value);
        }

        let id = match schema.id_field() {
            Some(_) => None,
            None => raw.shift_remove(ID_FIELD).map(Value::into_bson),
        };

        let options = schema.options();
        let mut extra = Document::new();

        for (key, value) in raw {
            if options.warn_extra_data {
                let path = join(prefix, &key);
                tracing::warn!(
                    schema = schema.name(),
                    key = %path,
                    "Incoming data has a field that is not declared"
                );
                self.unknown_keys.push(path);
            }
            if options.retain_extra_data {
                extra.insert(key, value.into_bson());
            }
        }

        Ok(Record::from_parts(Arc::clone(schema), values, id, extra))
    }

    /// Runs steps 3 to 5 of the pipeline for one present value.
    pub(crate) fn coerce_field(&mut self, field: &Field, raw: Value, path: &str) -> ModelResult<Value> {
        let spec = field.spec();

        let raw = match &spec.converter {
            Some(convert) => convert(raw).map_err(|reason| ModelError::Conversion {
                path: path.to_string(),
                reason,
            })?,
            None => raw,
        };

        let value = self.coerce_type(&spec.ty, raw, path)?;

        for constraint in &spec.constraints {
            constraint
                .check(&value)
                .map_err(|reason| ModelError::validation(path, reason))?;
        }

        if let Some(validate) = &spec.validator {
            if !validate(&value) {
                return Err(ModelError::validation(path, "rejected by validator"));
            }
        }

        Ok(value)
    }

    pub(crate) fn coerce_type(&mut self, ty: &TypeDescriptor, value: Value, path: &str) -> ModelResult<Value> {
        match ty {
            TypeDescriptor::Any => Ok(Value::Bson(value.into_bson())),
            TypeDescriptor::Scalar(kind) => coerce_scalar(*kind, value, path),
            TypeDescriptor::Opaque(kind) => coerce_opaque(*kind, value, path),
            TypeDescriptor::Record(schema) => match value {
                Value::Record(record) if Arc::ptr_eq(record.schema(), schema) => {
                    Ok(Value::Record(record))
                }
                Value::Bson(Bson::Document(document)) => self
                    .coerce_record(schema, raw_fields(document), path)
                    .map(Value::Record),
                other => Err(ModelError::mismatch(path, ty.to_string(), other.kind_name())),
            },
            TypeDescriptor::Array(element) => {
                let items = match value {
                    Value::Array(items) => items,
                    Value::Bson(Bson::Array(items)) => items.into_iter().map(Value::Bson).collect(),
                    other => {
                        return Err(ModelError::mismatch(path, ty.to_string(), other.kind_name()));
                    }
                };

                let mut coerced = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let item_path = format!("{}.{}", path, index);
                    coerced.push(self.coerce_type(element, item, &item_path)?);
                }
                Ok(Value::Array(coerced))
            }
        }
    }
}

fn coerce_scalar(kind: ScalarKind, value: Value, path: &str) -> ModelResult<Value> {
    let bson = match value {
        Value::Bson(bson) => bson,
        other => return Err(ModelError::mismatch(path, kind.name(), other.kind_name())),
    };

    let accepted = match (kind, bson) {
        (ScalarKind::String, bson @ Bson::String(_)) => bson,
        (ScalarKind::Integer, bson @ (Bson::Int32(_) | Bson::Int64(_))) => bson,
        (ScalarKind::Float, bson @ Bson::Double(_)) => bson,
        (ScalarKind::Float, Bson::Int32(n)) => Bson::Double(n as f64),
        (ScalarKind::Float, Bson::Int64(n)) => Bson::Double(n as f64),
        (ScalarKind::Boolean, bson @ Bson::Boolean(_)) => bson,
        (ScalarKind::Bytes, bson @ Bson::Binary(_)) => bson,
        (ScalarKind::DateTime, bson @ Bson::DateTime(_)) => bson,
        (ScalarKind::ObjectId, bson @ Bson::ObjectId(_)) => bson,
        (kind, other) => {
            return Err(ModelError::mismatch(path, kind.name(), bson_kind(&other)));
        }
    };

    Ok(Value::Bson(accepted))
}

fn coerce_opaque(kind: ContainerKind, value: Value, path: &str) -> ModelResult<Value> {
    match (kind, value) {
        (ContainerKind::Map, value @ Value::Bson(Bson::Document(_))) => Ok(value),
        (ContainerKind::Map, Value::Record(record)) => {
            Ok(Value::Bson(Bson::Document(record.to_document())))
        }
        (ContainerKind::List, value @ Value::Bson(Bson::Array(_))) => Ok(value),
        (ContainerKind::List, value @ Value::Array(_)) => Ok(Value::Bson(value.into_bson())),
        (kind, other) => Err(ModelError::mismatch(path, kind.name(), other.kind_name())),
    }
}

fn raw_fields(document: Document) -> RawFields {
    document
        .into_iter()
        .map(|(key, value)| (key, Value::Bson(value)))
        .collect()
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use bson::{doc, oid::ObjectId};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn user() -> Arc<RecordSchema> {
        RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>())
            .field("email", FieldSpec::of::<String>())
            .build()
            .unwrap()
    }

    fn post(user: &Arc<RecordSchema>) -> Arc<RecordSchema> {
        RecordSchema::builder("Post")
            .collection("posts")
            .field("title", FieldSpec::of::<String>().alias("t"))
            .field("user", TypeDescriptor::record(user))
            .field("tags", FieldSpec::of::<Vec<String>>())
            .field("score", FieldSpec::of::<f64>())
            .build()
            .unwrap()
    }

    #[test]
    fn prefers_wire_name_over_declared_name() {
        let schema = post(&user());
        let record = Coercer::new()
            .construct(&schema, [("t", Value::from("wire")), ("title", Value::from("declared"))])
            .unwrap();

        assert_eq!(record.get("title").and_then(Value::as_str), Some("wire"));
    }

    #[test]
    fn shadowed_declared_name_is_reported_and_never_exported() {
        let schema = post(&user());
        let mut coercer = Coercer::new();
        let record = coercer
            .construct(&schema, [("t", Value::from("wire")), ("title", Value::from("declared"))])
            .unwrap();

        assert_eq!(coercer.unknown_keys(), ["title"]);
        assert!(record.extra().is_empty());
        assert_eq!(record.to_document(), doc! { "t": "wire" });

        let mut coercer = Coercer::new();
        let record = coercer
            .load(&schema, doc! { "title": "declared", "t": "wire" })
            .unwrap();
        assert_eq!(coercer.unknown_keys(), ["title"]);
        assert_eq!(record.baseline(), &doc! { "t": "wire" });
    }

    #[test]
    fn accepts_declared_name_when_alias_is_absent() {
        let schema = post(&user());
        let record = Coercer::new()
            .construct(&schema, [("title", "declared")])
            .unwrap();

        assert_eq!(record.get("title").and_then(Value::as_str), Some("declared"));
        assert_eq!(record.to_document(), doc! { "t": "declared" });
    }

    #[test]
    fn widens_integers_for_float_fields_only() {
        let schema = post(&user());

        let record = Coercer::new().construct(&schema, [("score", 3)]).unwrap();
        assert_eq!(record.get("score").and_then(Value::as_f64), Some(3.0));

        let err = Coercer::new()
            .construct(&schema, [("title", 3)])
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::TypeMismatch { path, expected, actual }
                if path == "title" && expected == "string" && actual == "integer"
        ));
    }

    #[test]
    fn reports_nested_array_element_paths() {
        let schema = post(&user());
        let err = Coercer::new()
            .load(&schema, doc! { "tags": ["a", 1] })
            .unwrap_err();

        assert!(matches!(err, ModelError::TypeMismatch { path, .. } if path == "tags.1"));
    }

    #[test]
    fn coerces_nested_mappings_into_records() {
        let user = user();
        let schema = post(&user);
        let record = Coercer::new()
            .load(&schema, doc! { "user": { "name": "Lucy", "email": "a@b.com" } })
            .unwrap();

        let nested = record.get("user").and_then(Value::as_record).unwrap();
        assert!(Arc::ptr_eq(nested.schema(), &user));
        assert_eq!(nested.get("name").and_then(Value::as_str), Some("Lucy"));
    }

    #[test]
    fn rejects_records_of_another_schema() {
        let user = user();
        let schema = post(&user);
        let other = RecordSchema::builder("User").build().unwrap();
        let stranger = Record::new(&other, Vec::<(String, Value)>::new()).unwrap();

        let err = Coercer::new()
            .construct(&schema, [("user", stranger)])
            .unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { expected, .. } if expected == "record User"));
    }

    #[test]
    fn collects_and_retains_unknown_keys() {
        let schema = post(&user());
        let id = ObjectId::new();
        let mut coercer = Coercer::new();
        let record = coercer
            .load(
                &schema,
                doc! { "_id": id, "t": "x", "legacy": 1, "user": { "name": "Lucy", "nick": "L" } },
            )
            .unwrap();

        assert_eq!(coercer.unknown_keys(), ["user.nick", "legacy"]);
        assert_eq!(record.pk(), Some(Bson::ObjectId(id)));
        assert_eq!(record.extra(), &doc! { "legacy": 1 });
    }

    #[test]
    fn silent_schemas_drop_unknown_keys() {
        let schema = RecordSchema::builder("Quiet")
            .field("a", FieldSpec::of::<i64>())
            .warn_extra_data(false)
            .retain_extra_data(false)
            .build()
            .unwrap();
        let mut coercer = Coercer::new();
        let record = coercer.load(&schema, doc! { "a": 1, "b": 2 }).unwrap();

        assert!(coercer.unknown_keys().is_empty());
        assert!(record.extra().is_empty());
    }

    #[test]
    fn runs_converter_before_type_check() {
        let schema = RecordSchema::builder("Counter")
            .field("count", FieldSpec::of::<i64>().min_value(0.0))
            .converter("count", |value| match value.as_str() {
                Some(s) => s.parse::<i64>().map(Value::from).map_err(|e| e.to_string()),
                None => Ok(value),
            })
            .build()
            .unwrap();

        let record = Coercer::new().construct(&schema, [("count", "12")]).unwrap();
        assert_eq!(record.get("count").and_then(Value::as_i64), Some(12));

        let err = Coercer::new().construct(&schema, [("count", "twelve")]).unwrap_err();
        assert!(matches!(err, ModelError::Conversion { path, .. } if path == "count"));

        let err = Coercer::new().construct(&schema, [("count", "-1")]).unwrap_err();
        assert!(matches!(err, ModelError::Validation { reason, .. } if reason.contains("less than")));
    }

    #[test]
    fn applies_default_policies_to_absent_fields() {
        let serial = Arc::new(AtomicI64::new(1));
        let next = Arc::clone(&serial);
        let schema = RecordSchema::builder("Ticket")
            .field("status", FieldSpec::of::<String>().default_value("open"))
            .field(
                "number",
                FieldSpec::of::<i64>().default_with(move || Value::from(next.fetch_add(1, Ordering::SeqCst))),
            )
            .field("note", FieldSpec::of::<String>())
            .build()
            .unwrap();

        let first = Coercer::new().construct(&schema, Vec::<(String, Value)>::new()).unwrap();
        let second = Coercer::new().load(&schema, doc! {}).unwrap();
        let given = Coercer::new()
            .construct(&schema, [("status", "closed")])
            .unwrap();

        assert_eq!(first.to_document(), doc! { "status": "open", "number": 1i64 });
        assert_eq!(second.to_document(), doc! { "status": "open", "number": 2i64 });
        assert_eq!(given.get("status").and_then(Value::as_str), Some("closed"));
        assert!(!first.contains("note"));
        assert_eq!(serial.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn validator_sees_canonical_value() {
        let schema = RecordSchema::builder("Ratio")
            .field("value", FieldSpec::of::<f64>())
            .validator("value", |value| value.as_f64().is_some())
            .build()
            .unwrap();

        assert!(Coercer::new().construct(&schema, [("value", 1)]).is_ok());
    }

    #[test]
    fn opaque_and_any_accept_values_as_is() {
        let schema = RecordSchema::builder("Bag")
            .field("meta", TypeDescriptor::map())
            .field("items", TypeDescriptor::list())
            .field("anything", TypeDescriptor::any())
            .build()
            .unwrap();

        let record = Coercer::new()
            .load(&schema, doc! { "meta": { "x": [1, { "y": 2 }] }, "items": [1, "a"], "anything": null })
            .unwrap();

        assert_eq!(
            record.to_document(),
            doc! { "meta": { "x": [1, { "y": 2 }] }, "items": [1, "a"], "anything": null }
        );

        let err = Coercer::new().construct(&schema, [("meta", 1)]).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { expected, .. } if expected == "mapping"));
    }
}
