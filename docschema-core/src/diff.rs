//! The diff engine and save planning.
//!
//! [`plan_save`] decides which write persists a record, without performing it:
//!
//! - a new record is inserted, whatever the options say;
//! - a loaded record is updated with `$set`/`$unset` restricted to the fields that
//!   changed, or replaced wholesale when a full update is requested;
//! - a loaded record without changes needs no write at all.
//!
//! Required fields are checked for every write, before anything is sent.

use bson::{Bson, Document, oid::ObjectId};

use crate::{
    coerce::Coercer,
    error::{ModelError, ModelResult},
    record::{Record, RecordState},
    schema::ID_FIELD,
    value::Value,
};

/// Options for saving a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Replace the whole stored document instead of sending only the changes.
    pub full_update: bool,
}

impl SaveOptions {
    pub fn full_update() -> Self {
        Self { full_update: true }
    }
}

/// The atomic partial update for one document.
///
/// Keys are dotted wire paths. `unset` maps each removed path to `true`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDescriptor {
    pub set: Document,
    pub unset: Document,
}

impl UpdateDescriptor {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Renders the update with `$set` and `$unset` operators, omitting empty groups.
    pub fn to_update_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.unset.is_empty() {
            update.insert("$unset", self.unset.clone());
        }
        update
    }
}

/// The write that persists a record.
#[derive(Debug, Clone, PartialEq)]
pub enum WritePlan {
    /// Store a new document. `id` is already part of `document`.
    Insert { id: Bson, document: Document },
    /// Apply a partial update to the document with this identity.
    Update { id: Bson, update: UpdateDescriptor },
    /// Replace the document with this identity.
    Replace { id: Bson, document: Document },
    /// Nothing changed.
    Noop,
}

/// Plans the write for `record`.
///
/// # Errors
///
/// - [`ModelError::RequiredField`] when required fields are absent, anywhere in
///   the record tree.
/// - [`ModelError::InvalidState`] when the record was deleted, was loaded without
///   an identity, or had its identity changed.
pub fn plan_save(record: &Record, options: SaveOptions) -> ModelResult<WritePlan> {
    if record.state() == RecordState::Deleted {
        return Err(ModelError::InvalidState(
            "the record has been deleted".to_string(),
        ));
    }

    let missing = record.missing_required();
    if !missing.is_empty() {
        return Err(ModelError::RequiredField(missing));
    }

    if record.state() == RecordState::New {
        let id = match record.pk() {
            Some(id) => id,
            None => generate_id(record)?,
        };
        let mut document = Document::new();
        document.insert(ID_FIELD, id.clone());
        for (key, value) in record.to_document() {
            document.insert(key, value);
        }
        return Ok(WritePlan::Insert { id, document });
    }

    let id = stored_identity(record)?;

    if options.full_update {
        return Ok(WritePlan::Replace {
            id,
            document: record.to_document(),
        });
    }

    let update = diff(record)?;
    if update.is_empty() {
        Ok(WritePlan::Noop)
    } else {
        Ok(WritePlan::Update { id, update })
    }
}

/// Compares the touched fields of a loaded record against its baseline.
///
/// Untouched nested records are descended into and contribute dotted paths.
/// Arrays are compared only when their field was reassigned.
pub fn diff(record: &Record) -> ModelResult<UpdateDescriptor> {
    let mut update = UpdateDescriptor::default();
    diff_into(record, "", &mut update)?;
    Ok(update)
}

fn diff_into(record: &Record, prefix: &str, update: &mut UpdateDescriptor) -> ModelResult<()> {
    let baseline = record.baseline();

    for field in record.schema().fields() {
        let wire_name = field.wire_name();
        let path = format!("{}{}", prefix, wire_name);
        let current = record.get(field.name());

        if !record.is_touched(field.name()) {
            if let Some(Value::Record(nested)) = current {
                diff_into(nested, &format!("{}.", path), update)?;
            }
            continue;
        }

        let before = baseline.get(wire_name);
        let changed = match current.map(Value::to_bson) {
            Some(now) if before == Some(&now) => None,
            Some(now) => Some(Some(now)),
            None if before.is_some() => Some(None),
            None => None,
        };

        let Some(change) = changed else { continue };

        if prefix.is_empty() && wire_name == ID_FIELD {
            return Err(ModelError::InvalidState(
                "the _id of a stored record cannot change".to_string(),
            ));
        }

        match change {
            Some(now) => update.set.insert(path, now),
            None => update.unset.insert(path, true),
        };
    }

    Ok(())
}

/// The `_id` a loaded record was read or last saved under.
///
/// Writes are addressed by this value, never by the current one: a record whose
/// identity field was reassigned or removed since then cannot be written.
pub(crate) fn stored_identity(record: &Record) -> ModelResult<Bson> {
    let Some(stored) = record.baseline().get(ID_FIELD) else {
        return Err(ModelError::InvalidState(
            "a record without an _id cannot be saved".to_string(),
        ));
    };

    if record.pk().as_ref() != Some(stored) {
        return Err(ModelError::InvalidState(
            "the _id of a stored record cannot change".to_string(),
        ));
    }

    Ok(stored.clone())
}

fn generate_id(record: &Record) -> ModelResult<Bson> {
    let id = Value::Bson(Bson::ObjectId(ObjectId::new()));

    match record.schema().id_field() {
        Some(field) => Ok(Coercer::new()
            .coerce_field(field, id, field.name())?
            .into_bson()),
        None => Ok(id.into_bson()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use crate::{field::FieldSpec, schema::RecordSchema, types::TypeDescriptor};
    use std::sync::Arc;

    fn schemas() -> (Arc<RecordSchema>, Arc<RecordSchema>) {
        let user = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>())
            .field("email", FieldSpec::of::<String>().alias("mail"))
            .build()
            .unwrap();
        let post = RecordSchema::builder("Post")
            .collection("posts")
            .field("a", FieldSpec::of::<i64>())
            .field("b", FieldSpec::of::<i64>().alias("bee"))
            .field("c", FieldSpec::of::<i64>())
            .field("user", TypeDescriptor::record(&user))
            .field("tags", FieldSpec::of::<Vec<String>>())
            .build()
            .unwrap();
        (user, post)
    }

    fn loaded(schema: &Arc<RecordSchema>) -> Record {
        Record::from_document(
            schema,
            doc! {
                "_id": 1,
                "a": 1,
                "bee": 2,
                "c": 3,
                "user": { "name": "Lucy", "mail": "a@b.com" },
                "tags": ["x"],
            },
        )
        .unwrap()
    }

    #[test]
    fn untouched_record_needs_no_write() {
        let (_, post) = schemas();
        let record = loaded(&post);

        assert_eq!(plan_save(&record, SaveOptions::default()).unwrap(), WritePlan::Noop);
    }

    #[test]
    fn sets_only_the_changed_field() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        record.set("b", 20).unwrap();

        let plan = plan_save(&record, SaveOptions::default()).unwrap();
        assert_eq!(
            plan,
            WritePlan::Update {
                id: Bson::Int32(1),
                update: UpdateDescriptor {
                    set: doc! { "bee": 20 },
                    unset: Document::new(),
                },
            }
        );
    }

    #[test]
    fn unsets_removed_field() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        record.unset("c").unwrap();

        let WritePlan::Update { update, .. } = plan_save(&record, SaveOptions::default()).unwrap() else {
            panic!("expected an update");
        };
        assert_eq!(update.to_update_document(), doc! { "$unset": { "c": true } });
    }

    #[test]
    fn reassigning_the_baseline_value_is_not_a_change() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        record.set("a", 5).unwrap();
        record.set("a", 1).unwrap();

        assert_eq!(plan_save(&record, SaveOptions::default()).unwrap(), WritePlan::Noop);
    }

    #[test]
    fn nested_assignment_produces_dotted_paths() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        let user = record
            .get_mut("user")
            .unwrap()
            .and_then(Value::as_record_mut)
            .unwrap();
        user.set("email", "c@d.com").unwrap();
        user.unset("name").unwrap();

        let update = diff(&record).unwrap();
        assert_eq!(update.set, doc! { "user.mail": "c@d.com" });
        assert_eq!(update.unset, doc! { "user.name": true });
    }

    #[test]
    fn in_place_array_mutation_is_invisible() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        record
            .get_mut("tags")
            .unwrap()
            .and_then(Value::as_array_mut)
            .unwrap()
            .push(Value::from("y"));

        assert_eq!(plan_save(&record, SaveOptions::default()).unwrap(), WritePlan::Noop);

        let WritePlan::Replace { document, .. } = plan_save(&record, SaveOptions::full_update()).unwrap() else {
            panic!("expected a replace");
        };
        assert_eq!(document.get_array("tags").unwrap().len(), 2);
    }

    #[test]
    fn reassigned_array_is_tracked() {
        let (_, post) = schemas();
        let mut record = loaded(&post);
        record.set("tags", vec!["x", "y"]).unwrap();

        let update = diff(&record).unwrap();
        assert_eq!(update.set, doc! { "tags": ["x", "y"] });
    }

    #[test]
    fn new_records_are_inserted_with_generated_id() {
        let (_, post) = schemas();
        let record = Record::new(&post, [("a", 1)]).unwrap();

        for options in [SaveOptions::default(), SaveOptions::full_update()] {
            let WritePlan::Insert { id, document } = plan_save(&record, options).unwrap() else {
                panic!("expected an insert");
            };
            assert!(matches!(id, Bson::ObjectId(_)));
            assert_eq!(document.get("_id"), Some(&id));
            assert_eq!(document.keys().next().map(String::as_str), Some("_id"));
        }
    }

    #[test]
    fn identity_changes_are_rejected() {
        let schema = RecordSchema::builder("Keyed")
            .collection("keyed")
            .field("key", FieldSpec::of::<String>().alias("_id"))
            .build()
            .unwrap();
        let mut record = Record::from_document(&schema, doc! { "_id": "a" }).unwrap();
        record.set("key", "b").unwrap();

        assert!(matches!(
            plan_save(&record, SaveOptions::default()),
            Err(ModelError::InvalidState(_))
        ));
    }

    #[test]
    fn full_update_after_identity_change_is_rejected() {
        let schema = RecordSchema::builder("Keyed")
            .collection("keyed")
            .field("key", FieldSpec::of::<String>().alias("_id"))
            .field("n", FieldSpec::of::<i64>())
            .build()
            .unwrap();
        let mut record = Record::from_document(&schema, doc! { "_id": "a", "n": 1 }).unwrap();

        record.set("key", "b").unwrap();
        assert!(matches!(
            plan_save(&record, SaveOptions::full_update()),
            Err(ModelError::InvalidState(reason)) if reason.contains("cannot change")
        ));

        record.unset("key").unwrap();
        assert!(matches!(
            plan_save(&record, SaveOptions::full_update()),
            Err(ModelError::InvalidState(reason)) if reason.contains("cannot change")
        ));

        record.set("key", "a").unwrap();
        record.set("n", 2).unwrap();
        let plan = plan_save(&record, SaveOptions::full_update()).unwrap();
        assert_eq!(
            plan,
            WritePlan::Replace {
                id: Bson::String("a".into()),
                document: doc! { "_id": "a", "n": 2 },
            }
        );
    }

    #[test]
    fn generated_identity_goes_through_the_identity_field() {
        let schema = RecordSchema::builder("Hex")
            .collection("hex")
            .field(
                "key",
                FieldSpec::of::<String>()
                    .alias("_id")
                    .converter(|value| match value.as_object_id() {
                        Some(oid) => Ok(Value::from(oid.to_hex())),
                        None => Ok(value),
                    }),
            )
            .build()
            .unwrap();
        let record = Record::new(&schema, Vec::<(String, Value)>::new()).unwrap();

        let WritePlan::Insert { id, document } = plan_save(&record, SaveOptions::default()).unwrap()
        else {
            panic!("expected an insert");
        };
        assert!(matches!(&id, Bson::String(hex) if hex.len() == 24));
        assert_eq!(document, doc! { "_id": id });
    }

    #[test]
    fn loaded_record_without_identity_cannot_be_saved() {
        let (_, post) = schemas();
        let mut record = Record::from_document(&post, doc! { "a": 1 }).unwrap();
        record.set("a", 2).unwrap();

        assert!(matches!(
            plan_save(&record, SaveOptions::default()),
            Err(ModelError::InvalidState(_))
        ));
    }
}
