//! Schema-aware checking of raw update documents.
//!
//! Bulk updates bypass records entirely, so [`clean_update`] holds them to the
//! same rules a record would: every path must lead somewhere the record type
//! allows, values written by `$set`, `$push` and `$addToSet` run through the
//! coercion pipeline, and operators that only make sense for some kinds of
//! field (`$inc` on numbers, `$pop` on arrays, `$currentDate` on datetimes) are
//! refused elsewhere.
//!
//! Paths are dotted wire paths. Numeric segments and the positional forms `$`,
//! `$[]` and `$[<identifier>]` step into arrays. Anything below an opaque
//! container, an untyped field or an undeclared key is accepted as-is; undeclared
//! keys are reported through `tracing`.
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::update::clean_update;
//! use bson::doc;
//!
//! let update = clean_update(&posts, doc! { "$set": { "score": 3 }, "$push": { "tags": "rust" } })?;
//! assert_eq!(update, doc! { "$set": { "score": 3.0 }, "$push": { "tags": "rust" } });
//! ```

use bson::{Bson, Document};

use crate::{
    coerce::Coercer,
    error::{ModelError, ModelResult},
    field::Field,
    record::missing_required_in,
    schema::RecordSchema,
    types::{ContainerKind, ScalarKind, TypeDescriptor},
    value::Value,
};

/// Where a dotted update path leads.
#[derive(Debug, Clone, Copy)]
pub enum PathTarget<'a> {
    /// A declared field.
    Field(&'a Field),
    /// An element of a typed array.
    Element(&'a TypeDescriptor),
    /// Unchecked territory.
    Any,
}

impl<'a> PathTarget<'a> {
    /// The type the target must hold, if it is checked at all.
    pub fn ty(self) -> Option<&'a TypeDescriptor> {
        match self {
            PathTarget::Field(field) => Some(field.ty()),
            PathTarget::Element(ty) => Some(ty),
            PathTarget::Any => None,
        }
    }
}

/// Resolves a dotted wire path against `schema`.
///
/// # Errors
///
/// [`ModelError::InvalidUpdate`] when a segment is empty or cannot step into
/// the type reached so far, such as a name below a scalar or an index into a
/// nested record.
pub fn resolve_path<'a>(schema: &'a RecordSchema, path: &str) -> ModelResult<PathTarget<'a>> {
    let mut segments = path.split('.');
    let mut target = match segments.next() {
        Some(segment) => declared(schema, segment, path)?,
        None => return Err(unresolvable(path, "the path is empty")),
    };

    for segment in segments {
        let Some(ty) = target.ty() else {
            return Ok(PathTarget::Any);
        };

        target = match (ty, is_position(segment)) {
            (TypeDescriptor::Any, _) => PathTarget::Any,
            (TypeDescriptor::Opaque(ContainerKind::Map), false) => PathTarget::Any,
            (TypeDescriptor::Opaque(ContainerKind::List), true) => PathTarget::Any,
            (TypeDescriptor::Array(element), true) => PathTarget::Element(element),
            (TypeDescriptor::Record(nested), false) => declared(nested, segment, path)?,
            (ty, _) => {
                return Err(unresolvable(
                    path,
                    &format!("{:?} cannot follow a {}", segment, ty),
                ));
            }
        };
    }

    Ok(target)
}

/// Checks `update` against `schema` and returns it with coerced values.
///
/// Operators other than the ones listed in the module documentation are passed
/// through unchecked.
///
/// # Errors
///
/// - [`ModelError::InvalidUpdate`] for an empty update, a top-level key that is
///   not an operator, an unresolvable path, or an operator aimed at the wrong
///   kind of field
/// - [`ModelError::RequiredField`] when `$unset` or `$rename` would remove a
///   required field, or a written record lacks one
/// - coercion errors for values that do not fit their path
pub fn clean_update(schema: &RecordSchema, update: Document) -> ModelResult<Document> {
    if update.is_empty() {
        return Err(ModelError::InvalidUpdate("the update document is empty".to_string()));
    }

    let mut coercer = Coercer::new();
    let mut cleaned = Document::new();

    for (operator, operand) in update {
        if !operator.starts_with('$') {
            return Err(ModelError::InvalidUpdate(format!(
                "{:?} is not an update operator; replace the document instead",
                operator
            )));
        }
        let Bson::Document(fields) = operand else {
            return Err(ModelError::InvalidUpdate(format!(
                "{} expects a document of paths",
                operator
            )));
        };

        let fields = match operator.as_str() {
            "$set" => set_values(&mut coercer, schema, fields)?,
            "$push" | "$addToSet" => push_values(&mut coercer, schema, &operator, fields)?,
            "$pop" | "$pull" | "$pullAll" => {
                expect_kind(schema, &operator, fields, "an array", is_array)?
            }
            "$inc" | "$mul" => expect_kind(schema, &operator, fields, "a number", is_number)?,
            "$currentDate" => expect_kind(schema, &operator, fields, "a datetime", is_datetime)?,
            "$unset" | "$rename" => {
                refuse_required(schema, &fields)?;
                expect_kind(schema, &operator, fields, "a field", |_| true)?
            }
            "$min" | "$max" => expect_kind(schema, &operator, fields, "a field", |_| true)?,
            _ => {
                tracing::debug!(schema = schema.name(), operator = %operator, "Update operator is not checked");
                fields
            }
        };

        cleaned.insert(operator, fields);
    }

    Ok(cleaned)
}

fn set_values(coercer: &mut Coercer, schema: &RecordSchema, fields: Document) -> ModelResult<Document> {
    let mut cleaned = Document::new();

    for (path, value) in fields {
        let value = match resolve_path(schema, &path)? {
            PathTarget::Field(field) => {
                complete(coercer.coerce_field(field, Value::Bson(value), &path)?, &path)?
            }
            PathTarget::Element(ty) => complete(coercer.coerce_type(ty, Value::Bson(value), &path)?, &path)?,
            PathTarget::Any => value,
        };
        cleaned.insert(path, value);
    }

    Ok(cleaned)
}

fn push_values(
    coercer: &mut Coercer,
    schema: &RecordSchema,
    operator: &str,
    fields: Document,
) -> ModelResult<Document> {
    let mut cleaned = Document::new();

    for (path, value) in fields {
        let element = match resolve_path(schema, &path)?.ty() {
            Some(TypeDescriptor::Array(element)) => Some(element.as_ref()),
            Some(ty) if !is_array(ty) => return Err(misdirected(operator, "an array", &path, ty)),
            _ => None,
        };
        let Some(element) = element else {
            cleaned.insert(path, value);
            continue;
        };

        let value = match value {
            Bson::Document(mut modifiers) if modifiers.contains_key("$each") => {
                let Some(Bson::Array(items)) = modifiers.remove("$each") else {
                    return Err(ModelError::InvalidUpdate(format!(
                        "$each expects an array at {}",
                        path
                    )));
                };

                let mut each = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let item_path = format!("{}.{}", path, index);
                    let item = coercer.coerce_type(element, Value::Bson(item), &item_path)?;
                    each.push(complete(item, &item_path)?);
                }

                let mut rebuilt = Document::new();
                rebuilt.insert("$each", each);
                for (key, modifier) in modifiers {
                    rebuilt.insert(key, modifier);
                }
                Bson::Document(rebuilt)
            }
            item => complete(coercer.coerce_type(element, Value::Bson(item), &path)?, &path)?,
        };
        cleaned.insert(path, value);
    }

    Ok(cleaned)
}

fn expect_kind(
    schema: &RecordSchema,
    operator: &str,
    fields: Document,
    expected: &str,
    accepts: impl Fn(&TypeDescriptor) -> bool,
) -> ModelResult<Document> {
    for path in fields.keys() {
        if let Some(ty) = resolve_path(schema, path)?.ty() {
            if !accepts(ty) {
                return Err(misdirected(operator, expected, path, ty));
            }
        }
    }

    Ok(fields)
}

fn refuse_required(schema: &RecordSchema, fields: &Document) -> ModelResult<()> {
    let required: Vec<String> = fields
        .keys()
        .filter(|path| {
            matches!(
                resolve_path(schema, path),
                Ok(PathTarget::Field(field)) if field.spec().is_required()
            )
        })
        .cloned()
        .collect();

    if required.is_empty() {
        Ok(())
    } else {
        Err(ModelError::RequiredField(required))
    }
}

fn complete(value: Value, path: &str) -> ModelResult<Bson> {
    let missing = missing_required_in(&value, path);
    if !missing.is_empty() {
        return Err(ModelError::RequiredField(missing));
    }

    Ok(value.into_bson())
}

fn declared<'a>(schema: &'a RecordSchema, segment: &str, path: &str) -> ModelResult<PathTarget<'a>> {
    if segment.is_empty() {
        return Err(unresolvable(path, "it has an empty segment"));
    }
    if is_position(segment) {
        return Err(unresolvable(
            path,
            &format!("{:?} cannot index record {}", segment, schema.name()),
        ));
    }

    match schema.field_by_wire(segment) {
        Some(field) => Ok(PathTarget::Field(field)),
        None => {
            tracing::warn!(
                schema = schema.name(),
                path,
                key = segment,
                "Update path is not declared"
            );
            Ok(PathTarget::Any)
        }
    }
}

/// Array indexes and the positional operators.
fn is_position(segment: &str) -> bool {
    segment == "$"
        || (segment.starts_with("$[") && segment.ends_with(']'))
        || (!segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit()))
}

fn is_array(ty: &TypeDescriptor) -> bool {
    matches!(
        ty,
        TypeDescriptor::Array(_) | TypeDescriptor::Opaque(ContainerKind::List) | TypeDescriptor::Any
    )
}

fn is_number(ty: &TypeDescriptor) -> bool {
    matches!(
        ty,
        TypeDescriptor::Scalar(ScalarKind::Integer | ScalarKind::Float) | TypeDescriptor::Any
    )
}

fn is_datetime(ty: &TypeDescriptor) -> bool {
    matches!(ty, TypeDescriptor::Scalar(ScalarKind::DateTime) | TypeDescriptor::Any)
}

fn unresolvable(path: &str, reason: &str) -> ModelError {
    ModelError::InvalidUpdate(format!("cannot resolve {}: {}", path, reason))
}

fn misdirected(operator: &str, expected: &str, path: &str, ty: &TypeDescriptor) -> ModelError {
    ModelError::InvalidUpdate(format!(
        "{} needs {} at {}, found {}",
        operator, expected, path, ty
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldSpec;
    use bson::doc;
    use std::sync::Arc;

    fn schemas() -> (Arc<RecordSchema>, Arc<RecordSchema>) {
        let user = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>().required())
            .field("email", FieldSpec::of::<String>().alias("mail"))
            .build()
            .unwrap();
        let post = RecordSchema::builder("Post")
            .collection("posts")
            .field("title", FieldSpec::of::<String>().alias("t").required())
            .field("score", FieldSpec::of::<f64>().max_value(10.0))
            .field("views", FieldSpec::of::<i64>())
            .field("user", TypeDescriptor::record(&user))
            .field("readers", TypeDescriptor::array(TypeDescriptor::record(&user)))
            .field("tags", FieldSpec::of::<Vec<String>>())
            .field("meta", TypeDescriptor::map())
            .field("at", FieldSpec::of::<bson::DateTime>())
            .build()
            .unwrap();
        (user, post)
    }

    #[test]
    fn resolves_wire_paths_through_records_and_arrays() {
        let (user, post) = schemas();

        assert!(matches!(
            resolve_path(&post, "user.mail").unwrap(),
            PathTarget::Field(field) if field.name() == "email"
        ));
        assert!(matches!(
            resolve_path(&post, "readers.$[r].name").unwrap(),
            PathTarget::Field(field) if field.name() == "name"
        ));
        assert!(matches!(
            resolve_path(&post, "readers.0").unwrap().ty(),
            Some(TypeDescriptor::Record(schema)) if Arc::ptr_eq(schema, &user)
        ));
        assert!(matches!(resolve_path(&post, "meta.a.b.0").unwrap(), PathTarget::Any));
        assert!(matches!(resolve_path(&post, "legacy.x").unwrap(), PathTarget::Any));
    }

    #[test]
    fn rejects_paths_the_type_cannot_hold() {
        let (_, post) = schemas();

        for path in ["title.x", "tags.first", "user.0", "0", "user..name", "readers.$.name.x"] {
            assert!(
                matches!(resolve_path(&post, path), Err(ModelError::InvalidUpdate(_))),
                "{} should not resolve",
                path
            );
        }
    }

    #[test]
    fn coerces_set_values_through_the_field_pipeline() {
        let (_, post) = schemas();

        let update = clean_update(
            &post,
            doc! { "$set": { "score": 3, "user.mail": "a@b.c", "tags.1": "x", "meta.k": [1] } },
        )
        .unwrap();
        assert_eq!(
            update,
            doc! { "$set": { "score": 3.0, "user.mail": "a@b.c", "tags.1": "x", "meta.k": [1] } }
        );

        let err = clean_update(&post, doc! { "$set": { "score": 11 } }).unwrap_err();
        assert!(matches!(err, ModelError::Validation { path, .. } if path == "score"));

        let err = clean_update(&post, doc! { "$set": { "tags.0": 1 } }).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { path, .. } if path == "tags.0"));
    }

    #[test]
    fn written_records_must_be_complete() {
        let (_, post) = schemas();

        let err = clean_update(&post, doc! { "$set": { "user": { "mail": "a@b.c" } } }).unwrap_err();
        assert!(matches!(err, ModelError::RequiredField(paths) if paths == ["user.name"]));

        let err = clean_update(
            &post,
            doc! { "$push": { "readers": { "$each": [{ "name": "Lucy" }, { "mail": "x" }] } } },
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::RequiredField(paths) if paths == ["readers.1.name"]));
    }

    #[test]
    fn coerces_pushed_elements() {
        let (_, post) = schemas();

        let update = clean_update(
            &post,
            doc! {
                "$push": { "tags": { "$each": ["a", "b"], "$slice": -5 } },
                "$addToSet": { "readers": { "name": "Lucy" } },
            },
        )
        .unwrap();
        assert_eq!(
            update,
            doc! {
                "$push": { "tags": { "$each": ["a", "b"], "$slice": -5 } },
                "$addToSet": { "readers": { "name": "Lucy" } },
            }
        );

        let err = clean_update(&post, doc! { "$push": { "tags": { "$each": ["a", 2] } } }).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { path, .. } if path == "tags.1"));

        let err = clean_update(&post, doc! { "$push": { "t": "x" } }).unwrap_err();
        assert!(matches!(err, ModelError::InvalidUpdate(reason) if reason.contains("needs an array")));
    }

    #[test]
    fn operators_must_match_the_field_kind() {
        let (_, post) = schemas();

        assert!(clean_update(&post, doc! { "$inc": { "views": 1, "score": 0.5 } }).is_ok());
        assert!(clean_update(&post, doc! { "$currentDate": { "at": true } }).is_ok());
        assert!(clean_update(&post, doc! { "$pop": { "tags": 1 }, "$pull": { "readers": { "name": "x" } } }).is_ok());

        for update in [
            doc! { "$inc": { "t": 1 } },
            doc! { "$mul": { "user": 2 } },
            doc! { "$currentDate": { "views": true } },
            doc! { "$pullAll": { "meta": ["a"] } },
        ] {
            assert!(matches!(
                clean_update(&post, update),
                Err(ModelError::InvalidUpdate(reason)) if reason.contains("needs")
            ));
        }
    }

    #[test]
    fn refuses_removing_required_fields() {
        let (_, post) = schemas();

        let err = clean_update(&post, doc! { "$unset": { "t": "", "views": "" } }).unwrap_err();
        assert!(matches!(err, ModelError::RequiredField(paths) if paths == ["t"]));

        let err = clean_update(&post, doc! { "$rename": { "user.name": "user.nick" } }).unwrap_err();
        assert!(matches!(err, ModelError::RequiredField(paths) if paths == ["user.name"]));

        assert!(clean_update(&post, doc! { "$unset": { "user.mail": "" } }).is_ok());
    }

    #[test]
    fn rejects_malformed_updates() {
        let (_, post) = schemas();

        assert!(matches!(clean_update(&post, doc! {}), Err(ModelError::InvalidUpdate(_))));
        assert!(matches!(
            clean_update(&post, doc! { "t": "replacement" }),
            Err(ModelError::InvalidUpdate(_))
        ));
        assert!(matches!(
            clean_update(&post, doc! { "$set": 1 }),
            Err(ModelError::InvalidUpdate(_))
        ));
    }
}
