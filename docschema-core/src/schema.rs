//! Record schemas.
//!
//! A [`RecordSchema`] is the ordered set of fields of one record type plus its
//! schema-level options. It is built once through a [`SchemaBuilder`], validated
//! as a whole, and then shared read-only (as `Arc<RecordSchema>`) by every record
//! of that type and by every parent schema that embeds it.
//!
//! # Example
//!
//! ```ignore
//! use docschema_core::{field::FieldSpec, index::IndexDecl, schema::RecordSchema, types::TypeDescriptor};
//!
//! let user = RecordSchema::builder("User")
//!     .field("name", FieldSpec::of::<String>())
//!     .field("email", FieldSpec::of::<String>().required())
//!     .build()?;
//!
//! let post = RecordSchema::builder("Post")
//!     .collection("posts")
//!     .field("title", FieldSpec::of::<String>().alias("t"))
//!     .field("user", TypeDescriptor::record(&user))
//!     .required(["title"])
//!     .index(IndexDecl::field("title"))
//!     .build()?;
//! ```

use std::{collections::HashMap, sync::Arc};

use crate::{
    coerce::Coercer,
    error::{ModelError, ModelResult},
    field::{ConverterFn, DefaultPolicy, Field, FieldSpec, ValidatorFn},
    index::{IndexDecl, IndexSpec},
    types::MAX_TYPE_DEPTH,
};

/// Wire key of the document identity.
pub const ID_FIELD: &str = "_id";

/// Schema-level options, each of which may be left unset to fall back to a parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Emit a warning for each incoming key that is not a declared field.
    pub warn_extra_data: Option<bool>,
    /// Keep undeclared incoming keys and write them back on export.
    pub retain_extra_data: Option<bool>,
    /// Reconcile declared indexes when a collection is opened.
    pub auto_build_indexes: Option<bool>,
}

impl SchemaOptions {
    /// Fills every unset option from `parent`.
    pub fn resolve(&self, parent: &ResolvedOptions) -> ResolvedOptions {
        ResolvedOptions {
            warn_extra_data: self.warn_extra_data.unwrap_or(parent.warn_extra_data),
            retain_extra_data: self.retain_extra_data.unwrap_or(parent.retain_extra_data),
            auto_build_indexes: self.auto_build_indexes.unwrap_or(parent.auto_build_indexes),
        }
    }
}

/// Fully resolved schema options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedOptions {
    pub warn_extra_data: bool,
    pub retain_extra_data: bool,
    pub auto_build_indexes: bool,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            warn_extra_data: true,
            retain_extra_data: true,
            auto_build_indexes: true,
        }
    }
}

/// The immutable description of one record type.
#[derive(Debug)]
pub struct RecordSchema {
    name: String,
    collection: Option<String>,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    by_wire: HashMap<String, usize>,
    required: Vec<String>,
    indexes: Vec<IndexSpec>,
    options: ResolvedOptions,
    depth: usize,
}

impl RecordSchema {
    /// Starts declaring a record type called `name`.
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// The record type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store collection backing this type; `None` for embeddable types.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks a field up by its declared name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.by_name.get(name).map(|&index| &self.fields[index])
    }

    /// Looks a field up by its wire name.
    pub fn field_by_wire(&self, wire_name: &str) -> Option<&Field> {
        self.by_wire.get(wire_name).map(|&index| &self.fields[index])
    }

    pub(crate) fn field_or_err(&self, name: &str) -> ModelResult<&Field> {
        self.field(name).ok_or_else(|| ModelError::UnknownField {
            schema: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Declared names of required fields, in declaration order.
    pub fn required_fields(&self) -> &[String] {
        &self.required
    }

    /// The field stored under `_id`, if one is declared.
    pub fn id_field(&self) -> Option<&Field> {
        self.field_by_wire(ID_FIELD)
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn options(&self) -> &ResolvedOptions {
        &self.options
    }

    /// Deepest array/record nesting among the fields.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Builder for [`RecordSchema`].
///
/// All checks run in [`SchemaBuilder::build`]; the builder methods only record
/// declarations.
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, FieldSpec)>,
    aliases: Vec<(String, String)>,
    required: Vec<String>,
    converters: Vec<(String, ConverterFn)>,
    validators: Vec<(String, ValidatorFn)>,
    indexes: Vec<IndexDecl>,
    options: SchemaOptions,
    parent: Option<ResolvedOptions>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
            aliases: Vec::new(),
            required: Vec::new(),
            converters: Vec::new(),
            validators: Vec::new(),
            indexes: Vec::new(),
            options: SchemaOptions::default(),
            parent: None,
        }
    }

    /// Backs this type with a store collection, making it a top-level type.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    /// Declares a field. Declaration order is the canonical field order.
    pub fn field(mut self, name: impl Into<String>, spec: impl Into<FieldSpec>) -> Self {
        self.fields.push((name.into(), spec.into()));
        self
    }

    /// Stores the declared field `name` under `alias`.
    pub fn alias(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases.push((name.into(), alias.into()));
        self
    }

    /// Marks declared fields as required at save time.
    pub fn required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn converter<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(crate::value::Value) -> Result<crate::value::Value, String> + Send + Sync + 'static,
    {
        self.converters.push((name.into(), Arc::new(func)));
        self
    }

    pub fn validator<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&crate::value::Value) -> bool + Send + Sync + 'static,
    {
        self.validators.push((name.into(), Arc::new(func)));
        self
    }

    pub fn index(mut self, decl: impl Into<IndexDecl>) -> Self {
        self.indexes.push(decl.into());
        self
    }

    pub fn options(mut self, options: SchemaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn warn_extra_data(mut self, warn: bool) -> Self {
        self.options.warn_extra_data = Some(warn);
        self
    }

    pub fn retain_extra_data(mut self, retain: bool) -> Self {
        self.options.retain_extra_data = Some(retain);
        self
    }

    pub fn auto_build_indexes(mut self, enabled: bool) -> Self {
        self.options.auto_build_indexes = Some(enabled);
        self
    }

    /// Falls back to `parent`'s resolved options for every option left unset here.
    pub fn inherit(mut self, parent: &RecordSchema) -> Self {
        self.parent = Some(parent.options);
        self
    }

    /// Validates the declarations and produces the shared schema.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::SchemaDefinition`] when a declared name repeats, a
    /// schema-level table names an undeclared field, two fields share a wire name,
    /// a wire name is not storable, the type nesting is too deep, a static default
    /// does not satisfy its field, or an embeddable type declares indexes.
    pub fn build(self) -> ModelResult<Arc<RecordSchema>> {
        let SchemaBuilder {
            name,
            collection,
            fields: declared,
            aliases,
            required,
            converters,
            validators,
            indexes,
            options,
            parent,
        } = self;

        let mut specs: Vec<(String, FieldSpec)> = Vec::with_capacity(declared.len());
        let mut by_name = HashMap::new();

        for (field_name, spec) in declared {
            if by_name.insert(field_name.clone(), specs.len()).is_some() {
                return Err(ModelError::schema(format!(
                    "field {:?} is declared twice in {:?}",
                    field_name, name
                )));
            }
            specs.push((field_name, spec));
        }

        let lookup = |field_name: &str| -> ModelResult<usize> {
            by_name.get(field_name).copied().ok_or_else(|| {
                ModelError::schema(format!("{:?} is not defined in {:?}", field_name, name))
            })
        };

        for (field_name, alias) in aliases {
            let index = lookup(&field_name)?;
            specs[index].1.alias = Some(alias);
        }
        for field_name in &required {
            let index = lookup(field_name)?;
            specs[index].1.required = true;
        }
        for (field_name, converter) in converters {
            let index = lookup(&field_name)?;
            specs[index].1.converter = Some(converter);
        }
        for (field_name, validator) in validators {
            let index = lookup(&field_name)?;
            specs[index].1.validator = Some(validator);
        }

        let mut fields = Vec::with_capacity(specs.len());
        let mut by_wire = HashMap::new();
        let mut depth = 0;

        for (field_name, spec) in specs {
            let wire_name = spec
                .alias
                .clone()
                .unwrap_or_else(|| field_name.clone());
            check_wire_name(&name, &wire_name)?;

            if by_wire.insert(wire_name.clone(), fields.len()).is_some() {
                return Err(ModelError::schema(format!(
                    "duplicated alias {:?} found in {:?}",
                    wire_name, name
                )));
            }

            let field_depth = spec.ty.depth();
            if field_depth > MAX_TYPE_DEPTH {
                return Err(ModelError::schema(format!(
                    "type of {:?} in {:?} nests {} levels deep; at most {} are supported",
                    field_name, name, field_depth, MAX_TYPE_DEPTH
                )));
            }
            depth = depth.max(field_depth);

            fields.push(Field {
                name: field_name,
                wire_name,
                spec,
            });
        }

        for field in &fields {
            if let DefaultPolicy::Static(value) = &field.spec.default {
                Coercer::new()
                    .coerce_field(field, value.clone(), &field.name)
                    .map_err(|err| {
                        ModelError::schema(format!(
                            "default of {:?} in {:?} is invalid: {}",
                            field.name, name, err
                        ))
                    })?;
            }
        }

        if collection.is_none() && !indexes.is_empty() {
            return Err(ModelError::schema(format!(
                "embeddable record type {:?} cannot declare indexes",
                name
            )));
        }
        let indexes = crate::index::normalize_indexes(&indexes)?;

        let required = fields
            .iter()
            .filter(|field| field.spec.required)
            .map(|field| field.name.clone())
            .collect();

        Ok(Arc::new(RecordSchema {
            options: options.resolve(&parent.unwrap_or_default()),
            name,
            collection,
            fields,
            by_name,
            by_wire,
            required,
            indexes,
            depth,
        }))
    }
}

fn check_wire_name(schema: &str, wire_name: &str) -> ModelResult<()> {
    if wire_name.is_empty() || wire_name.contains('.') || wire_name.starts_with('$') {
        return Err(ModelError::schema(format!(
            "{:?} in {:?} is not a storable field name",
            wire_name, schema
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{types::TypeDescriptor, value::Value};

    fn user() -> Arc<RecordSchema> {
        RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>())
            .field("email", FieldSpec::of::<String>())
            .build()
            .unwrap()
    }

    #[test]
    fn keeps_declaration_order_and_aliases() {
        let schema = RecordSchema::builder("Post")
            .collection("posts")
            .field("title", FieldSpec::of::<String>().alias("t"))
            .field("body", FieldSpec::of::<String>())
            .alias("body", "b")
            .build()
            .unwrap();

        let names: Vec<_> = schema
            .fields()
            .iter()
            .map(|field| (field.name(), field.wire_name()))
            .collect();
        assert_eq!(names, vec![("title", "t"), ("body", "b")]);
        assert_eq!(schema.field_by_wire("b").map(Field::name), Some("body"));
    }

    #[test]
    fn merges_required_flags_and_lists() {
        let schema = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>().required())
            .field("email", FieldSpec::of::<String>())
            .field("age", FieldSpec::of::<i64>())
            .required(["email"])
            .build()
            .unwrap();

        assert_eq!(schema.required_fields(), ["name", "email"]);
    }

    #[test]
    fn rejects_duplicate_aliases() {
        let result = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>().alias("n"))
            .field("nick", FieldSpec::of::<String>())
            .alias("nick", "n")
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(msg)) if msg.contains("duplicated alias")));
    }

    #[test]
    fn rejects_alias_colliding_with_declared_name() {
        let result = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>())
            .field("nick", FieldSpec::of::<String>().alias("name"))
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(_))));
    }

    #[test]
    fn rejects_tables_naming_undeclared_fields() {
        let result = RecordSchema::builder("User")
            .field("name", FieldSpec::of::<String>())
            .required(["email"])
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(msg)) if msg.contains("not defined")));
    }

    #[test]
    fn rejects_incompatible_static_default() {
        let result = RecordSchema::builder("User")
            .field("age", FieldSpec::of::<i64>().default_value("ten"))
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(msg)) if msg.contains("default")));
    }

    #[test]
    fn accepts_default_fixed_by_converter() {
        let result = RecordSchema::builder("User")
            .field(
                "age",
                FieldSpec::of::<i64>()
                    .default_value("10")
                    .converter(|value| match value.as_str() {
                        Some(s) => s.parse::<i64>().map(Value::from).map_err(|e| e.to_string()),
                        None => Ok(value),
                    }),
            )
            .build();

        assert!(result.is_ok());
    }

    #[test]
    fn rejects_indexes_on_embeddable_types() {
        let result = RecordSchema::builder("Address")
            .field("city", FieldSpec::of::<String>())
            .index("city")
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(msg)) if msg.contains("embeddable")));
    }

    #[test]
    fn rejects_unstorable_wire_names() {
        let result = RecordSchema::builder("User")
            .field("a.b", FieldSpec::of::<String>())
            .build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(_))));
    }

    #[test]
    fn rejects_pathological_nesting() {
        let mut ty = TypeDescriptor::string();
        for _ in 0..MAX_TYPE_DEPTH {
            ty = TypeDescriptor::array(ty);
        }

        let result = RecordSchema::builder("Deep").field("value", ty).build();

        assert!(matches!(result, Err(ModelError::SchemaDefinition(msg)) if msg.contains("levels deep")));
    }

    #[test]
    fn counts_depth_through_embedded_records() {
        let user = user();
        let post = RecordSchema::builder("Post")
            .field("users", TypeDescriptor::array(TypeDescriptor::record(&user)))
            .build()
            .unwrap();

        assert_eq!(user.depth(), 1);
        assert_eq!(post.depth(), 3);
    }

    #[test]
    fn resolves_options_through_parent() {
        let base = RecordSchema::builder("Base")
            .warn_extra_data(false)
            .auto_build_indexes(false)
            .build()
            .unwrap();
        let child = RecordSchema::builder("Child")
            .inherit(&base)
            .auto_build_indexes(true)
            .build()
            .unwrap();

        assert_eq!(
            *child.options(),
            ResolvedOptions {
                warn_extra_data: false,
                retain_extra_data: true,
                auto_build_indexes: true,
            }
        );
    }
}
