//! Field specifications.
//!
//! A [`FieldSpec`] binds a [`TypeDescriptor`] to the per-field policies the coercion
//! engine applies: default, alias, required flag, converter, built-in constraints and
//! validator. Field specs are assembled once into a
//! [`RecordSchema`](crate::schema::RecordSchema) and never change afterwards.

use std::{fmt, sync::Arc};

use crate::{
    types::{DescribeType, TypeDescriptor},
    value::Value,
};

/// A function producing a fresh default value.
pub type DefaultFn = Arc<dyn Fn() -> Value + Send + Sync>;

/// A function applied to a present value before type checking.
pub type ConverterFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;

/// A predicate applied to the canonical value after type checking.
pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// What happens when a field is absent from the input.
#[derive(Clone, Default)]
pub enum DefaultPolicy {
    /// The field stays absent.
    #[default]
    None,
    /// A copy of the value is used.
    Static(Value),
    /// The function is called on every coercion that needs a default.
    Computed(DefaultFn),
}

impl DefaultPolicy {
    /// Produces the default value, if any.
    pub fn produce(&self) -> Option<Value> {
        match self {
            DefaultPolicy::None => None,
            DefaultPolicy::Static(value) => Some(value.clone()),
            DefaultPolicy::Computed(func) => Some(func()),
        }
    }
}

impl fmt::Debug for DefaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultPolicy::None => write!(f, "None"),
            DefaultPolicy::Static(value) => f.debug_tuple("Static").field(value).finish(),
            DefaultPolicy::Computed(_) => write!(f, "Computed(<fn>)"),
        }
    }
}

/// Built-in constraints checked after type coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Strings longer than this many characters are rejected.
    MaxLength(usize),
    /// Strings shorter than this many characters are rejected.
    MinLength(usize),
    /// Numbers greater than this are rejected.
    MaxValue(f64),
    /// Numbers less than this are rejected.
    MinValue(f64),
}

impl Constraint {
    /// Checks `value`, returning the rejection reason.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match self {
            Constraint::MaxLength(max) => match value.as_str() {
                Some(s) if s.chars().count() > *max => Err(format!(
                    "length of {:?} is greater than the max value {}",
                    s, max
                )),
                _ => Ok(()),
            },
            Constraint::MinLength(min) => match value.as_str() {
                Some(s) if s.chars().count() < *min => Err(format!(
                    "length of {:?} is less than the min value {}",
                    s, min
                )),
                _ => Ok(()),
            },
            Constraint::MaxValue(max) => match number(value) {
                Some(n) if n > *max => Err(format!("{} is greater than the max value {}", n, max)),
                _ => Ok(()),
            },
            Constraint::MinValue(min) => match number(value) {
                Some(n) if n < *min => Err(format!("{} is less than the min value {}", n, min)),
                _ => Ok(()),
            },
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_i64().map(|n| n as f64))
}

/// Declaration of a single field.
///
/// # Example
///
/// ```ignore
/// use docschema_core::{field::FieldSpec, types::TypeDescriptor};
///
/// let title = FieldSpec::new(TypeDescriptor::string())
///     .alias("t")
///     .required()
///     .max_length(120);
/// ```
#[derive(Clone)]
pub struct FieldSpec {
    pub(crate) ty: TypeDescriptor,
    pub(crate) alias: Option<String>,
    pub(crate) default: DefaultPolicy,
    pub(crate) required: bool,
    pub(crate) converter: Option<ConverterFn>,
    pub(crate) validator: Option<ValidatorFn>,
    pub(crate) constraints: Vec<Constraint>,
}

impl FieldSpec {
    pub fn new(ty: TypeDescriptor) -> Self {
        Self {
            ty,
            alias: None,
            default: DefaultPolicy::None,
            required: false,
            converter: None,
            validator: None,
            constraints: Vec::new(),
        }
    }

    /// A field whose type is described by the Rust type `T`.
    pub fn of<T: DescribeType>() -> Self {
        Self::new(T::describe())
    }

    /// Stores the field under `alias` instead of its declared name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Uses a copy of `value` when the field is absent.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = DefaultPolicy::Static(value.into());
        self
    }

    /// Calls `func` for a fresh value whenever the field is absent.
    pub fn default_with<F>(mut self, func: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.default = DefaultPolicy::Computed(Arc::new(func));
        self
    }

    pub fn converter<F>(mut self, func: F) -> Self
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.converter = Some(Arc::new(func));
        self
    }

    pub fn validator<F>(mut self, func: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(func));
        self
    }

    pub fn max_length(mut self, max: usize) -> Self {
        self.constraints.push(Constraint::MaxLength(max));
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.constraints.push(Constraint::MinLength(min));
        self
    }

    pub fn max_value(mut self, max: f64) -> Self {
        self.constraints.push(Constraint::MaxValue(max));
        self
    }

    pub fn min_value(mut self, min: f64) -> Self {
        self.constraints.push(Constraint::MinValue(min));
        self
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.ty
    }

    pub fn default_policy(&self) -> &DefaultPolicy {
        &self.default
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }
}

impl From<TypeDescriptor> for FieldSpec {
    fn from(ty: TypeDescriptor) -> Self {
        FieldSpec::new(ty)
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldSpec")
            .field("ty", &self.ty.to_string())
            .field("alias", &self.alias)
            .field("default", &self.default)
            .field("required", &self.required)
            .field("converter", &self.converter.is_some())
            .field("validator", &self.validator.is_some())
            .field("constraints", &self.constraints)
            .finish()
    }
}

/// A field as resolved inside a schema.
#[derive(Debug, Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) wire_name: String,
    pub(crate) spec: FieldSpec,
}

impl Field {
    /// The name used in code.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The key the field is stored under.
    pub fn wire_name(&self) -> &str {
        &self.wire_name
    }

    pub fn spec(&self) -> &FieldSpec {
        &self.spec
    }

    pub fn ty(&self) -> &TypeDescriptor {
        &self.spec.ty
    }
}
