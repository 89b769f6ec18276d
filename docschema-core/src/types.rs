//! Type descriptors: the accepted shape of a field.
//!
//! A [`TypeDescriptor`] is immutable, recursive data. `Array` nests arbitrarily and
//! `Record` holds a shared reference to an already-built [`RecordSchema`]. Because a
//! schema can only reference schemas that were built before it, record types are
//! acyclic by construction.

use bson::{Binary, Bson, DateTime, Document, oid::ObjectId};
use std::{fmt, sync::Arc};

use crate::schema::RecordSchema;

/// Maximum nesting of arrays and records accepted in a single descriptor.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Primitive kinds a scalar field may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
    Bytes,
    DateTime,
    ObjectId,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "string",
            ScalarKind::Integer => "integer",
            ScalarKind::Float => "float",
            ScalarKind::Boolean => "boolean",
            ScalarKind::Bytes => "bytes",
            ScalarKind::DateTime => "datetime",
            ScalarKind::ObjectId => "object id",
        }
    }
}

/// Untyped containers whose contents are never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Map,
    List,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::Map => "mapping",
            ContainerKind::List => "list",
        }
    }
}

/// The shape a field accepts.
#[derive(Debug, Clone)]
pub enum TypeDescriptor {
    /// An exact primitive kind.
    Scalar(ScalarKind),
    /// An untyped mapping or sequence, accepted as-is.
    Opaque(ContainerKind),
    /// A nested record of the referenced schema.
    Record(Arc<RecordSchema>),
    /// A homogeneous sequence of the element type.
    Array(Box<TypeDescriptor>),
    /// No constraint.
    Any,
}

impl TypeDescriptor {
    pub fn string() -> Self {
        TypeDescriptor::Scalar(ScalarKind::String)
    }

    pub fn integer() -> Self {
        TypeDescriptor::Scalar(ScalarKind::Integer)
    }

    pub fn float() -> Self {
        TypeDescriptor::Scalar(ScalarKind::Float)
    }

    pub fn boolean() -> Self {
        TypeDescriptor::Scalar(ScalarKind::Boolean)
    }

    pub fn bytes() -> Self {
        TypeDescriptor::Scalar(ScalarKind::Bytes)
    }

    pub fn datetime() -> Self {
        TypeDescriptor::Scalar(ScalarKind::DateTime)
    }

    pub fn object_id() -> Self {
        TypeDescriptor::Scalar(ScalarKind::ObjectId)
    }

    pub fn map() -> Self {
        TypeDescriptor::Opaque(ContainerKind::Map)
    }

    pub fn list() -> Self {
        TypeDescriptor::Opaque(ContainerKind::List)
    }

    pub fn any() -> Self {
        TypeDescriptor::Any
    }

    /// A nested record of `schema`.
    pub fn record(schema: &Arc<RecordSchema>) -> Self {
        TypeDescriptor::Record(Arc::clone(schema))
    }

    /// A homogeneous array of `element`.
    pub fn array(element: TypeDescriptor) -> Self {
        TypeDescriptor::Array(Box::new(element))
    }

    /// Describes a Rust type, e.g. `TypeDescriptor::of::<Vec<Vec<String>>>()`.
    pub fn of<T: DescribeType>() -> Self {
        T::describe()
    }

    /// Number of array and record levels, counting this descriptor.
    ///
    /// Computed without recursion; nested record depths are cached on their schema.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;

        loop {
            depth += 1;
            match current {
                TypeDescriptor::Array(element) => current = element,
                TypeDescriptor::Record(schema) => return depth + schema.depth(),
                _ => return depth,
            }
        }
    }

    /// The innermost non-array descriptor.
    pub fn innermost(&self) -> &TypeDescriptor {
        let mut current = self;
        while let TypeDescriptor::Array(element) = current {
            current = element;
        }
        current
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut arrays = 0;
        let mut current = self;
        while let TypeDescriptor::Array(element) = current {
            arrays += 1;
            current = element;
        }

        for _ in 0..arrays {
            write!(f, "array of ")?;
        }

        match current {
            TypeDescriptor::Scalar(kind) => write!(f, "{}", kind.name()),
            TypeDescriptor::Opaque(kind) => write!(f, "{}", kind.name()),
            TypeDescriptor::Record(schema) => write!(f, "record {}", schema.name()),
            TypeDescriptor::Any => write!(f, "any"),
            TypeDescriptor::Array(_) => unreachable!("arrays are unwrapped above"),
        }
    }
}

/// Maps a Rust type onto the descriptor of the values it stores as.
///
/// Record-typed fields have no Rust type of their own; declare them with
/// [`TypeDescriptor::record`].
pub trait DescribeType {
    fn describe() -> TypeDescriptor;
}

macro_rules! describe_scalar {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl DescribeType for $ty {
                fn describe() -> TypeDescriptor {
                    TypeDescriptor::Scalar(ScalarKind::$kind)
                }
            }
        )*
    };
}

describe_scalar! {
    String => String,
    i32 => Integer,
    i64 => Integer,
    f64 => Float,
    bool => Boolean,
    Binary => Bytes,
    DateTime => DateTime,
    chrono::DateTime<chrono::Utc> => DateTime,
    ObjectId => ObjectId,
}

impl DescribeType for Document {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::map()
    }
}

impl DescribeType for Bson {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::Any
    }
}

impl<T: DescribeType> DescribeType for Vec<T> {
    fn describe() -> TypeDescriptor {
        TypeDescriptor::array(T::describe())
    }
}
