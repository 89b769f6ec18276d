//! Field values.
//!
//! A [`Value`] is what the coercion engine accepts as raw input and what a
//! [`Record`] stores as canonical data. Scalars, opaque containers and `Any`
//! values are plain BSON; record-typed fields hold a nested [`Record`] and
//! array-typed fields hold a vector of values.

use bson::{Binary, Bson, DateTime, Document, oid::ObjectId, spec::BinarySubtype};

use crate::record::Record;

/// A raw or canonical field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A plain BSON value.
    Bson(Bson),
    /// A nested record.
    Record(Record),
    /// An array whose elements are themselves values.
    Array(Vec<Value>),
}

impl Value {
    /// Renders this value in its stored (wire) form.
    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Bson(bson) => bson.clone(),
            Value::Record(record) => Bson::Document(record.to_document()),
            Value::Array(items) => Bson::Array(items.iter().map(Value::to_bson).collect()),
        }
    }

    /// Consumes this value and renders it in its stored (wire) form.
    pub fn into_bson(self) -> Bson {
        match self {
            Value::Bson(bson) => bson,
            Value::Record(record) => Bson::Document(record.to_document()),
            Value::Array(items) => Bson::Array(items.into_iter().map(Value::into_bson).collect()),
        }
    }

    pub fn as_bson(&self) -> Option<&Bson> {
        match self {
            Value::Bson(bson) => Some(bson),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bson(Bson::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Integer value, whether stored as 32 or 64 bits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Bson(Bson::Int32(value)) => Some(*value as i64),
            Value::Bson(Bson::Int64(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bson(Bson::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bson(Bson::Boolean(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Bson(Bson::ObjectId(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime> {
        match self {
            Value::Bson(Bson::DateTime(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bson(Bson::Binary(binary)) => Some(&binary.bytes),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Value::Bson(Bson::Document(document)) => Some(document),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    /// Mutable access to a nested record.
    ///
    /// Assignments made through the returned record are tracked by the record
    /// itself and show up as dotted paths in the parent's update.
    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Mutable access to an array's elements.
    ///
    /// Changes made this way are not tracked: the owning field still compares as
    /// unchanged until it is reassigned or the record is saved with a full update.
    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Bson(Bson::Null))
    }

    /// Kind name used in type mismatch messages.
    pub fn kind_name(&self) -> String {
        match self {
            Value::Bson(bson) => bson_kind(bson).to_string(),
            Value::Record(record) => format!("record {}", record.schema().name()),
            Value::Array(_) => "array".to_string(),
        }
    }
}

/// Kind name of a raw BSON value used in type mismatch messages.
pub fn bson_kind(bson: &Bson) -> &'static str {
    match bson {
        Bson::Double(_) => "float",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "mapping",
        Bson::Boolean(_) => "boolean",
        Bson::Null => "null",
        Bson::Int32(_) | Bson::Int64(_) => "integer",
        Bson::Binary(_) => "bytes",
        Bson::ObjectId(_) => "object id",
        Bson::DateTime(_) => "datetime",
        Bson::RegularExpression(_) => "regex",
        Bson::Timestamp(_) => "timestamp",
        Bson::Decimal128(_) => "decimal",
        _ => "other",
    }
}

impl From<Bson> for Value {
    fn from(value: Bson) -> Self {
        Value::Bson(value)
    }
}

impl From<Record> for Value {
    fn from(value: Record) -> Self {
        Value::Record(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bson(Bson::String(value.to_string()))
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Bson(Bson::Document(value))
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        Value::Bson(Bson::DateTime(DateTime::from_chrono(value)))
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bson(Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: value.to_vec(),
        }))
    }
}

macro_rules! value_from_bson {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Bson(Bson::from(value))
                }
            }
        )*
    };
}

value_from_bson!(String, i32, i64, f64, bool, ObjectId, DateTime, Binary);

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn integers_read_back_from_either_width() {
        assert_eq!(Value::from(7i32).as_i64(), Some(7));
        assert_eq!(Value::from(7i64).as_i64(), Some(7));
        assert_eq!(Value::from(7.0).as_i64(), None);
    }

    #[test]
    fn arrays_render_to_bson_arrays() {
        let value = Value::from(vec![Value::from("a"), Value::from(doc! { "b": 1 })]);

        assert_eq!(value.to_bson(), Bson::Array(vec![Bson::from("a"), Bson::from(doc! { "b": 1 })]));
        assert_eq!(value.kind_name(), "array");
    }
}
