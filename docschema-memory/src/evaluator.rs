//! Filter evaluation for in-memory document matching.
//!
//! Filters are BSON documents in the usual query shape: `{ field: value }` for
//! equality, `{ field: { $op: value } }` for comparisons, and `$and` / `$or` /
//! `$nor` over lists of filters. Field names may be dotted paths into nested
//! documents and arrays. Anything else is rejected with
//! [`StoreError::UnsupportedFilter`].

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, DateTime, Document, oid::ObjectId};

use docschema_core::error::{StoreError, StoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so that `1`, `1i64` and `1.0` compare
/// equal, as they do in the store's query language.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// String value
    String(&'a str),
    /// Object id value
    ObjectId(ObjectId),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Any other value, compared structurally
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(document) => Comparable::Map(
                document
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Whether two BSON values are equal under query semantics.
pub(crate) fn values_equal(left: &Bson, right: &Bson) -> bool {
    Comparable::from(left) == Comparable::from(right)
}

/// Orders two BSON values under query semantics, when they are comparable.
pub(crate) fn compare(left: &Bson, right: &Bson) -> Option<Ordering> {
    Comparable::from(left).partial_cmp(&Comparable::from(right))
}

/// Resolves a dotted path inside a document. Numeric segments index arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

pub(crate) struct FilterEvaluator<'a> {
    document: &'a Document,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Whether the document satisfies every clause of `filter`.
    pub fn matches(&self, filter: &Document) -> StoreResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => {
                    let mut all = true;
                    for clause in clauses(key, condition)? {
                        if !self.matches(clause)? {
                            all = false;
                            break;
                        }
                    }
                    all
                }
                "$or" => {
                    let mut any = false;
                    for clause in clauses(key, condition)? {
                        if self.matches(clause)? {
                            any = true;
                            break;
                        }
                    }
                    any
                }
                "$nor" => {
                    let mut none = true;
                    for clause in clauses(key, condition)? {
                        if self.matches(clause)? {
                            none = false;
                            break;
                        }
                    }
                    none
                }
                operator if operator.starts_with('$') => {
                    return Err(StoreError::UnsupportedFilter(format!(
                        "top-level operator {}",
                        operator
                    )));
                }
                path => self.field_matches(path, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> StoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if FilterEvaluator::new(document).matches(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn field_matches(&self, path: &str, condition: &Bson) -> StoreResult<bool> {
        let value = lookup(self.document, path);

        let operators = match condition {
            Bson::Document(operators) if operators.keys().any(|key| key.starts_with('$')) => {
                operators
            }
            _ => return Ok(equals(value, condition)),
        };

        for (operator, operand) in operators {
            let matched = match operator.as_str() {
                "$eq" => equals(value, operand),
                "$ne" => !equals(value, operand),
                "$gt" => compares(value, operand, |ordering| ordering == Ordering::Greater),
                "$gte" => compares(value, operand, |ordering| ordering != Ordering::Less),
                "$lt" => compares(value, operand, |ordering| ordering == Ordering::Less),
                "$lte" => compares(value, operand, |ordering| ordering != Ordering::Greater),
                "$in" => candidates(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$nin" => !candidates(operator, operand)?
                    .iter()
                    .any(|candidate| equals(value, candidate)),
                "$exists" => match operand {
                    Bson::Boolean(should_exist) => value.is_some() == *should_exist,
                    _ => {
                        return Err(StoreError::UnsupportedFilter(
                            "$exists expects a boolean".to_string(),
                        ));
                    }
                },
                other => {
                    return Err(StoreError::UnsupportedFilter(format!(
                        "field operator {}",
                        other
                    )));
                }
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn clauses<'b>(operator: &str, condition: &'b Bson) -> StoreResult<Vec<&'b Document>> {
    let Bson::Array(items) = condition else {
        return Err(StoreError::UnsupportedFilter(format!(
            "{} expects a list of filters",
            operator
        )));
    };

    items
        .iter()
        .map(|item| match item {
            Bson::Document(clause) => Ok(clause),
            _ => Err(StoreError::UnsupportedFilter(format!(
                "{} expects a list of filters",
                operator
            ))),
        })
        .collect()
}

fn candidates<'b>(operator: &str, operand: &'b Bson) -> StoreResult<&'b [Bson]> {
    match operand {
        Bson::Array(items) => Ok(items),
        _ => Err(StoreError::UnsupportedFilter(format!(
            "{} expects a list",
            operator
        ))),
    }
}

/// Equality with array membership: an array field matches a scalar it contains.
/// A missing field matches null.
fn equals(value: Option<&Bson>, expected: &Bson) -> bool {
    let Some(value) = value else {
        return matches!(expected, Bson::Null);
    };

    if values_equal(value, expected) {
        return true;
    }

    match value {
        Bson::Array(items) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn compares(value: Option<&Bson>, operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let Some(value) = value else {
        return false;
    };
    let operand = Comparable::from(operand);

    let holds = |item: &Bson| {
        Comparable::from(item)
            .partial_cmp(&operand)
            .is_some_and(&accept)
    };

    match value {
        Bson::Array(items) => items.iter().any(holds),
        other => holds(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn sample() -> Document {
        doc! {
            "_id": 1,
            "title": "hello",
            "score": 4.5,
            "tags": ["a", "b"],
            "user": { "name": "Lucy", "age": 30 },
        }
    }

    fn check(filter: Document) -> bool {
        FilterEvaluator::new(&sample()).matches(&filter).unwrap()
    }

    #[test]
    fn matches_equality_and_dotted_paths() {
        assert!(check(doc! { "title": "hello" }));
        assert!(check(doc! { "user.name": "Lucy" }));
        assert!(check(doc! { "_id": 1i64 }));
        assert!(!check(doc! { "user.name": "Bob" }));
        assert!(check(doc! { "missing": null }));
    }

    #[test]
    fn matches_array_membership() {
        assert!(check(doc! { "tags": "a" }));
        assert!(check(doc! { "tags.1": "b" }));
        assert!(check(doc! { "tags": { "$in": ["z", "b"] } }));
        assert!(check(doc! { "tags": { "$nin": ["z"] } }));
    }

    #[test]
    fn matches_comparisons() {
        assert!(check(doc! { "score": { "$gt": 4, "$lte": 4.5 } }));
        assert!(!check(doc! { "user.age": { "$lt": 30 } }));
        assert!(check(doc! { "user.age": { "$ne": 31 } }));
        assert!(check(doc! { "missing": { "$exists": false } }));
    }

    #[test]
    fn matches_logical_operators() {
        assert!(check(doc! { "$or": [{ "title": "nope" }, { "score": 4.5 }] }));
        assert!(!check(doc! { "$and": [{ "title": "hello" }, { "score": 1 }] }));
        assert!(check(doc! { "$nor": [{ "title": "nope" }] }));
    }

    #[test]
    fn rejects_unknown_operators() {
        let document = sample();
        let evaluator = FilterEvaluator::new(&document);

        assert!(matches!(
            evaluator.matches(&doc! { "title": { "$regex": "^h" } }),
            Err(StoreError::UnsupportedFilter(_))
        ));
        assert!(matches!(
            evaluator.matches(&doc! { "$where": "true" }),
            Err(StoreError::UnsupportedFilter(_))
        ));
    }
}
