//! Update operators applied to in-memory documents.
//!
//! Supported operators are `$set`, `$unset`, `$inc`, `$mul`, `$min`, `$max`,
//! `$rename`, `$currentDate`, `$push` and `$addToSet` (optionally with `$each`),
//! `$pop`, `$pull` and `$pullAll`. Paths are dotted and numeric segments index
//! arrays; positional segments such as `$` and `$[]` need a query planner and
//! are rejected with [`StoreError::UnsupportedUpdate`].

use std::cmp::Ordering;

use bson::{Bson, DateTime, Document};

use docschema_core::error::{StoreError, StoreResult};

use crate::evaluator::{FilterEvaluator, compare, lookup, values_equal};

const OPERATORS: &[&str] = &[
    "$set",
    "$unset",
    "$inc",
    "$mul",
    "$min",
    "$max",
    "$rename",
    "$currentDate",
    "$push",
    "$addToSet",
    "$pop",
    "$pull",
    "$pullAll",
];

/// Applies every operator of `update` to `document`, in order.
///
/// On error `document` may be partially updated; callers work on a copy.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> StoreResult<()> {
    if update.is_empty() {
        return Err(StoreError::InvalidDocument("the update document is empty".to_string()));
    }

    for (operator, operand) in update {
        if !OPERATORS.contains(&operator.as_str()) {
            return Err(StoreError::UnsupportedUpdate(format!("update operator {}", operator)));
        }
        let Bson::Document(fields) = operand else {
            return Err(StoreError::InvalidDocument(format!(
                "{} expects a document of paths",
                operator
            )));
        };

        for (path, value) in fields {
            check_path(path)?;

            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => unset_path(document, path),
                "$inc" => {
                    let result = arithmetic(lookup(document, path), value, path, false)?;
                    set_path(document, path, result)?;
                }
                "$mul" => {
                    let result = arithmetic(lookup(document, path), value, path, true)?;
                    set_path(document, path, result)?;
                }
                "$min" => bound(document, path, value, Ordering::Less)?,
                "$max" => bound(document, path, value, Ordering::Greater)?,
                "$rename" => rename(document, path, value)?,
                "$currentDate" => current_date(document, path, value)?,
                "$push" => push(document, path, value, false)?,
                "$addToSet" => push(document, path, value, true)?,
                "$pop" => pop(document, path, value)?,
                "$pull" => pull(document, path, |item| pull_matches(item, value))?,
                "$pullAll" => {
                    let Bson::Array(values) = value else {
                        return Err(invalid(path, "$pullAll expects an array"));
                    };
                    pull(document, path, |item| {
                        Ok(values.iter().any(|value| values_equal(item, value)))
                    })?;
                }
                other => {
                    return Err(StoreError::UnsupportedUpdate(format!("update operator {}", other)));
                }
            }
        }
    }

    Ok(())
}

/// Writes `value` at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> StoreResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    if !document.contains_key(head) {
        document.insert(head, Document::new());
    }

    match document.get_mut(head) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        Some(Bson::Array(items)) => {
            let (segment, tail) = match rest.split_once('.') {
                Some((segment, tail)) => (segment, Some(tail)),
                None => (rest, None),
            };
            let item = segment
                .parse::<usize>()
                .ok()
                .and_then(|position| items.get_mut(position))
                .ok_or_else(|| {
                    StoreError::InvalidDocument(format!("cannot set {}: no element {}", path, segment))
                })?;

            match (tail, item) {
                (None, item) => {
                    *item = value;
                    Ok(())
                }
                (Some(tail), Bson::Document(inner)) => set_path(inner, tail, value),
                (Some(_), _) => Err(StoreError::InvalidDocument(format!(
                    "cannot set {}: element {} is not a document",
                    path, segment
                ))),
            }
        }
        _ => Err(StoreError::InvalidDocument(format!(
            "cannot set {}: {} is not a document",
            path, head
        ))),
    }
}

pub(crate) fn unset_path(document: &mut Document, path: &str) {
    take_path(document, path);
}

fn take_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => take_path(inner, rest),
            _ => None,
        },
    }
}

fn check_path(path: &str) -> StoreResult<()> {
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(invalid(path, "the path has an empty segment"));
        }
        if segment.starts_with('$') {
            return Err(StoreError::UnsupportedUpdate(format!("positional path {}", path)));
        }
    }

    Ok(())
}

fn arithmetic(current: Option<&Bson>, operand: &Bson, path: &str, multiply: bool) -> StoreResult<Bson> {
    if as_f64(operand).is_none() {
        return Err(invalid(path, "the operand is not a number"));
    }

    let Some(current) = current else {
        return Ok(match (multiply, operand) {
            (false, operand) => operand.clone(),
            (true, Bson::Double(_)) => Bson::Double(0.0),
            (true, Bson::Int64(_)) => Bson::Int64(0),
            (true, _) => Bson::Int32(0),
        });
    };

    if let (Bson::Int32(left), Bson::Int32(right)) = (current, operand) {
        let result = if multiply { left.checked_mul(*right) } else { left.checked_add(*right) };
        if let Some(result) = result {
            return Ok(Bson::Int32(result));
        }
    }

    if let (Some(left), Some(right)) = (as_i64(current), as_i64(operand)) {
        let result = if multiply { left.checked_mul(right) } else { left.checked_add(right) };
        return result
            .map(Bson::Int64)
            .ok_or_else(|| invalid(path, "the result overflows"));
    }

    match (as_f64(current), as_f64(operand)) {
        (Some(left), Some(right)) if multiply => Ok(Bson::Double(left * right)),
        (Some(left), Some(right)) => Ok(Bson::Double(left + right)),
        _ => Err(invalid(path, "the stored value is not a number")),
    }
}

fn bound(document: &mut Document, path: &str, value: &Bson, keep: Ordering) -> StoreResult<()> {
    let replace = match lookup(document, path) {
        Some(current) => compare(value, current) == Some(keep),
        None => true,
    };

    if replace {
        set_path(document, path, value.clone())?;
    }

    Ok(())
}

fn rename(document: &mut Document, path: &str, target: &Bson) -> StoreResult<()> {
    let Bson::String(target) = target else {
        return Err(invalid(path, "$rename expects a field name"));
    };
    check_path(target)?;
    if target == path {
        return Err(invalid(path, "$rename needs a different target"));
    }

    if let Some(value) = take_path(document, path) {
        set_path(document, target, value)?;
    }

    Ok(())
}

fn current_date(document: &mut Document, path: &str, value: &Bson) -> StoreResult<()> {
    let date = match value {
        Bson::Boolean(true) => true,
        Bson::Document(spec) => matches!(spec.get("$type"), Some(Bson::String(kind)) if kind == "date"),
        _ => false,
    };
    if !date {
        return Err(StoreError::UnsupportedUpdate(format!(
            "$currentDate at {} only sets dates",
            path
        )));
    }

    set_path(document, path, Bson::DateTime(DateTime::now()))
}

fn push(document: &mut Document, path: &str, value: &Bson, unique: bool) -> StoreResult<()> {
    let items = match value {
        Bson::Document(modifiers) if modifiers.contains_key("$each") => {
            if let Some(other) = modifiers.keys().find(|key| *key != "$each") {
                return Err(StoreError::UnsupportedUpdate(format!(
                    "{} modifier at {}",
                    other, path
                )));
            }
            match modifiers.get("$each") {
                Some(Bson::Array(items)) => items.clone(),
                _ => return Err(invalid(path, "$each expects an array")),
            }
        }
        item => vec![item.clone()],
    };

    let mut array = stored_array(document, path)?.unwrap_or_default();
    for item in items {
        if unique && array.iter().any(|existing| values_equal(existing, &item)) {
            continue;
        }
        array.push(item);
    }

    set_path(document, path, Bson::Array(array))
}

fn pop(document: &mut Document, path: &str, value: &Bson) -> StoreResult<()> {
    let Some(mut array) = stored_array(document, path)? else {
        return Ok(());
    };

    match as_i64(value) {
        Some(1) => {
            array.pop();
        }
        Some(-1) => {
            if !array.is_empty() {
                array.remove(0);
            }
        }
        _ => return Err(invalid(path, "$pop expects 1 or -1")),
    }

    set_path(document, path, Bson::Array(array))
}

fn pull(
    document: &mut Document,
    path: &str,
    mut doomed: impl FnMut(&Bson) -> StoreResult<bool>,
) -> StoreResult<()> {
    let Some(array) = stored_array(document, path)? else {
        return Ok(());
    };

    let mut kept = Vec::with_capacity(array.len());
    for item in array {
        if !doomed(&item)? {
            kept.push(item);
        }
    }

    set_path(document, path, Bson::Array(kept))
}

/// `$pull` removes elements equal to a plain value, elements satisfying a
/// condition such as `{ $gte: 3 }`, and documents matching a query.
fn pull_matches(item: &Bson, condition: &Bson) -> StoreResult<bool> {
    match condition {
        Bson::Document(query) if query.keys().any(|key| key.starts_with('$')) => {
            let mut wrapped = Document::new();
            wrapped.insert("item", item.clone());
            let mut filter = Document::new();
            filter.insert("item", condition.clone());

            FilterEvaluator::new(&wrapped).matches(&filter)
        }
        Bson::Document(query) => match item {
            Bson::Document(inner) => FilterEvaluator::new(inner).matches(query),
            _ => Ok(false),
        },
        _ => Ok(values_equal(item, condition)),
    }
}

fn stored_array(document: &Document, path: &str) -> StoreResult<Option<Vec<Bson>>> {
    match lookup(document, path) {
        None => Ok(None),
        Some(Bson::Array(items)) => Ok(Some(items.clone())),
        Some(_) => Err(invalid(path, "the stored value is not an array")),
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        other => as_i64(other).map(|n| n as f64),
    }
}

fn invalid(path: &str, reason: &str) -> StoreError {
    StoreError::InvalidDocument(format!("cannot update {}: {}", path, reason))
}
