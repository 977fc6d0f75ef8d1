//! JSON document engine shared by the backends that hold whole documents in
//! memory (the in-process store and the CouchDB store).

use serde_json::{Map, Value};

use crate::dao::{
    path::StorePath,
    session_store::{Mutation, Precondition, WriteBatch},
    storage::{ConflictKind, StorageError, StorageResult},
};

/// Look up the value below `root`, treating `null` as absent.
pub(crate) fn get<'a>(root: &'a Value, fields: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in fields {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    (!current.is_null()).then_some(current)
}

/// Evaluate one precondition against a document.
pub(crate) fn check(
    document: &Value,
    path: &StorePath,
    precondition: &Precondition,
) -> StorageResult<()> {
    let current = get(document, path.fields());
    let kind = match (precondition, current) {
        (Precondition::Absent, None) => return Ok(()),
        (Precondition::Absent, Some(_)) => ConflictKind::AlreadyExists,
        (Precondition::Present, Some(_)) => return Ok(()),
        (Precondition::Present, None) | (Precondition::Equals(_), None) => ConflictKind::Missing,
        (Precondition::Equals(expected), Some(actual)) if expected == actual => return Ok(()),
        (Precondition::Equals(_), Some(_)) => ConflictKind::Mismatch,
    };

    Err(StorageError::Conflict {
        path: path.to_string(),
        kind,
    })
}

/// Apply a batch to a (possibly missing) document and return the new document,
/// `None` once the document is empty. The input is left untouched on error.
pub(crate) fn apply(document: Option<&Value>, batch: &WriteBatch) -> StorageResult<Option<Value>> {
    let mut working = document.cloned().unwrap_or(Value::Null);

    for (path, precondition) in batch.checks() {
        check(&working, path, precondition)?;
    }

    for (path, mutation) in batch.mutations() {
        match mutation {
            Mutation::Set(Value::Null) | Mutation::Delete => remove_at(&mut working, path.fields()),
            Mutation::Set(value) => set_at(&mut working, path.fields(), value.clone()),
            Mutation::Increment(by) => increment_at(&mut working, path, *by)?,
        }
    }

    let empty = match &working {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    };
    Ok((!empty).then_some(working))
}

fn set_at(node: &mut Value, fields: &[String], value: Value) {
    let Some((head, rest)) = fields.split_first() else {
        *node = value;
        return;
    };

    if let Value::Array(items) = node {
        if let Ok(index) = head.parse::<usize>() {
            if index < items.len() {
                set_at(&mut items[index], rest, value);
                return;
            }
            if index == items.len() {
                items.push(Value::Null);
                set_at(&mut items[index], rest, value);
                return;
            }
        }
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, fields: &[String]) {
    let Some((head, rest)) = fields.split_first() else {
        *node = Value::Null;
        return;
    };

    match node {
        Value::Object(map) if rest.is_empty() => {
            map.remove(head);
        }
        Value::Object(map) => {
            if let Some(child) = map.get_mut(head) {
                remove_at(child, rest);
            }
        }
        Value::Array(items) => {
            // Array slots are nulled rather than removed so sibling indexes stay stable.
            if let Some(child) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                remove_at(child, rest);
            }
        }
        _ => {}
    }
}

fn increment_at(node: &mut Value, path: &StorePath, by: i64) -> StorageResult<()> {
    let current = match get(node, path.fields()) {
        None => 0,
        Some(value) => value.as_i64().ok_or_else(|| StorageError::Corrupt {
            path: path.to_string(),
            reason: format!("cannot increment non-integer value {value}"),
        })?,
    };

    let next = current.checked_add(by).ok_or_else(|| StorageError::Corrupt {
        path: path.to_string(),
        reason: "counter overflow".into(),
    })?;
    set_at(node, path.fields(), Value::from(next));
    Ok(())
}
