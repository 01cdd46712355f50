//! Authoritative document storage and mutation semantics.
//!
//! Each function mutates one collection's documents and returns the event
//! the change produces, if any. Callers hold the collection lock across the
//! mutation and the broadcast of that event, so subscribers observe changes
//! in commit order.

use crate::error::{HubError, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tether_engine::document::WIRE_ID_KEY;
use tether_engine::{DocumentId, Fields, RemoteEvent};

/// Documents of one collection, ordered by id.
pub type Documents = BTreeMap<DocumentId, Fields>;

const SET: &str = "$set";
const UNSET: &str = "$unset";

/// Insert every document or none.
///
/// Returns the inserted ids and one `added` event per document.
pub fn insert(
    docs: &mut Documents,
    collection: &str,
    documents: Vec<Value>,
) -> Result<(Value, Vec<RemoteEvent>)> {
    let mut batch: Vec<(DocumentId, Fields)> = Vec::with_capacity(documents.len());
    for document in documents {
        let Value::Object(mut fields) = document else {
            return Err(HubError::InvalidDocument("document must be an object".into()));
        };
        let id = match fields.remove(WIRE_ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                return Err(HubError::InvalidDocument(
                    "'_id' must be a non-empty string".into(),
                ))
            }
        };
        if docs.contains_key(&id) || batch.iter().any(|(other, _)| *other == id) {
            return Err(HubError::DuplicateKey(id));
        }
        batch.push((id, fields));
    }

    let ids: Vec<Value> = batch.iter().map(|(id, _)| json!(id)).collect();
    let events = batch
        .into_iter()
        .map(|(id, fields)| {
            let event = RemoteEvent::added(collection, id.clone(), fields.clone());
            docs.insert(id, fields);
            event
        })
        .collect();
    Ok((Value::Array(ids), events))
}

/// Apply a modifier (`$set` / `$unset`) or a replacement document.
///
/// Returns the number of matched documents and a `changed` event carrying
/// the fields whose values changed and the names that were removed. A
/// missing document matches nothing and is not an error.
pub fn update(
    docs: &mut Documents,
    collection: &str,
    args: Vec<Value>,
) -> Result<(u64, Option<RemoteEvent>)> {
    let [selector, modifier]: [Value; 2] = args.try_into().map_err(|args: Vec<Value>| {
        HubError::InvalidModifier(format!(
            "expected selector and modifier, got {} arguments",
            args.len()
        ))
    })?;
    let id = selector_id(&selector)?;
    let Value::Object(modifier) = modifier else {
        return Err(HubError::InvalidModifier("modifier must be an object".into()));
    };

    let Some(current) = docs.get_mut(&id) else {
        return Ok((0, None));
    };

    let next = if modifier.keys().any(|key| key.starts_with('$')) {
        apply_operators(current, modifier)?
    } else {
        replacement(&id, modifier)?
    };

    let changed: Fields = next
        .iter()
        .filter(|(name, value)| current.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    let mut cleared: Vec<String> = current
        .keys()
        .filter(|name| !next.contains_key(*name))
        .cloned()
        .collect();
    cleared.sort();

    *current = next;
    if changed.is_empty() && cleared.is_empty() {
        return Ok((1, None));
    }
    Ok((1, Some(RemoteEvent::changed(collection, id, changed, cleared))))
}

/// Remove the selected document.
pub fn remove(
    docs: &mut Documents,
    collection: &str,
    selector: Value,
) -> Result<(u64, Option<RemoteEvent>)> {
    let id = selector_id(&selector)?;
    Ok(match docs.remove(&id) {
        Some(_) => (1, Some(RemoteEvent::removed(collection, id))),
        None => (0, None),
    })
}

/// Extract the target id from `{"_id": id}` or a bare id string.
fn selector_id(selector: &Value) -> Result<DocumentId> {
    let id = match selector {
        Value::String(id) => Some(id.as_str()),
        Value::Object(map) => map.get(WIRE_ID_KEY).and_then(Value::as_str),
        _ => None,
    };
    match id {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(HubError::InvalidSelector(selector.to_string())),
    }
}

fn apply_operators(current: &Fields, modifier: Fields) -> Result<Fields> {
    let mut next = current.clone();
    for (op, arg) in modifier {
        if op != SET && op != UNSET {
            return Err(HubError::InvalidModifier(format!(
                "unsupported operator {op}"
            )));
        }
        let Value::Object(arg) = arg else {
            return Err(HubError::InvalidModifier(format!("{op} expects an object")));
        };
        for (name, value) in arg {
            check_field_name(&name)?;
            if op == SET {
                next.insert(name, value);
            } else {
                next.remove(&name);
            }
        }
    }
    Ok(next)
}

fn replacement(id: &str, mut fields: Fields) -> Result<Fields> {
    match fields.remove(WIRE_ID_KEY) {
        None => {}
        Some(Value::String(other)) if other == id => {}
        Some(_) => {
            return Err(HubError::InvalidModifier(
                "replacement may not change '_id'".into(),
            ))
        }
    }
    for name in fields.keys() {
        check_field_name(name)?;
    }
    Ok(fields)
}

fn check_field_name(name: &str) -> Result<()> {
    if name.is_empty() || name == WIRE_ID_KEY || name.starts_with('$') {
        return Err(HubError::InvalidModifier(format!(
            "field name '{name}' is not allowed"
        )));
    }
    Ok(())
}
