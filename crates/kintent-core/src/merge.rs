//! Subset diffing and strategic-merge patches over JSON bodies.
//!
//! Desired manifests only name the fields kintent owns. Comparison is therefore
//! one-sided: a field the desired body does not mention is never compared and
//! never touched. Lists of objects are matched by a merge key (`name` for
//! containers, `containerPort` for ports) the same way the API server's
//! strategic merge does, so patches produced here can be sent as-is with
//! `--type strategic`.

use crate::change::FieldChange;
use serde_json::{Map, Value};

/// Keys that identify list entries, in priority order.
pub const MERGE_KEYS: &[&str] = &["name", "containerPort"];

/// Strategic-merge directive used to remove a keyed list entry.
pub const PATCH_DIRECTIVE: &str = "$patch";

fn merge_key(item: &Value) -> Option<(&'static str, &Value)> {
    let object = item.as_object()?;
    MERGE_KEYS
        .iter()
        .find_map(|key| object.get(*key).map(|value| (*key, value)))
}

fn is_keyed_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| merge_key(item).is_some())
}

fn find_keyed(items: &[Value], key: &str, key_value: &Value) -> Option<usize> {
    items.iter().position(|item| item.get(key) == Some(key_value))
}

fn key_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Compute the patch that makes `observed` contain every field of `desired`.
///
/// Returns `None` when `observed` already agrees, together with one
/// [`FieldChange`] per leaf that differs.
pub fn subset_patch(desired: &Value, observed: &Value) -> (Option<Value>, Vec<FieldChange>) {
    let mut changes = Vec::new();
    let patch = diff_value(desired, Some(observed), "", &mut changes);
    (patch, changes)
}

/// Whether every field named by `desired` has the same value in `observed`.
pub fn is_subset(desired: &Value, observed: &Value) -> bool {
    diff_value(desired, Some(observed), "", &mut Vec::new()).is_none()
}

fn diff_value(
    desired: &Value,
    observed: Option<&Value>,
    path: &str,
    changes: &mut Vec<FieldChange>,
) -> Option<Value> {
    match (desired, observed) {
        (Value::Object(wanted), Some(Value::Object(current))) => {
            let mut patch = Map::new();
            for (key, value) in wanted {
                let child = child_path(path, key);
                if let Some(p) = diff_value(value, current.get(key), &child, changes) {
                    patch.insert(key.clone(), p);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (Value::Array(wanted), Some(Value::Array(current))) if is_keyed_list(wanted) => {
            let mut patch = Vec::new();
            for item in wanted {
                let Some((key, key_value)) = merge_key(item) else {
                    continue;
                };
                let child = format!("{}[{}={}]", path, key, key_label(key_value));
                let existing = find_keyed(current, key, key_value).map(|i| &current[i]);
                if let Some(mut p) = diff_value(item, existing, &child, changes) {
                    if let Value::Object(entry) = &mut p {
                        entry.insert(key.to_string(), key_value.clone());
                    }
                    patch.push(p);
                }
            }
            (!patch.is_empty()).then_some(Value::Array(patch))
        }
        (Value::Array(wanted), Some(Value::Array(current))) => {
            let same = wanted.len() == current.len()
                && wanted.iter().zip(current).all(|(w, c)| is_subset(w, c));
            if same {
                None
            } else {
                changes.push(FieldChange::new(path, observed.cloned(), desired.clone()));
                Some(desired.clone())
            }
        }
        (_, Some(current)) if current == desired => None,
        (_, current) => {
            changes.push(FieldChange::new(path, current.cloned(), desired.clone()));
            Some(desired.clone())
        }
    }
}

/// Apply a strategic-merge patch in place.
///
/// `null` removes an object field; `{"$patch": "delete", <key>: ..}` removes a
/// keyed list entry; any other value replaces or merges.
pub fn apply_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(changes)) => {
            for (key, value) in changes {
                if value.is_null() {
                    current.remove(key);
                    continue;
                }
                match current.get_mut(key) {
                    Some(existing) => apply_patch(existing, value),
                    None => {
                        current.insert(key.clone(), strip_directives(value));
                    }
                }
            }
        }
        (Value::Array(current), Value::Array(items)) if is_keyed_list(items) => {
            for item in items {
                let Some((key, key_value)) = merge_key(item) else {
                    continue;
                };
                let delete = item.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some("delete");
                match (find_keyed(current, key, key_value), delete) {
                    (Some(i), true) => {
                        current.remove(i);
                    }
                    (Some(i), false) => apply_patch(&mut current[i], item),
                    (None, true) => {}
                    (None, false) => current.push(strip_directives(item)),
                }
            }
        }
        (target, patch) => *target = strip_directives(patch),
    }
}

/// Build the patch that undoes `patch` when applied to the result of applying
/// it to `prior`.
pub fn inverse_patch(patch: &Value, prior: &Value) -> Value {
    match (patch, prior) {
        (Value::Object(changes), Value::Object(before)) => {
            let mut inverse = Map::new();
            for (key, value) in changes {
                let restored = match (before.get(key), value) {
                    (Some(old), _) => inverse_patch(value, old),
                    // Null only the leaves the patch introduced.
                    (None, Value::Object(_)) => inverse_patch(value, &Value::Object(Map::new())),
                    (None, _) => Value::Null,
                };
                inverse.insert(key.clone(), restored);
            }
            Value::Object(inverse)
        }
        (Value::Array(items), Value::Array(before)) if is_keyed_list(items) => {
            let mut inverse = Vec::new();
            for item in items {
                let Some((key, key_value)) = merge_key(item) else {
                    continue;
                };
                match find_keyed(before, key, key_value) {
                    Some(i) => {
                        let mut restored = inverse_patch(item, &before[i]);
                        if let Value::Object(entry) = &mut restored {
                            entry.insert(key.to_string(), key_value.clone());
                        }
                        inverse.push(restored);
                    }
                    None => {
                        let mut removal = Map::new();
                        removal.insert(key.to_string(), key_value.clone());
                        removal.insert(PATCH_DIRECTIVE.to_string(), Value::from("delete"));
                        inverse.push(Value::Object(removal));
                    }
                }
            }
            Value::Array(inverse)
        }
        (_, prior) => prior.clone(),
    }
}

fn strip_directives(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_directives(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .filter(|item| item.get(PATCH_DIRECTIVE).is_none())
                .map(strip_directives)
                .collect(),
        ),
        other => other.clone(),
    }
}
