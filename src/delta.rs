//! Delta application.
//!
//! Deltas are JSON Pointer-style operators describing an incremental
//! change to a feed's data. This module applies them, operating purely on
//! `serde_json::Value` with no session/feed state of its own.

use serde_json::Value;

use crate::wire::Delta;

/// Applies a single delta to `data` in place.
///
/// Every error here is surfaced by the caller as `INVALID_DELTA`.
pub fn apply_delta(data: &mut Value, delta: &Delta) -> Result<(), String> {
    match delta {
        Delta::Set { path, value } => {
            let slot = navigate_create(data, path)?;
            *slot = value.clone();
            Ok(())
        }
        Delta::Delete { path } => {
            let (parent, key) = split_path(data, path)?;
            remove_at(parent, &key)
        }
        Delta::DeleteValue { path, value } => {
            let arr = navigate_mut(data, path)?
                .as_array_mut()
                .ok_or_else(|| format!("path {:?} is not an array", path))?;
            let before = arr.len();
            arr.retain(|v| v != value);
            if arr.len() == before {
                return Err(format!("value not present in array at {:?}", path));
            }
            Ok(())
        }
        Delta::Prepend { path, value } => {
            let arr = navigate_mut(data, path)?
                .as_array_mut()
                .ok_or_else(|| format!("path {:?} is not an array", path))?;
            arr.insert(0, value.clone());
            Ok(())
        }
        Delta::Append { path, value } => {
            let arr = navigate_mut(data, path)?
                .as_array_mut()
                .ok_or_else(|| format!("path {:?} is not an array", path))?;
            arr.push(value.clone());
            Ok(())
        }
        Delta::Insert { path, index, value } => {
            let arr = navigate_mut(data, path)?
                .as_array_mut()
                .ok_or_else(|| format!("path {:?} is not an array", path))?;
            let idx = resolve_index(*index, arr.len())?;
            if idx > arr.len() {
                return Err(format!("insert index {} out of bounds at {:?}", index, path));
            }
            arr.insert(idx, value.clone());
            Ok(())
        }
        Delta::ToggleBoolean { path } => {
            let slot = navigate_mut(data, path)?;
            let current = slot
                .as_bool()
                .ok_or_else(|| format!("path {:?} is not a boolean", path))?;
            *slot = Value::Bool(!current);
            Ok(())
        }
    }
}

/// Applies a sequence of deltas in order, stopping at the first failure.
/// Callers are responsible for cloning `data` before calling this, since a
/// partially applied sequence must not be observable.
pub fn apply_deltas(data: &mut Value, deltas: &[Delta]) -> Result<(), String> {
    for delta in deltas {
        apply_delta(data, delta)?;
    }
    Ok(())
}

fn resolve_index(index: i64, len: usize) -> Result<usize, String> {
    if index >= 0 {
        Ok(index as usize)
    } else {
        let from_end = (-index) as usize;
        len.checked_sub(from_end)
            .ok_or_else(|| format!("negative index {} out of bounds for length {}", index, len))
    }
}

/// Navigates to `path`, returning a mutable reference to the existing value.
/// Every segment must already exist; missing segments are an error (only
/// `Set` is allowed to create structure, per `navigate_create`).
fn navigate_mut<'a>(data: &'a mut Value, path: &[String]) -> Result<&'a mut Value, String> {
    let mut current = data;
    for segment in path {
        current = step_into(current, segment)?;
    }
    Ok(current)
}

fn step_into<'a>(current: &'a mut Value, segment: &str) -> Result<&'a mut Value, String> {
    match current {
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| format!("missing key {:?}", segment)),
        Value::Array(arr) => {
            let idx: usize = segment
                .parse()
                .map_err(|_| format!("non-numeric array index {:?}", segment))?;
            arr.get_mut(idx)
                .ok_or_else(|| format!("array index {} out of bounds", idx))
        }
        _ => Err(format!("cannot descend into scalar at {:?}", segment)),
    }
}

/// Like `navigate_mut`, but the final path segment may be absent: it is
/// created (as `Value::Null`, about to be overwritten) in its parent
/// object/array. Only `Set` uses this: it is the sole structure-creating
/// operation.
fn navigate_create<'a>(data: &'a mut Value, path: &[String]) -> Result<&'a mut Value, String> {
    if path.is_empty() {
        return Ok(data);
    }
    let (last, rest) = path.split_last().expect("checked non-empty above");
    let mut current = data;
    for segment in rest {
        current = step_into(current, segment)?;
    }
    match current {
        Value::Object(map) => Ok(map.entry(last.clone()).or_insert(Value::Null)),
        Value::Array(arr) => {
            let idx: usize = last
                .parse()
                .map_err(|_| format!("non-numeric array index {:?}", last))?;
            if idx == arr.len() {
                arr.push(Value::Null);
            }
            arr.get_mut(idx)
                .ok_or_else(|| format!("array index {} out of bounds", idx))
        }
        _ => Err(format!("cannot descend into scalar at {:?}", last)),
    }
}

fn split_path(data: &mut Value, path: &[String]) -> Result<(&mut Value, String), String> {
    if path.is_empty() {
        return Err("cannot delete the document root".to_string());
    }
    let (last, rest) = path.split_last().expect("checked non-empty above");
    let parent = navigate_mut(data, rest)?;
    Ok((parent, last.clone()))
}

fn remove_at(parent: &mut Value, key: &str) -> Result<(), String> {
    match parent {
        Value::Object(map) => map
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| format!("missing key {:?}", key)),
        Value::Array(arr) => {
            let idx: usize = key
                .parse()
                .map_err(|_| format!("non-numeric array index {:?}", key))?;
            if idx >= arr.len() {
                return Err(format!("array index {} out of bounds", idx));
            }
            arr.remove(idx);
            Ok(())
        }
        _ => Err("cannot delete from scalar".to_string()),
    }
}
