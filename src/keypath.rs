//! Dotted keypaths (`"a.2.b"`) over objects and arrays.

use crate::error::{Error, Result};
use crate::value::Value;

/// Split a dotted path. Empty paths and empty segments are rejected.
pub fn split_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(Error::invalid_argument("keypath must not be empty"));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::invalid_argument(format!(
            "keypath \"{path}\" has an empty segment"
        )));
    }
    Ok(segments)
}

fn check_scope(scope: &Value) -> Result<()> {
    if scope.is_container() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "keypath scope must be an object or array, got {}",
            scope.kind()
        )))
    }
}

/// Value at `path`, or `None` when any segment is missing.
pub fn get_path(scope: &Value, path: &str) -> Result<Option<Value>> {
    check_scope(scope)?;
    let mut current = scope.clone();
    for segment in split_path(path)? {
        if !current.has_own(segment) {
            return Ok(None);
        }
        current = current.get(segment)?;
    }
    Ok(Some(current))
}

pub fn get_path_or(scope: &Value, path: &str, default: Value) -> Result<Value> {
    Ok(get_path(scope, path)?.unwrap_or(default))
}

/// Assign `value` at `path`.
///
/// With `ensure`, missing or non-container intermediate segments are
/// replaced by fresh empty objects. Without it, a missing intermediate makes
/// the write a no-op returning `false`.
pub fn set_path(scope: &Value, path: &str, value: impl Into<Value>, ensure: bool) -> Result<bool> {
    check_scope(scope)?;
    let segments = split_path(path)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| Error::invalid_argument("keypath must not be empty"))?;

    let mut current = scope.clone();
    for segment in parents {
        let next = current.get(segment)?;
        if next.is_container() {
            current = next;
        } else if ensure {
            let fresh = Value::object();
            if !current.set(segment, fresh.clone())? {
                return Ok(false);
            }
            current = fresh;
        } else {
            return Ok(false);
        }
    }
    current.set(last, value)
}

/// Container holding the last segment of `path`, and that segment.
pub(crate) fn resolve_parent(scope: &Value, path: &str) -> Result<Option<(Value, String)>> {
    check_scope(scope)?;
    let segments = split_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Ok(None);
    };
    let mut current = scope.clone();
    for segment in parents {
        current = current.get(segment)?;
        if !current.is_container() {
            return Ok(None);
        }
    }
    Ok(Some((current, (*last).to_string())))
}
