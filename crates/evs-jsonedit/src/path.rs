use serde_json::{Map, Value};

use crate::error::EditError;

/// Marker splitting a path into the list it walks and the field it edits.
pub const WILDCARD: &str = "[*]";

/// A parsed path expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSpec<'a> {
    /// Dotted path such as `cluster.hosts.0.inventory`.
    Simple(&'a str),
    /// `parent[*].child`: `child` is applied to every element of the list at `parent`.
    Wildcard { parent: &'a str, child: &'a str },
}

impl<'a> PathSpec<'a> {
    pub fn parse(path: &'a str) -> Result<Self, EditError> {
        match path.matches(WILDCARD).count() {
            0 if path.is_empty() => Err(EditError::unsupported(path, "empty path")),
            0 => Ok(Self::Simple(path)),
            1 => {
                let (parent, rest) = path
                    .split_once(WILDCARD)
                    .ok_or_else(|| EditError::unsupported(path, "malformed wildcard"))?;
                let child = rest.trim_matches('.');
                if parent.is_empty() || child.is_empty() {
                    return Err(EditError::unsupported(
                        path,
                        "wildcard needs both a parent and a child",
                    ));
                }
                Ok(Self::Wildcard { parent, child })
            }
            _ => Err(EditError::unsupported(path, "more than one [*] marker")),
        }
    }
}

fn index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

/// Look up the value at a simple dotted path.
pub fn get<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => index(segment).and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Mutable variant of [`get`].
pub fn get_mut<'v>(root: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => index(segment).and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

/// Remove and return the value at a simple dotted path.
pub fn take(root: &mut Value, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (get_mut(root, parent)?, last),
        None => (root, path),
    };
    match parent {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => match index(last) {
            Some(i) if i < items.len() => Some(items.remove(i)),
            _ => None,
        },
        _ => None,
    }
}

/// Set the value at a simple dotted path, creating missing intermediate objects.
///
/// Nulls along the way are replaced by objects. A scalar in the way, or a list
/// index past the end of a list, fails without touching the tree.
pub fn set(root: &mut Value, path: &str, value: Value) -> Result<(), EditError> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(EditError::set(path, "empty path segment"));
    }
    if !can_set(root, &segments) {
        return Err(EditError::set(path, "an intermediate value is not a container"));
    }
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| EditError::set(path, "empty path"))?;
    let mut node = root;
    for segment in parents {
        if node.is_null() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => index(segment)
                .and_then(move |i| items.get_mut(i))
                .ok_or_else(|| EditError::set(path, "list index out of range"))?,
            _ => return Err(EditError::set(path, "an intermediate value is not a container")),
        };
    }
    if node.is_null() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Value::Array(items) => match index(last) {
            Some(i) if i < items.len() => {
                items[i] = value;
                Ok(())
            }
            Some(i) if i == items.len() => {
                items.push(value);
                Ok(())
            }
            _ => Err(EditError::set(path, "list index out of range")),
        },
        _ => Err(EditError::set(path, "an intermediate value is not a container")),
    }
}

// Dry run of `set` so a failing path leaves no half-created objects behind.
fn can_set(root: &Value, segments: &[&str]) -> bool {
    let mut node = Some(root);
    for (pos, segment) in segments.iter().enumerate() {
        let is_last = pos + 1 == segments.len();
        node = match node {
            None | Some(Value::Null) => return true,
            Some(Value::Object(map)) => map.get(*segment),
            Some(Value::Array(items)) => match index(segment) {
                Some(i) if i < items.len() => items.get(i),
                Some(i) if i == items.len() && is_last => None,
                _ => return false,
            },
            Some(_) => return false,
        };
    }
    true
}

/// Lenient decoding applied to every addressed value.
///
/// A string holding a JSON object or list is replaced by the parsed
/// structure. Anything else, including strings that parse as bare JSON
/// scalars, is returned unchanged.
pub fn decode(value: Value) -> Value {
    if let Value::String(raw) = &value {
        let trimmed = raw.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) =
                serde_json::from_str::<Value>(raw)
            {
                return parsed;
            }
        }
    }
    value
}
