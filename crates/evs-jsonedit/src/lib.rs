//! Path-addressed editing of JSON trees.
//!
//! Paths are dotted (`cluster.hosts.0.id`) and may contain a single `[*]`
//! marker (`cluster.hosts[*].inventory`) meaning "the field after the marker,
//! in every element of the list before it". All operations are tolerant:
//! a path that is missing is skipped silently, a path that cannot be edited
//! is skipped and reported, and the remaining paths are still processed.
//!
//! The tree-level functions work on [`serde_json::Value`] and return the
//! skipped paths. The `*_json` wrappers take and return serialized bytes and
//! only fail when the input is not a JSON document.

mod delete;
mod error;
pub mod path;
mod rename;
mod transform;

use std::fmt::Display;

use serde_json::Value;

pub use delete::delete;
pub use error::EditError;
pub use path::{PathSpec, WILDCARD};
pub use rename::rename;
pub use transform::transform;

fn log_skipped(op: &'static str, skipped: Vec<EditError>) {
    for err in skipped {
        tracing::debug!(op, error = %err, "skipping path");
    }
}

/// Byte-level [`transform`].
pub fn transform_json<P, F, E>(json: &[u8], paths: &[P], f: F) -> Result<Vec<u8>, EditError>
where
    P: AsRef<str>,
    F: FnMut(Value) -> Result<Value, E>,
    E: Display,
{
    let mut tree: Value = serde_json::from_slice(json)?;
    log_skipped("transform", transform(&mut tree, paths, f));
    Ok(serde_json::to_vec(&tree)?)
}

/// Byte-level [`delete`].
pub fn delete_json<P: AsRef<str>>(json: &[u8], paths: &[P]) -> Result<Vec<u8>, EditError> {
    let mut tree: Value = serde_json::from_slice(json)?;
    log_skipped("delete", delete(&mut tree, paths));
    Ok(serde_json::to_vec(&tree)?)
}

/// Byte-level [`rename`].
pub fn rename_json<S, D>(json: &[u8], pairs: &[(S, D)]) -> Result<Vec<u8>, EditError>
where
    S: AsRef<str>,
    D: AsRef<str>,
{
    let mut tree: Value = serde_json::from_slice(json)?;
    log_skipped("rename", rename(&mut tree, pairs));
    Ok(serde_json::to_vec(&tree)?)
}
