use std::fmt::Display;

use serde_json::Value;

use crate::error::EditError;
use crate::path::{decode, get_mut, PathSpec};

/// Apply `f` to the value addressed by each path, writing the result back in place.
///
/// Values are decoded leniently before `f` sees them (see [`decode`]). Missing
/// paths are skipped silently. When `f` fails the original value is kept and
/// the path is reported in the returned list; processing continues with the
/// next path.
pub fn transform<P, F, E>(tree: &mut Value, paths: &[P], mut f: F) -> Vec<EditError>
where
    P: AsRef<str>,
    F: FnMut(Value) -> Result<Value, E>,
    E: Display,
{
    let mut skipped = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match PathSpec::parse(path) {
            Ok(PathSpec::Simple(simple)) => {
                if let Err(err) = apply(tree, simple, path, &mut f) {
                    skipped.push(err);
                }
            }
            Ok(PathSpec::Wildcard { parent, child }) => {
                for_each_element(tree, parent, &mut skipped, |item, skipped| {
                    if let Err(err) = apply(item, child, path, &mut f) {
                        skipped.push(err);
                    }
                });
            }
            Err(err) => skipped.push(err),
        }
    }
    skipped
}

fn apply<F, E>(tree: &mut Value, path: &str, label: &str, f: &mut F) -> Result<(), EditError>
where
    F: FnMut(Value) -> Result<Value, E>,
    E: Display,
{
    let Some(slot) = get_mut(tree, path) else {
        return Ok(());
    };
    let original = std::mem::take(slot);
    match f(decode(original.clone())) {
        Ok(value) => {
            *slot = value;
            Ok(())
        }
        Err(err) => {
            *slot = original;
            Err(EditError::Transform {
                path: label.to_string(),
                reason: err.to_string(),
            })
        }
    }
}

/// Run `edit` on every element of the list at `parent`.
///
/// A string holding a JSON list is decoded first. A missing parent is a no-op;
/// a parent that is not a list is reported and left untouched.
pub(crate) fn for_each_element<G>(
    tree: &mut Value,
    parent: &str,
    skipped: &mut Vec<EditError>,
    mut edit: G,
) where
    G: FnMut(&mut Value, &mut Vec<EditError>),
{
    let Some(node) = get_mut(tree, parent) else {
        return;
    };
    if node.is_string() {
        *node = decode(std::mem::take(node));
    }
    match node {
        Value::Array(items) => {
            for item in items.iter_mut() {
                edit(item, skipped);
            }
        }
        _ => skipped.push(EditError::not_a_list(parent)),
    }
}
