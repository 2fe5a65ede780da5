use serde_json::Value;

use crate::error::EditError;
use crate::path::{decode, get, set, take, PathSpec};
use crate::transform::for_each_element;

/// Move the value at each `src` to its `dst`, in order.
///
/// Wildcard renames must keep the same parent list and change only the child
/// field; renaming across parents is reported and skipped. When the value
/// cannot be written at `dst`, `src` is left untouched.
pub fn rename<S, D>(tree: &mut Value, pairs: &[(S, D)]) -> Vec<EditError>
where
    S: AsRef<str>,
    D: AsRef<str>,
{
    let mut skipped = Vec::new();
    for (src, dst) in pairs {
        let (src, dst) = (src.as_ref(), dst.as_ref());
        let specs = PathSpec::parse(src).and_then(|s| PathSpec::parse(dst).map(|d| (s, d)));
        match specs {
            Ok((PathSpec::Simple(from), PathSpec::Simple(to))) => {
                if let Err(err) = move_value(tree, from, to) {
                    skipped.push(err);
                }
            }
            Ok((
                PathSpec::Wildcard {
                    parent,
                    child: from,
                },
                PathSpec::Wildcard {
                    parent: dst_parent,
                    child: to,
                },
            )) => {
                if parent != dst_parent {
                    skipped.push(EditError::unsupported(
                        src,
                        "renaming across different parents",
                    ));
                    continue;
                }
                for_each_element(tree, parent, &mut skipped, |item, skipped| {
                    if let Err(err) = move_value(item, from, to) {
                        skipped.push(err);
                    }
                });
            }
            Ok(_) => skipped.push(EditError::unsupported(
                src,
                "source and destination must both be simple or both use [*]",
            )),
            Err(err) => skipped.push(err),
        }
    }
    skipped
}

fn move_value(tree: &mut Value, from: &str, to: &str) -> Result<(), EditError> {
    if from == to {
        return Ok(());
    }
    let Some(value) = get(tree, from).cloned() else {
        return Ok(());
    };
    set(tree, to, decode(value))?;
    take(tree, from);
    Ok(())
}
