use serde_json::Value;

use crate::error::EditError;
use crate::path::{take, PathSpec};
use crate::transform::for_each_element;

/// Remove the value addressed by each path.
///
/// `parent[*].child` removes `child` from every element of the list at
/// `parent` and keeps sibling fields. Deleting a missing path is a no-op.
pub fn delete<P: AsRef<str>>(tree: &mut Value, paths: &[P]) -> Vec<EditError> {
    let mut skipped = Vec::new();
    for path in paths {
        match PathSpec::parse(path.as_ref()) {
            Ok(PathSpec::Simple(simple)) => {
                take(tree, simple);
            }
            Ok(PathSpec::Wildcard { parent, child }) => {
                for_each_element(tree, parent, &mut skipped, |item, _| {
                    take(item, child);
                });
            }
            Err(err) => skipped.push(err),
        }
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deletes_simple_field() {
        let mut doc = json!({"foobar": "myvalue", "foo": {"bar": 1, "baz": 2}});
        assert!(delete(&mut doc, &["foobar", "foo.bar"]).is_empty());
        assert_eq!(doc, json!({"foo": {"baz": 2}}));
    }

    #[test]
    fn deleting_missing_path_is_noop() {
        let original = json!({"a": {"b": [1, 2]}});
        let mut doc = original.clone();
        assert!(delete(&mut doc, &["x", "a.c", "a.b.9", "a.b.0.z"]).is_empty());
        assert_eq!(doc, original);
    }

    #[test]
    fn wildcard_removes_child_from_every_element() {
        let mut doc = json!({
            "foo": {"bar": [
                {"age": 12, "name": "a"},
                {"age": 21},
                {"name": "c"},
                {"age": 99, "name": "d", "nested": {"age": 1}}
            ]}
        });
        let expected = json!({
            "foo": {"bar": [
                {"name": "a"},
                {},
                {"name": "c"},
                {"name": "d", "nested": {"age": 1}}
            ]}
        });
        assert!(delete(&mut doc, &["foo.bar[*].age"]).is_empty());
        assert_eq!(doc, expected);

        assert!(delete(&mut doc, &["foo.bar[*].age"]).is_empty());
        assert_eq!(doc, expected);
    }

    #[test]
    fn wildcard_reaches_nested_child() {
        let mut doc = json!({"hosts": [
            {"infra_env": {"ssh_authorized_key": "k", "id": "i1"}},
            {"id": "h2"}
        ]});
        delete(&mut doc, &["hosts[*].infra_env.ssh_authorized_key"]);
        assert_eq!(
            doc,
            json!({"hosts": [{"infra_env": {"id": "i1"}}, {"id": "h2"}]})
        );
    }

    #[test]
    fn wildcard_on_non_list_is_reported() {
        let mut doc = json!({"foo": {"age": 1}});
        let skipped = delete(&mut doc, &["foo[*].age"]);
        assert_eq!(skipped.len(), 1);
        assert_eq!(doc, json!({"foo": {"age": 1}}));
    }
}
