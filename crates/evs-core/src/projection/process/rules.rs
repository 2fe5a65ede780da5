use std::convert::Infallible;

use evs_jsonedit::{delete, rename, transform, EditError};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Field rewrites applied to every enriched document, in declaration order:
/// unpack, map-to-list (dropping keys), map-to-list (keeping keys),
/// anonymize, delete.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransformRules {
    /// Stringified JSON parsed in place.
    pub unpack: Vec<String>,
    pub map_to_list_drop_key: Vec<String>,
    /// Map entries become list items; the key is kept as `id` (objects) or
    /// `key` (scalars).
    pub map_to_list: Vec<String>,
    /// `(source, destination)`: the value is replaced by its MD5 hex digest
    /// and moved to the destination.
    pub anonymize: Vec<(String, String)>,
    pub delete: Vec<String>,
}

fn owned(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|path| path.to_string()).collect()
}

impl Default for TransformRules {
    fn default() -> Self {
        Self {
            unpack: owned(&[
                "cluster.feature_usage",
                "cluster.validations_info",
                "cluster.connectivity_majority_groups",
                "cluster.hosts[*].inventory",
                "cluster.hosts[*].connectivity",
                "cluster.hosts[*].disks_info",
                "cluster.hosts[*].domain_name_resolutions",
                "cluster.hosts[*].free_addresses",
                "cluster.hosts[*].images_status",
                "cluster.hosts[*].ntp_sources",
                "cluster.hosts[*].validations_info",
            ]),
            map_to_list_drop_key: owned(&["cluster.feature_usage"]),
            map_to_list: owned(&[
                "cluster.connectivity_majority_groups",
                "cluster.hosts[*].disks_info",
                "cluster.hosts[*].images_status",
            ]),
            anonymize: vec![
                ("cluster.user_name".into(), "cluster.user_id".into()),
                (
                    "cluster.hosts[*].user_name".into(),
                    "cluster.hosts[*].user_id".into(),
                ),
                (
                    "cluster.hosts[*].infra_env.user_name".into(),
                    "cluster.hosts[*].infra_env.user_id".into(),
                ),
            ],
            delete: owned(&[
                "cluster.pull_secret",
                "cluster.ssh_public_key",
                "cluster.hosts[*].infra_env.ssh_authorized_key",
                "infra_envs[*].ssh_authorized_key",
            ]),
        }
    }
}

impl TransformRules {
    /// Run every stage over `document`. Paths that cannot be rewritten are
    /// logged and skipped.
    pub fn apply(&self, document: &mut Value) {
        log_skipped(
            "unpack",
            transform(document, &self.unpack, Ok::<Value, Infallible>),
        );
        log_skipped(
            "map_to_list_drop_key",
            transform(document, &self.map_to_list_drop_key, map_to_list_drop_key),
        );
        log_skipped(
            "map_to_list",
            transform(document, &self.map_to_list, map_to_list_keyed),
        );
        let sources: Vec<&str> = self.anonymize.iter().map(|(src, _)| src.as_str()).collect();
        log_skipped(
            "anonymize",
            transform(document, &sources, |value| Ok::<Value, Infallible>(anonymize(value))),
        );
        log_skipped("anonymize", rename(document, &self.anonymize));
        log_skipped("delete", delete(document, &self.delete));
    }
}

fn log_skipped(stage: &'static str, skipped: Vec<EditError>) {
    for err in skipped {
        debug!(stage, error = %err, "transform path skipped");
    }
}

fn sorted_entries(map: Map<String, Value>) -> Vec<(String, Value)> {
    let mut entries: Vec<(String, Value)> = map.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries
}

/// `{k: v, ...}` to `[v, ...]`, ordered by key.
pub fn map_to_list_drop_key(value: Value) -> Result<Value, &'static str> {
    match value {
        Value::Object(map) => Ok(Value::Array(
            sorted_entries(map).into_iter().map(|(_, item)| item).collect(),
        )),
        _ => Err("value is not a map"),
    }
}

/// `{k: v, ...}` to a list ordered by key. Object items get `id: k`; any
/// other item becomes `{key: k, value: v}`.
pub fn map_to_list_keyed(value: Value) -> Result<Value, &'static str> {
    let Value::Object(map) = value else {
        return Err("value is not a map");
    };
    let items = sorted_entries(map)
        .into_iter()
        .map(|(key, item)| match item {
            Value::Object(mut fields) => {
                fields.insert("id".into(), Value::String(key));
                Value::Object(fields)
            }
            scalar => {
                let mut fields = Map::new();
                fields.insert("key".into(), Value::String(key));
                fields.insert("value".into(), scalar);
                Value::Object(fields)
            }
        })
        .collect();
    Ok(Value::Array(items))
}

pub fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

/// Hash string values; anything else passes through.
pub fn anonymize(value: Value) -> Value {
    match value {
        Value::String(sensitive) => Value::String(md5_hex(&sensitive)),
        other => other,
    }
}
