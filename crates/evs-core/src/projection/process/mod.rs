//! Turning an activity event plus snapshots into an enriched document.

mod hosts_summary;
mod rules;

use evs_events::{EmbeddedEvent, EnrichedEvent, Event};
use evs_snapshots::Snapshot;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

pub use hosts_summary::summarize_hosts;
pub use rules::{anonymize, map_to_list_drop_key, map_to_list_keyed, md5_hex, TransformRules};

const DOCUMENT_ID_NAMESPACE: Uuid = Uuid::from_bytes(*b"abcdefghilmnopqr");

/// Builds the stored document for an activity event.
pub trait EventEnricher: Send + Sync {
    fn enrich(
        &self,
        event: &Event,
        cluster: Snapshot,
        hosts: Vec<Snapshot>,
        infra_envs: Vec<Snapshot>,
    ) -> EnrichedEvent;
}

/// Document id for an activity: stable across redelivery of the same event.
pub fn document_id(message: &str, event_time: &str) -> String {
    let name = format!("{message}{event_time}");
    Uuid::new_v5(&DOCUMENT_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Attach to each host the infra-env its `infra_env_id` points at.
pub fn embed_infra_envs(hosts: &mut [Snapshot], infra_envs: &[Snapshot]) {
    for host in hosts.iter_mut() {
        let Some(infra_env_id) = host.get("infra_env_id").cloned() else {
            continue;
        };
        if let Some(infra_env) = infra_envs
            .iter()
            .find(|infra_env| infra_env.get("id") == Some(&infra_env_id))
        {
            host.insert("infra_env".into(), Value::Object(infra_env.clone()));
        }
    }
}

fn payload_field(event: &Event, key: &str) -> String {
    event
        .payload
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The payload's `props` is a JSON object serialized into a string.
fn props(event: &Event) -> Map<String, Value> {
    let Some(raw) = event.payload.get("props").and_then(Value::as_str) else {
        return Map::new();
    };
    match serde_json::from_str(raw) {
        Ok(props) => props,
        Err(err) => {
            debug!(error = %err, "event props are not a JSON object");
            Map::new()
        }
    }
}

/// The document before any field rule runs.
pub fn base_document(
    event: &Event,
    mut cluster: Snapshot,
    mut hosts: Vec<Snapshot>,
    infra_envs: Vec<Snapshot>,
) -> EnrichedEvent {
    embed_infra_envs(&mut hosts, &infra_envs);
    cluster.insert(
        "hosts".into(),
        Value::Array(hosts.into_iter().map(Value::Object).collect()),
    );

    let message = payload_field(event, "message");
    let event_time = payload_field(event, "event_time");
    EnrichedEvent {
        id: document_id(&message, &event_time),
        category: payload_field(event, "category"),
        cluster_id: payload_field(event, "cluster_id"),
        name: payload_field(event, "name"),
        request_id: payload_field(event, "request_id"),
        severity: payload_field(event, "severity"),
        message,
        event_time,
        event: EmbeddedEvent {
            props: props(event),
        },
        cluster,
        infra_envs: infra_envs.into_iter().map(Value::Object).collect(),
        versions: event.versions(),
        release_tag: event.release_tag(),
        hosts_summary: None,
    }
}

/// Production [`EventEnricher`]: base document, field rules, hosts summary.
#[derive(Debug, Clone, Default)]
pub struct Enricher {
    rules: TransformRules,
}

impl Enricher {
    pub fn new(rules: TransformRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &TransformRules {
        &self.rules
    }

    fn transformed(&self, base: EnrichedEvent) -> EnrichedEvent {
        let mut document = match serde_json::to_value(&base) {
            Ok(document) => document,
            Err(err) => {
                warn!(document_id = %base.id, error = %err, "could not encode document for transformation");
                return base;
            }
        };
        self.rules.apply(&mut document);
        match serde_json::from_value(document) {
            Ok(enriched) => enriched,
            Err(err) => {
                // snapshot sections are dropped rather than stored untransformed
                warn!(
                    document_id = %base.id,
                    error = %err,
                    "transformed document lost its shape, keeping event fields only"
                );
                EnrichedEvent {
                    cluster: Map::new(),
                    infra_envs: Vec::new(),
                    ..base
                }
            }
        }
    }
}

impl EventEnricher for Enricher {
    fn enrich(
        &self,
        event: &Event,
        cluster: Snapshot,
        hosts: Vec<Snapshot>,
        infra_envs: Vec<Snapshot>,
    ) -> EnrichedEvent {
        let base = base_document(event, cluster, hosts, infra_envs);
        let mut enriched = self.transformed(base);
        enriched.hosts_summary = Some(summarize_hosts(&enriched.cluster));
        enriched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> Snapshot {
        value.as_object().cloned().unwrap_or_default()
    }

    fn activity() -> Event {
        Event::new(
            "Event",
            json!({
                "cluster_id": "myid",
                "message": "Cluster with ID myid updated",
                "event_time": "2023-01-27T03:40:08.998Z",
                "category": "user",
                "severity": "info",
                "name": "cluster_updated",
                "request_id": "req-1",
                "props": "{\"host_count\":3}"
            }),
        )
        .with_metadata(snapshot(json!({
            "versions": {"versions": {"assisted-installer": "quay.io/ai:v2"}},
            "release_tag": "v2.15.0"
        })))
    }

    #[test]
    fn document_id_is_deterministic() {
        assert_eq!(
            document_id("Cluster with ID myid updated", "2023-01-27T03:40:08.998Z"),
            "2818dea3-cb53-5897-bff6-f0548b76424c"
        );
        assert_eq!(document_id("m", "t"), "9af4c9dc-79de-5246-b297-d7bba03d38ad");
        assert_eq!(document_id("", ""), "567069e4-cef4-5abf-92eb-ef57c3defc74");
    }

    #[test]
    fn hosts_embed_matching_infra_env_only() {
        let mut hosts = vec![
            snapshot(json!({"id": "h1", "infra_env_id": "i1"})),
            snapshot(json!({"id": "h2", "infra_env_id": "missing"})),
            snapshot(json!({"id": "h3"})),
        ];
        let infra_envs = vec![snapshot(json!({"id": "i1", "type": "full-iso"}))];
        embed_infra_envs(&mut hosts, &infra_envs);

        assert_eq!(hosts[0]["infra_env"]["type"], "full-iso");
        assert!(!hosts[1].contains_key("infra_env"));
        assert!(!hosts[2].contains_key("infra_env"));
    }

    #[test]
    fn base_document_copies_event_fields() {
        let doc = base_document(
            &activity(),
            snapshot(json!({"id": "myid"})),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(doc.id, "2818dea3-cb53-5897-bff6-f0548b76424c");
        assert_eq!(doc.cluster_id, "myid");
        assert_eq!(doc.category, "user");
        assert_eq!(doc.request_id, "req-1");
        assert_eq!(doc.event.props["host_count"], 3);
        assert_eq!(doc.cluster["hosts"], json!([]));
        assert_eq!(
            doc.versions.unwrap()["assisted-installer"],
            "quay.io/ai:v2"
        );
        assert_eq!(doc.release_tag.as_deref(), Some("v2.15.0"));
    }

    #[test]
    fn missing_fields_degrade_to_empty_strings() {
        let event = Event::new("Event", json!({"cluster_id": "c1", "message": 7}));
        let doc = Enricher::default().enrich(&event, Snapshot::new(), Vec::new(), Vec::new());
        assert_eq!(doc.message, "");
        assert_eq!(doc.event_time, "");
        assert!(doc.event.props.is_empty());
        assert!(doc.versions.is_none());
        assert_eq!(doc.hosts_summary.unwrap().host_count, 0);
    }

    #[test]
    fn enrich_transforms_before_summarizing() {
        let cluster = snapshot(json!({
            "id": "myid",
            "user_name": "alice",
            "pull_secret": "secret"
        }));
        let hosts = vec![
            snapshot(json!({"id": "h1", "infra_env_id": "i1", "user_name": "bob"})),
            snapshot(json!({"id": "h2", "infra_env_id": "i2"})),
        ];
        let infra_envs = vec![
            snapshot(json!({"id": "i1", "cpu_architecture": "x86_64", "type": "full-iso", "user_name": "jdoe", "ssh_authorized_key": "k"})),
            snapshot(json!({"id": "i2", "cpu_architecture": "arm64", "type": "full-iso", "openshift_version": "4.12"})),
        ];

        let first = Enricher::default().enrich(&activity(), cluster.clone(), hosts.clone(), infra_envs.clone());
        let second = Enricher::default().enrich(&activity(), cluster, hosts, infra_envs);
        assert_eq!(first.id, second.id);

        assert_eq!(first.cluster["user_id"], "6384e2b2184bcbf58eccf10ca7a6563c");
        assert!(!first.cluster.contains_key("pull_secret"));
        let host = &first.cluster["hosts"][0];
        assert_eq!(host["user_id"], "9f9d51bc70ef21ca5c14f307980a29d8");
        assert_eq!(host["infra_env"]["user_id"], "a31405d272b94e5d12e9a52a665d3bfe");
        assert!(host["infra_env"].get("ssh_authorized_key").is_none());
        assert!(first.infra_envs[0].get("ssh_authorized_key").is_none());

        let summary = first.hosts_summary.unwrap();
        assert_eq!(summary.host_count, 2);
        assert_eq!(summary.iso_type, "full-iso");
        assert!(summary.has_heterogeneous_architecture);
        assert_eq!(summary.infra_env["openshift_version"]["4_12"], 0.5);
    }

    #[test]
    fn rules_that_break_the_shape_keep_event_fields() {
        let rules = TransformRules {
            unpack: Vec::new(),
            map_to_list_drop_key: vec!["cluster".into()],
            map_to_list: Vec::new(),
            anonymize: Vec::new(),
            delete: Vec::new(),
        };
        let doc = Enricher::new(rules).enrich(
            &activity(),
            snapshot(json!({"id": "myid", "user_name": "alice"})),
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(doc.message, "Cluster with ID myid updated");
        assert!(doc.cluster.is_empty());
    }
}
