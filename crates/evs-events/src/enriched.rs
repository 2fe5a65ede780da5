use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Labels tracked per infra-env in [`HostsSummary::infra_env`].
pub const SUMMARY_STATS: [&str; 3] = ["type", "cpu_architecture", "openshift_version"];

/// `stat name -> label -> fraction of hosts with an infra-env`.
pub type InfraEnvStats = BTreeMap<String, BTreeMap<String, f64>>;

/// Aggregate view of the hosts embedded in a cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostsSummary {
    pub host_count: usize,
    /// Most common infra-env `type` label; empty when no host has an infra-env.
    pub iso_type: String,
    pub infra_env: InfraEnvStats,
    pub has_heterogeneous_architecture: bool,
}

/// Event-level fields kept next to the enriched document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedEvent {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub props: Map<String, Value>,
}

impl EmbeddedEvent {
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }
}

/// Denormalized document written to the search store.
///
/// `id` is derived from the activity's message and time, so storing the same
/// activity twice overwrites one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub event_time: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default, skip_serializing_if = "EmbeddedEvent::is_empty")]
    pub event: EmbeddedEvent,
    #[serde(default)]
    pub cluster: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infra_envs: Vec<Value>,
    #[serde(default)]
    pub versions: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_tag: Option<String>,
    #[serde(default)]
    pub hosts_summary: Option<HostsSummary>,
}
