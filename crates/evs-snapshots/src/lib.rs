//! Latest-state snapshots of clusters, hosts and infra-envs.
//!
//! Each `*State` event overwrites the stored payload of its entity. Hosts and
//! infra-envs are grouped per cluster; clusters share one group. Every write
//! refreshes the retention of the group it lands in.

mod error;
mod memory;
mod sqlite;
mod store;

use std::time::Duration;

use async_trait::async_trait;
use evs_events::Event;
use serde_json::{Map, Value};

pub use error::SnapshotError;
pub use memory::MemoryGroupStore;
pub use sqlite::SqliteGroupStore;
pub use store::GroupStore;

/// Latest known state of one entity.
pub type Snapshot = Map<String, Value>;

/// Default retention of a snapshot group (30 days).
pub const DEFAULT_SNAPSHOT_EXPIRATION: Duration = Duration::from_secs(720 * 60 * 60);

pub const CLUSTERS_GROUP: &str = "clusters";

pub fn hosts_group(cluster_id: &str) -> String {
    format!("hosts_{cluster_id}")
}

pub fn infra_envs_group(cluster_id: &str) -> String {
    format!("infraenvs_{cluster_id}")
}

/// Snapshot storage consumed by the projection.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn set_cluster(&self, cluster_id: &str, event: &Event) -> Result<(), SnapshotError>;
    async fn set_host(
        &self,
        cluster_id: &str,
        host_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError>;
    async fn set_infra_env(
        &self,
        cluster_id: &str,
        infra_env_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError>;
    /// Missing clusters come back as an empty snapshot.
    async fn get_cluster(&self, cluster_id: &str) -> Result<Snapshot, SnapshotError>;
    async fn get_hosts(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError>;
    async fn get_infra_envs(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError>;
}

/// [`SnapshotRepository`] over any [`GroupStore`], storing event payloads as JSON.
#[derive(Clone)]
pub struct StoreSnapshotRepository<S> {
    store: S,
}

pub type MemorySnapshotRepository = StoreSnapshotRepository<MemoryGroupStore>;
pub type SqliteSnapshotRepository = StoreSnapshotRepository<SqliteGroupStore>;

impl<S: GroupStore> StoreSnapshotRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn put_payload(
        &self,
        group: &str,
        entity_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError> {
        let payload = serde_json::to_string(&event.payload)?;
        self.store.put(group, entity_id, payload).await
    }

    async fn list(&self, group: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        let entries = self.store.get_all(group).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(id, raw)| decode(group, &id, &raw))
            .collect())
    }
}

impl MemorySnapshotRepository {
    pub fn in_memory(expiration: Duration) -> Self {
        Self::new(MemoryGroupStore::new(expiration))
    }
}

impl SqliteSnapshotRepository {
    pub fn sqlite(path: &std::path::Path, expiration: Duration) -> Result<Self, SnapshotError> {
        Ok(Self::new(SqliteGroupStore::open(path, expiration)?))
    }
}

fn decode(group: &str, entity_id: &str, raw: &str) -> Option<Snapshot> {
    match serde_json::from_str::<Snapshot>(raw) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            tracing::warn!(group, entity_id, error = %err, "skipping undecodable snapshot");
            None
        }
    }
}

#[async_trait]
impl<S: GroupStore> SnapshotRepository for StoreSnapshotRepository<S> {
    async fn set_cluster(&self, cluster_id: &str, event: &Event) -> Result<(), SnapshotError> {
        self.put_payload(CLUSTERS_GROUP, cluster_id, event).await
    }

    async fn set_host(
        &self,
        cluster_id: &str,
        host_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError> {
        self.put_payload(&hosts_group(cluster_id), host_id, event)
            .await
    }

    async fn set_infra_env(
        &self,
        cluster_id: &str,
        infra_env_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError> {
        self.put_payload(&infra_envs_group(cluster_id), infra_env_id, event)
            .await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Snapshot, SnapshotError> {
        let raw = self.store.get(CLUSTERS_GROUP, cluster_id).await?;
        Ok(raw
            .and_then(|raw| decode(CLUSTERS_GROUP, cluster_id, &raw))
            .unwrap_or_default())
    }

    async fn get_hosts(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        self.list(&hosts_group(cluster_id)).await
    }

    async fn get_infra_envs(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        self.list(&infra_envs_group(cluster_id)).await
    }
}
