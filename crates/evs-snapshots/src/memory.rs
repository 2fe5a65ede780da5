use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::store::GroupStore;
use crate::SnapshotError;

type Entries = Arc<RwLock<BTreeMap<String, String>>>;

/// In-process group store backed by a TTL cache.
///
/// Each group is one cache entry; re-inserting it on write restarts its
/// time-to-live.
#[derive(Clone)]
pub struct MemoryGroupStore {
    groups: Cache<String, Entries>,
    writes: Arc<Mutex<()>>,
}

impl MemoryGroupStore {
    pub fn new(expiration: Duration) -> Self {
        Self {
            groups: Cache::builder().time_to_live(expiration).build(),
            writes: Arc::new(Mutex::new(())),
        }
    }

    /// Number of live groups, after running pending evictions.
    pub async fn group_count(&self) -> u64 {
        self.groups.run_pending_tasks().await;
        self.groups.entry_count()
    }
}

#[async_trait]
impl GroupStore for MemoryGroupStore {
    async fn put(
        &self,
        group: &str,
        entity_id: &str,
        payload: String,
    ) -> Result<(), SnapshotError> {
        let _serialized = self.writes.lock().await;
        let entries = self
            .groups
            .get_with(group.to_string(), async { Entries::default() })
            .await;
        entries.write().insert(entity_id.to_string(), payload);
        self.groups.insert(group.to_string(), entries).await;
        Ok(())
    }

    async fn get(&self, group: &str, entity_id: &str) -> Result<Option<String>, SnapshotError> {
        Ok(match self.groups.get(group).await {
            Some(entries) => entries.read().get(entity_id).cloned(),
            None => None,
        })
    }

    async fn get_all(&self, group: &str) -> Result<Vec<(String, String)>, SnapshotError> {
        Ok(match self.groups.get(group).await {
            Some(entries) => entries
                .read()
                .iter()
                .map(|(id, payload)| (id.clone(), payload.clone()))
                .collect(),
            None => Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn groups_keep_entries_ordered_by_id() {
        let store = MemoryGroupStore::new(Duration::from_secs(60));
        store.put("hosts_c", "h2", "{}".into()).await.unwrap();
        store.put("hosts_c", "h1", "{\"a\":1}".into()).await.unwrap();
        store.put("hosts_c", "h2", "{\"b\":2}".into()).await.unwrap();

        let all = store.get_all("hosts_c").await.unwrap();
        assert_eq!(
            all,
            vec![
                ("h1".to_string(), "{\"a\":1}".to_string()),
                ("h2".to_string(), "{\"b\":2}".to_string())
            ]
        );
        assert_eq!(store.get("hosts_c", "h3").await.unwrap(), None);
        assert!(store.get_all("hosts_other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn groups_expire_after_ttl() {
        let store = MemoryGroupStore::new(Duration::from_millis(100));
        store.put("clusters", "c1", "{}".into()).await.unwrap();
        assert!(store.get("clusters", "c1").await.unwrap().is_some());

        sleep(Duration::from_millis(250)).await;
        assert_eq!(store.get("clusters", "c1").await.unwrap(), None);
        assert_eq!(store.group_count().await, 0);
    }
}
