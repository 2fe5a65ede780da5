use async_trait::async_trait;

use crate::SnapshotError;

/// Hash-like storage: entities keyed by ID inside a group, one expiry per group.
///
/// Every write refreshes the expiry of the group it lands in. Once a group has
/// expired it behaves as if it had never been written.
#[async_trait]
pub trait GroupStore: Send + Sync {
    async fn put(&self, group: &str, entity_id: &str, payload: String)
        -> Result<(), SnapshotError>;
    async fn get(&self, group: &str, entity_id: &str) -> Result<Option<String>, SnapshotError>;
    /// All entries of a group ordered by entity ID.
    async fn get_all(&self, group: &str) -> Result<Vec<(String, String)>, SnapshotError>;
}
