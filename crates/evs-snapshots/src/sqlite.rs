use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::store::GroupStore;
use crate::SnapshotError;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Durable group store in a single SQLite file.
#[derive(Clone)]
pub struct SqliteGroupStore {
    db_path: PathBuf,
    expiration: Duration,
}

impl SqliteGroupStore {
    pub fn open(db_path: &Path, expiration: Duration) -> Result<Self, SnapshotError> {
        if let Some(dir) = db_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot_groups (
              group_key TEXT PRIMARY KEY,
              expires_at_ms INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS snapshots (
              group_key TEXT NOT NULL,
              entity_id TEXT NOT NULL,
              payload TEXT NOT NULL,
              PRIMARY KEY (group_key, entity_id)
            );
            CREATE INDEX IF NOT EXISTS idx_snapshot_groups_expiry ON snapshot_groups(expires_at_ms);
            "#,
        )?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            expiration,
        })
    }

    fn conn(&self) -> Result<Connection, SnapshotError> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_millis(5000))?;
        Ok(conn)
    }

    fn absent_or_expired(tx: &Transaction<'_>, group: &str, now: i64) -> Result<bool, SnapshotError> {
        let expires: Option<i64> = tx
            .query_row(
                "SELECT expires_at_ms FROM snapshot_groups WHERE group_key=?",
                params![group],
                |row| row.get(0),
            )
            .optional()?;
        match expires {
            Some(at) if at <= now => {
                tx.execute("DELETE FROM snapshots WHERE group_key=?", params![group])?;
                tx.execute(
                    "DELETE FROM snapshot_groups WHERE group_key=?",
                    params![group],
                )?;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(true),
        }
    }

    pub fn put_entry(&self, group: &str, entity_id: &str, payload: &str) -> Result<(), SnapshotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_millis();
        Self::absent_or_expired(&tx, group, now)?;
        tx.execute(
            "INSERT INTO snapshots(group_key,entity_id,payload) VALUES (?,?,?) \
             ON CONFLICT(group_key,entity_id) DO UPDATE SET payload=excluded.payload",
            params![group, entity_id, payload],
        )?;
        let expires_at = now.saturating_add(self.expiration.as_millis() as i64);
        tx.execute(
            "INSERT INTO snapshot_groups(group_key,expires_at_ms) VALUES (?,?) \
             ON CONFLICT(group_key) DO UPDATE SET expires_at_ms=excluded.expires_at_ms",
            params![group, expires_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_entry(&self, group: &str, entity_id: &str) -> Result<Option<String>, SnapshotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if Self::absent_or_expired(&tx, group, now_millis())? {
            tx.commit()?;
            return Ok(None);
        }
        let payload = tx
            .query_row(
                "SELECT payload FROM snapshots WHERE group_key=? AND entity_id=?",
                params![group, entity_id],
                |row| row.get(0),
            )
            .optional()?;
        tx.commit()?;
        Ok(payload)
    }

    pub fn get_group(&self, group: &str) -> Result<Vec<(String, String)>, SnapshotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        if Self::absent_or_expired(&tx, group, now_millis())? {
            tx.commit()?;
            return Ok(Vec::new());
        }
        let entries = {
            let mut stmt = tx.prepare(
                "SELECT entity_id,payload FROM snapshots WHERE group_key=? ORDER BY entity_id",
            )?;
            let rows = stmt.query_map(params![group], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<(String, String)>, _>>()?
        };
        tx.commit()?;
        Ok(entries)
    }

    /// Delete every expired group; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, SnapshotError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = now_millis();
        tx.execute(
            "DELETE FROM snapshots WHERE group_key IN \
             (SELECT group_key FROM snapshot_groups WHERE expires_at_ms <= ?)",
            params![now],
        )?;
        let removed = tx.execute(
            "DELETE FROM snapshot_groups WHERE expires_at_ms <= ?",
            params![now],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------

    pub async fn purge_expired_async(&self) -> Result<usize, SnapshotError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.purge_expired())
            .await
            .map_err(|e| SnapshotError::Join(e.to_string()))?
    }
}

#[async_trait]
impl GroupStore for SqliteGroupStore {
    async fn put(
        &self,
        group: &str,
        entity_id: &str,
        payload: String,
    ) -> Result<(), SnapshotError> {
        let store = self.clone();
        let group = group.to_string();
        let entity_id = entity_id.to_string();
        tokio::task::spawn_blocking(move || store.put_entry(&group, &entity_id, &payload))
            .await
            .map_err(|e| SnapshotError::Join(e.to_string()))?
    }

    async fn get(&self, group: &str, entity_id: &str) -> Result<Option<String>, SnapshotError> {
        let store = self.clone();
        let group = group.to_string();
        let entity_id = entity_id.to_string();
        tokio::task::spawn_blocking(move || store.get_entry(&group, &entity_id))
            .await
            .map_err(|e| SnapshotError::Join(e.to_string()))?
    }

    async fn get_all(&self, group: &str) -> Result<Vec<(String, String)>, SnapshotError> {
        let store = self.clone();
        let group = group.to_string();
        tokio::task::spawn_blocking(move || store.get_group(&group))
            .await
            .map_err(|e| SnapshotError::Join(e.to_string()))?
    }
}
