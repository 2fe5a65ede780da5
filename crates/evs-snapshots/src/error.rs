use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot directory could not be created: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot store task failed: {0}")]
    Join(String),
}
