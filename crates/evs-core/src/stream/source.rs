use async_trait::async_trait;
use thiserror::Error;

use super::Message;

#[derive(Debug, Error)]
pub enum StreamError {
    /// The source has no more messages and will not produce any.
    #[error("stream closed")]
    Closed,
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("commit failed: {0}")]
    Commit(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("acknowledgment channel closed")]
    AckChannelClosed,
    #[error("envelope could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to read replay file: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Where messages come from and where their positions are committed.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait for the next message.
    async fn fetch_next(&self) -> Result<Message, StreamError>;
    /// Mark `message` and everything before it on its partition as processed.
    async fn commit(&self, message: &Message) -> Result<(), StreamError>;
    async fn close(&self) -> Result<(), StreamError>;
}

/// Keyed message producer.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError>;
    async fn close(&self) -> Result<(), StreamError>;
}
