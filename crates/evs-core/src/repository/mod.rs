//! Durable storage of enriched documents.

mod opensearch;

use async_trait::async_trait;
use evs_events::EnrichedEvent;
use thiserror::Error;

use crate::bulk::BulkError;
use crate::stream::Message;

pub use opensearch::{index_name, BulkEnrichedEventRepository, OpenSearchEnrichedEventRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("failed to encode enriched event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Bulk(#[from] BulkError),
}

/// Where enriched documents go.
///
/// `store` returning `Ok` only means the document was accepted; `message` is
/// acknowledged later, once the write is durable.
#[async_trait]
pub trait EnrichedEventRepository: Send + Sync {
    async fn store(&self, event: &EnrichedEvent, message: Message) -> Result<(), RepositoryError>;
    /// Flush pending documents.
    async fn close(&self) -> Result<(), RepositoryError>;
}
