use async_trait::async_trait;
use chrono::{DateTime, Utc};
use evs_events::EnrichedEvent;
use tracing::{debug, warn};

use super::{EnrichedEventRepository, RepositoryError};
use crate::bulk::{BulkIndexer, BulkItem, OpenSearchBulkIndexer};
use crate::stream::{AckSender, Message};

/// Monthly index for an event: `<prefix><YYYY>-<MM>`.
///
/// Times that are not RFC 3339 land in the current month's index.
pub fn index_name(prefix: &str, event_time: &str) -> String {
    let at = DateTime::parse_from_rfc3339(event_time)
        .map(|at| at.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());
    format!("{prefix}{}", at.format("%Y-%m"))
}

/// Stores enriched documents through a [`BulkIndexer`] and acknowledges the
/// source message from the success callback.
pub struct BulkEnrichedEventRepository<B> {
    indexer: B,
    index_prefix: String,
    acks: AckSender,
}

pub type OpenSearchEnrichedEventRepository = BulkEnrichedEventRepository<OpenSearchBulkIndexer>;

impl<B: BulkIndexer> BulkEnrichedEventRepository<B> {
    pub fn new(indexer: B, index_prefix: impl Into<String>, acks: AckSender) -> Self {
        Self {
            indexer,
            index_prefix: index_prefix.into(),
            acks,
        }
    }

    pub fn indexer(&self) -> &B {
        &self.indexer
    }
}

#[async_trait]
impl<B: BulkIndexer> EnrichedEventRepository for BulkEnrichedEventRepository<B> {
    async fn store(&self, event: &EnrichedEvent, message: Message) -> Result<(), RepositoryError> {
        let body = serde_json::to_vec(event)?;
        let index = index_name(&self.index_prefix, &event.event_time);
        debug!(%index, document_id = %event.id, "queueing enriched event");

        let acks = self.acks.clone();
        let failed_index = index.clone();
        let failed_id = event.id.clone();
        let item = BulkItem::new(index, event.id.clone(), body)
            .on_success(move || async move {
                let (partition, offset) = (message.partition, message.offset);
                if let Err(err) = acks.ack(message).await {
                    warn!(partition, offset, error = %err, "indexed event could not be acknowledged");
                }
            })
            .on_failure(move |err| async move {
                warn!(
                    index = %failed_index,
                    document_id = %failed_id,
                    error = %err,
                    "failed to index enriched event"
                );
            });
        self.indexer.add(item).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), RepositoryError> {
        self.indexer.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::{BulkError, BulkStats};
    use crate::stream::{ack_channel, Ack};
    use chrono::Datelike;
    use parking_lot::Mutex;

    /// Keeps items until the test settles them.
    #[derive(Default)]
    struct HeldIndexer {
        items: Mutex<Vec<BulkItem>>,
    }

    impl HeldIndexer {
        fn take(&self) -> Vec<BulkItem> {
            std::mem::take(&mut *self.items.lock())
        }
    }

    #[async_trait]
    impl BulkIndexer for HeldIndexer {
        async fn add(&self, item: BulkItem) -> Result<(), BulkError> {
            self.items.lock().push(item);
            Ok(())
        }

        async fn close(&self) -> Result<(), BulkError> {
            Ok(())
        }

        fn stats(&self) -> BulkStats {
            BulkStats::default()
        }
    }

    fn enriched(id: &str, event_time: &str) -> EnrichedEvent {
        EnrichedEvent {
            id: id.into(),
            message: "Cluster registered".into(),
            event_time: event_time.into(),
            ..Default::default()
        }
    }

    #[test]
    fn index_name_uses_event_month() {
        assert_eq!(
            index_name("assisted-events-", "2023-01-27T03:40:08.998Z"),
            "assisted-events-2023-01"
        );
        assert_eq!(index_name("", "2022-12-31T23:30:00-02:00"), "2023-01");
    }

    #[test]
    fn unparseable_time_falls_back_to_current_month() {
        let now = Utc::now();
        let expected = format!("p-{}-{:02}", now.year(), now.month());
        assert_eq!(index_name("p-", "yesterday"), expected);
    }

    #[tokio::test]
    async fn acknowledges_only_after_successful_index() {
        let (acks, mut rx) = ack_channel(4);
        let repo = BulkEnrichedEventRepository::new(HeldIndexer::default(), "events-", acks);

        let message = Message::new("events", 3, 42);
        repo.store(&enriched("doc-1", "2023-01-27T03:40:08.998Z"), message.clone())
            .await
            .unwrap();
        assert!(rx.try_recv().is_none());

        let mut items = repo.indexer().take();
        assert_eq!(items.len(), 1);
        let item = items.remove(0);
        assert_eq!(item.index, "events-2023-01");
        assert_eq!(item.document_id, "doc-1");
        let body: EnrichedEvent = serde_json::from_slice(&item.body).unwrap();
        assert_eq!(body.id, "doc-1");

        item.succeed().await;
        assert_eq!(rx.try_recv(), Some(Ack::Done(message)));
    }

    #[tokio::test]
    async fn failed_index_is_not_acknowledged() {
        let (acks, mut rx) = ack_channel(4);
        let repo = BulkEnrichedEventRepository::new(HeldIndexer::default(), "events-", acks);
        repo.store(&enriched("doc-2", "2023-02-01T00:00:00Z"), Message::new("events", 0, 7))
            .await
            .unwrap();

        for item in repo.indexer().take() {
            item.fail(BulkError::Rejected {
                status: 400,
                reason: "mapper_parsing_exception".into(),
            })
            .await;
        }
        assert!(rx.try_recv().is_none());
    }
}
