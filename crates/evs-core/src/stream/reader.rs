use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{Ack, AckReceiver, CommitOrdering, Message, MessageSource, OffsetTracker, StreamError};

/// Handles one fetched message at a time.
///
/// Returning an error stops the fetch loop. Processors that want a message
/// dropped and committed acknowledge it themselves and return `Ok`.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn process(&self, message: &Message) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum ConsumeError<E: std::error::Error + 'static> {
    #[error("message source failed: {0}")]
    Stream(#[source] StreamError),
    #[error("message processing failed: {0}")]
    Process(#[source] E),
}

/// Fetch loop plus the background commit loop that turns acknowledgments
/// into offset commits.
pub struct StreamReader<S: ?Sized> {
    source: Arc<S>,
    tracker: Option<Arc<OffsetTracker>>,
    shutdown: CancellationToken,
}

impl<S> StreamReader<S>
where
    S: MessageSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            tracker: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_ordering(mut self, ordering: CommitOrdering) -> Self {
        self.tracker = match ordering {
            CommitOrdering::Immediate => None,
            CommitOrdering::Contiguous => Some(Arc::new(OffsetTracker::default())),
        };
        self
    }

    /// Contiguous ordering with a caller-built tracker.
    pub fn with_offset_tracker(mut self, tracker: OffsetTracker) -> Self {
        self.tracker = Some(Arc::new(tracker));
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Cancelling this token stops the fetch loop after the current message.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Start committing acknowledged messages in the background.
    pub fn spawn_commit_loop(&self, acks: AckReceiver) -> CommitLoop {
        let stop = CancellationToken::new();
        let handle = tokio::spawn(commit_loop(
            self.source.clone(),
            self.tracker.clone(),
            acks,
            stop.clone(),
        ));
        CommitLoop { stop, handle }
    }

    /// Fetch and process messages until shutdown, the end of the source or a
    /// processing error. Returns the number of processed messages.
    pub async fn run<P>(&self, processor: &P) -> Result<u64, ConsumeError<P::Error>>
    where
        P: MessageProcessor + ?Sized,
    {
        let mut processed = 0u64;
        loop {
            let fetched = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(processed, "shutdown requested, fetch loop stopped");
                    break;
                }
                fetched = self.source.fetch_next() => fetched,
            };
            let message = match fetched {
                Ok(message) => message,
                Err(StreamError::Closed) => {
                    info!(processed, "message source closed");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to fetch message");
                    return Err(ConsumeError::Stream(err));
                }
            };
            if let Some(tracker) = &self.tracker {
                tracker.track(&message);
            }
            debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "processing message"
            );
            if let Err(err) = processor.process(&message).await {
                error!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "message processing failed, stopping consumer"
                );
                return Err(ConsumeError::Process(err));
            }
            processed += 1;
        }
        Ok(processed)
    }

    /// [`run`](Self::run) with a commit loop for its lifetime.
    ///
    /// Acknowledgments still queued when the fetch loop ends are committed
    /// before this returns.
    pub async fn consume<P>(
        &self,
        processor: &P,
        acks: AckReceiver,
    ) -> Result<u64, ConsumeError<P::Error>>
    where
        P: MessageProcessor + ?Sized,
    {
        let commits = self.spawn_commit_loop(acks);
        let result = self.run(processor).await;
        let committed = commits.shutdown().await;
        debug!(committed, "commit loop stopped");
        result
    }
}

/// Handle on a running commit loop.
pub struct CommitLoop {
    stop: CancellationToken,
    handle: JoinHandle<u64>,
}

impl CommitLoop {
    /// Commit what is already queued, stop, and return the number of commits.
    pub async fn shutdown(self) -> u64 {
        self.stop.cancel();
        match self.handle.await {
            Ok(committed) => committed,
            Err(err) => {
                error!(error = %err, "commit loop terminated abnormally");
                0
            }
        }
    }
}

async fn commit_loop<S>(
    source: Arc<S>,
    tracker: Option<Arc<OffsetTracker>>,
    mut acks: AckReceiver,
    stop: CancellationToken,
) -> u64
where
    S: MessageSource + ?Sized,
{
    let mut committed = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            ack = acks.recv() => ack,
            _ = stop.cancelled() => break,
        };
        // every sender dropped
        let Some(ack) = next else { break };
        committed += commit_one(source.as_ref(), tracker.as_deref(), ack).await;
    }
    while let Some(ack) = acks.try_recv() {
        committed += commit_one(source.as_ref(), tracker.as_deref(), ack).await;
    }
    committed
}

async fn commit_one<S>(source: &S, tracker: Option<&OffsetTracker>, ack: Ack) -> u64
where
    S: MessageSource + ?Sized,
{
    let ready = match (tracker, ack) {
        (Some(tracker), Ack::Done(message)) => tracker.acknowledge(message),
        (Some(tracker), Ack::Skipped(message)) => tracker.skip(&message),
        (None, Ack::Done(message)) => Some(message),
        (None, Ack::Skipped(_)) => None,
    };
    let Some(message) = ready else { return 0 };
    match source.commit(&message).await {
        Ok(()) => {
            debug!(
                partition = message.partition,
                offset = message.offset,
                "committed message"
            );
            1
        }
        Err(err) => {
            error!(
                partition = message.partition,
                offset = message.offset,
                error = %err,
                "failed to commit message"
            );
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ack_channel, AckSender, LocalQueue};
    use tokio::time::{sleep, timeout, Duration};

    #[derive(Debug, Error)]
    #[error("refused offset {0}")]
    struct Refused(i64);

    /// Acks everything except the offsets in `hold` and `skip`, fails on `fail`.
    struct AckingProcessor {
        acks: AckSender,
        hold: Vec<i64>,
        skip: Vec<i64>,
        fail: Option<i64>,
    }

    #[async_trait]
    impl MessageProcessor for AckingProcessor {
        type Error = Refused;

        async fn process(&self, message: &Message) -> Result<(), Refused> {
            if self.fail == Some(message.offset) {
                return Err(Refused(message.offset));
            }
            if self.skip.contains(&message.offset) {
                self.acks.skip(message.clone()).await.map_err(|_| Refused(-1))?;
            } else if !self.hold.contains(&message.offset) {
                self.acks.ack(message.clone()).await.map_err(|_| Refused(-1))?;
            }
            Ok(())
        }
    }

    async fn queue_with(count: usize) -> Arc<LocalQueue> {
        let queue = LocalQueue::new();
        for i in 0..count {
            queue.push("k", format!("v{i}")).await.unwrap();
        }
        Arc::new(queue)
    }

    #[tokio::test]
    async fn commits_every_acknowledged_message() {
        let queue = queue_with(3).await;
        MessageSource::close(queue.as_ref()).await.unwrap();
        let (acks, rx) = ack_channel(8);
        let processor = AckingProcessor {
            acks,
            hold: vec![1],
            skip: Vec::new(),
            fail: None,
        };

        let reader = StreamReader::new(queue.clone());
        let processed = reader.consume(&processor, rx).await.unwrap();

        assert_eq!(processed, 3);
        assert_eq!(queue.committed_offsets(), vec![0, 2]);
    }

    #[tokio::test]
    async fn contiguous_ordering_holds_back_past_a_gap() {
        let queue = queue_with(4).await;
        MessageSource::close(queue.as_ref()).await.unwrap();
        let (acks, rx) = ack_channel(8);
        let processor = AckingProcessor {
            acks,
            hold: vec![2],
            skip: Vec::new(),
            fail: None,
        };

        let reader = StreamReader::new(queue.clone()).with_ordering(CommitOrdering::Contiguous);
        reader.consume(&processor, rx).await.unwrap();

        assert_eq!(queue.committed_offsets(), vec![0, 1]);
    }

    #[tokio::test]
    async fn skipped_messages_never_commit_but_do_not_block() {
        for (ordering, expected) in [
            (CommitOrdering::Immediate, vec![0, 2, 3]),
            (CommitOrdering::Contiguous, vec![0, 2, 3]),
        ] {
            let queue = queue_with(4).await;
            MessageSource::close(queue.as_ref()).await.unwrap();
            let (acks, rx) = ack_channel(8);
            let processor = AckingProcessor {
                acks,
                hold: Vec::new(),
                skip: vec![1],
                fail: None,
            };

            let reader = StreamReader::new(queue.clone()).with_ordering(ordering);
            reader.consume(&processor, rx).await.unwrap();

            assert_eq!(queue.committed_offsets(), expected, "{ordering:?}");
        }
    }

    #[tokio::test]
    async fn processing_error_stops_the_loop() {
        let queue = queue_with(3).await;
        let (acks, rx) = ack_channel(8);
        let processor = AckingProcessor {
            acks,
            hold: Vec::new(),
            skip: Vec::new(),
            fail: Some(1),
        };

        let reader = StreamReader::new(queue.clone());
        let err = reader.consume(&processor, rx).await.unwrap_err();

        assert!(matches!(err, ConsumeError::Process(Refused(1))));
        assert_eq!(queue.committed_offsets(), vec![0]);
        assert_eq!(queue.pending().await, 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_a_waiting_fetch() {
        let queue = queue_with(1).await;
        let (acks, rx) = ack_channel(8);
        let processor = AckingProcessor {
            acks,
            hold: Vec::new(),
            skip: Vec::new(),
            fail: None,
        };
        let reader = StreamReader::new(queue.clone());
        let token = reader.shutdown_token();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let processed = timeout(Duration::from_secs(2), reader.consume(&processor, rx))
            .await
            .expect("reader did not stop")
            .unwrap();
        assert_eq!(processed, 1);
        assert_eq!(queue.committed_offsets(), vec![0]);
    }

    #[tokio::test]
    async fn commit_loop_drains_queued_acks_on_shutdown() {
        let queue = queue_with(0).await;
        let (acks, rx) = ack_channel(8);
        for offset in 0..3 {
            acks.ack(Message::new("local", 0, offset)).await.unwrap();
        }
        let reader = StreamReader::new(queue.clone());
        let commits = reader.spawn_commit_loop(rx);

        assert_eq!(commits.shutdown().await, 3);
        assert_eq!(queue.committed_offsets(), vec![0, 1, 2]);
    }
}
