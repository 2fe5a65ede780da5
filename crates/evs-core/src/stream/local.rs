use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{Message, MessageSink, MessageSource, StreamError};

pub const LOCAL_TOPIC: &str = "local";

/// In-memory message queue for single-process runs, replay and tests.
///
/// Messages land on partition 0 with increasing offsets. Commits are recorded
/// and can be inspected. After [`close`](MessageSource::close) the queued
/// messages are still delivered, then `fetch_next` reports
/// [`StreamError::Closed`].
#[derive(Clone)]
pub struct LocalQueue {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    topic: String,
    queue: Mutex<VecDeque<Message>>,
    committed: parking_lot::Mutex<Vec<Message>>,
    next_offset: AtomicI64,
    notify: Notify,
    closed: AtomicBool,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::with_topic(LOCAL_TOPIC)
    }

    pub fn with_topic(topic: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(LocalInner {
                topic: topic.into(),
                queue: Mutex::new(VecDeque::new()),
                committed: parking_lot::Mutex::new(Vec::new()),
                next_offset: AtomicI64::new(0),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Load newline-delimited messages from a file, skipping blank lines.
    ///
    /// The returned queue is already closed: it drains the file and ends.
    pub async fn replay_file(path: &Path) -> Result<Self, StreamError> {
        let content = tokio::fs::read_to_string(path).await?;
        let queue = Self::with_topic(path.display().to_string());
        for line in content.lines().filter(|line| !line.trim().is_empty()) {
            queue.push(Vec::new(), line.as_bytes().to_vec()).await?;
        }
        MessageSource::close(&queue).await?;
        Ok(queue)
    }

    /// Append a message and return its offset.
    pub async fn push(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Result<i64, StreamError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StreamError::Closed);
        }
        let offset = self.inner.next_offset.fetch_add(1, Ordering::SeqCst);
        let message = Message::new(self.inner.topic.clone(), 0, offset)
            .with_key(key)
            .with_value(value);
        self.inner.queue.lock().await.push_back(message);
        self.inner.notify.notify_one();
        Ok(offset)
    }

    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    /// Messages committed so far, in commit order.
    pub fn committed(&self) -> Vec<Message> {
        self.inner.committed.lock().clone()
    }

    pub fn committed_offsets(&self) -> Vec<i64> {
        self.inner.committed.lock().iter().map(|m| m.offset).collect()
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for LocalQueue {
    async fn fetch_next(&self) -> Result<Message, StreamError> {
        loop {
            if let Some(message) = self.inner.queue.lock().await.pop_front() {
                return Ok(message);
            }
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(StreamError::Closed);
            }
            // notify_one stores a permit, so a push between the checks is not lost
            self.inner.notify.notified().await;
        }
    }

    async fn commit(&self, message: &Message) -> Result<(), StreamError> {
        self.inner.committed.lock().push(message.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
        Ok(())
    }
}

#[async_trait]
impl MessageSink for LocalQueue {
    async fn write(&self, key: &[u8], value: &[u8]) -> Result<(), StreamError> {
        self.push(key.to_vec(), value.to_vec()).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), StreamError> {
        MessageSource::close(self).await
    }
}
