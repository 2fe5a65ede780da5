//! Asynchronous batched document writes with per-item callbacks.

mod opensearch;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use thiserror::Error;

pub use opensearch::{BulkConfig, OpenSearchBulkIndexer};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BulkError {
    #[error("bulk indexer is closed")]
    Closed,
    #[error("bulk request failed: {0}")]
    Request(String),
    #[error("document rejected with status {status}: {reason}")]
    Rejected { status: u16, reason: String },
    #[error("unexpected bulk response: {0}")]
    Response(String),
}

// the indexer worker holds buffered items across awaits
type SuccessCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;
type FailureCallback = Box<dyn FnOnce(BulkError) -> BoxFuture<'static, ()> + Send + Sync>;

/// One document to index, with the callbacks run once its fate is known.
pub struct BulkItem {
    pub index: String,
    pub document_id: String,
    pub body: Vec<u8>,
    on_success: Option<SuccessCallback>,
    on_failure: Option<FailureCallback>,
}

impl BulkItem {
    pub fn new(index: impl Into<String>, document_id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            index: index.into(),
            document_id: document_id.into(),
            body,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_success<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_success = Some(Box::new(move || callback().boxed()));
        self
    }

    pub fn on_failure<F, Fut>(mut self, callback: F) -> Self
    where
        F: FnOnce(BulkError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_failure = Some(Box::new(move |err| callback(err).boxed()));
        self
    }

    /// Run the success callback, if any.
    pub async fn succeed(mut self) {
        if let Some(callback) = self.on_success.take() {
            callback().await;
        }
    }

    /// Run the failure callback, if any.
    pub async fn fail(mut self, err: BulkError) {
        if let Some(callback) = self.on_failure.take() {
            callback(err).await;
        }
    }
}

impl fmt::Debug for BulkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkItem")
            .field("index", &self.index)
            .field("document_id", &self.document_id)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Counters since the indexer started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkStats {
    pub added: u64,
    pub flushed: u64,
    pub indexed: u64,
    pub failed: u64,
    pub requests: u64,
}

#[derive(Debug, Default)]
pub(crate) struct BulkCounters {
    added: AtomicU64,
    flushed: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    requests: AtomicU64,
}

impl BulkCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BulkStats {
        BulkStats {
            added: self.added.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Queue-and-flush document sink.
///
/// `add` only enqueues; the item's callbacks run later on the indexer's own
/// task. `close` flushes whatever is buffered and waits for those callbacks.
#[async_trait]
pub trait BulkIndexer: Send + Sync {
    async fn add(&self, item: BulkItem) -> Result<(), BulkError>;
    async fn close(&self) -> Result<(), BulkError>;
    fn stats(&self) -> BulkStats;
}

#[async_trait]
impl<T: BulkIndexer + ?Sized> BulkIndexer for std::sync::Arc<T> {
    async fn add(&self, item: BulkItem) -> Result<(), BulkError> {
        (**self).add(item).await
    }

    async fn close(&self) -> Result<(), BulkError> {
        (**self).close().await
    }

    fn stats(&self) -> BulkStats {
        (**self).stats()
    }
}
