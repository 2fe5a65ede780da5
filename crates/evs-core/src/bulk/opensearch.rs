use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use super::{BulkCounters, BulkError, BulkIndexer, BulkItem, BulkStats};
use crate::config::{
    OpenSearchConfig, DEFAULT_BULK_CHANNEL_BUFFER, DEFAULT_BULK_FLUSH_BYTES,
    DEFAULT_BULK_FLUSH_INTERVAL, DEFAULT_BULK_TIMEOUT,
};

#[derive(Debug, Clone, PartialEq)]
pub struct BulkConfig {
    pub address: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub flush_bytes: usize,
    pub flush_interval: Duration,
    pub timeout: Duration,
    pub insecure_skip_verify: bool,
    pub channel_buffer: usize,
}

impl BulkConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            username: None,
            password: None,
            flush_bytes: DEFAULT_BULK_FLUSH_BYTES,
            flush_interval: DEFAULT_BULK_FLUSH_INTERVAL,
            timeout: DEFAULT_BULK_TIMEOUT,
            insecure_skip_verify: false,
            channel_buffer: DEFAULT_BULK_CHANNEL_BUFFER,
        }
    }

    pub fn from_config(search: &OpenSearchConfig, channel_buffer: usize) -> Self {
        Self {
            address: search.address.clone(),
            username: search.username.clone(),
            password: search.password.clone(),
            flush_bytes: search.bulk_flush_bytes,
            flush_interval: search.bulk_flush_interval,
            timeout: search.bulk_timeout,
            insecure_skip_verify: search.ssl_insecure_skip_verify,
            channel_buffer,
        }
    }
}

enum Command {
    Add(BulkItem),
    Close(oneshot::Sender<()>),
}

/// [`BulkIndexer`] posting NDJSON batches to an OpenSearch `_bulk` endpoint.
pub struct OpenSearchBulkIndexer {
    tx: mpsc::Sender<Command>,
    counters: Arc<BulkCounters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OpenSearchBulkIndexer {
    /// Build the HTTP client and start the flush worker. Needs a tokio runtime.
    pub fn new(config: BulkConfig) -> Result<Self, BulkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()
            .map_err(|err| BulkError::Request(err.to_string()))?;
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        let counters = Arc::new(BulkCounters::default());
        let worker = Worker {
            endpoint: format!("{}/_bulk", config.address.trim_end_matches('/')),
            client,
            config,
            counters: counters.clone(),
            pending: Vec::new(),
            body: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(rx));
        Ok(Self {
            tx,
            counters,
            worker: Mutex::new(Some(handle)),
        })
    }
}

#[async_trait]
impl BulkIndexer for OpenSearchBulkIndexer {
    async fn add(&self, item: BulkItem) -> Result<(), BulkError> {
        self.tx
            .send(Command::Add(item))
            .await
            .map_err(|_| BulkError::Closed)?;
        BulkCounters::bump(&self.counters.added, 1);
        Ok(())
    }

    async fn close(&self) -> Result<(), BulkError> {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Close(done_tx)).await.is_err() {
            return Ok(());
        }
        let _ = done_rx.await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!(error = %err, "bulk worker terminated abnormally");
            }
        }
        Ok(())
    }

    fn stats(&self) -> BulkStats {
        self.counters.snapshot()
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, ItemResult>>,
}

#[derive(Debug, Deserialize)]
struct ItemResult {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

struct Worker {
    endpoint: String,
    client: reqwest::Client,
    config: BulkConfig,
    counters: Arc<BulkCounters>,
    pending: Vec<BulkItem>,
    body: Vec<u8>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let period = self.config.flush_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Add(item)) => {
                        self.buffer(item);
                        if self.body.len() >= self.config.flush_bytes {
                            self.flush().await;
                        }
                    }
                    Some(Command::Close(done)) => {
                        self.flush().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.flush().await,
            }
        }
        debug!("bulk worker stopped");
    }

    fn buffer(&mut self, item: BulkItem) {
        let action = json!({"index": {"_index": item.index, "_id": item.document_id}});
        self.body.extend_from_slice(action.to_string().as_bytes());
        self.body.push(b'\n');
        self.body.extend_from_slice(&item.body);
        self.body.push(b'\n');
        self.pending.push(item);
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.pending);
        let body = std::mem::take(&mut self.body);
        BulkCounters::bump(&self.counters.flushed, items.len() as u64);
        BulkCounters::bump(&self.counters.requests, 1);
        debug!(items = items.len(), bytes = body.len(), "flushing bulk request");

        let results = match self.send(body).await {
            Ok(results) => results,
            Err(err) => {
                warn!(items = items.len(), error = %err, "bulk request failed");
                BulkCounters::bump(&self.counters.failed, items.len() as u64);
                for item in items {
                    item.fail(err.clone()).await;
                }
                return;
            }
        };

        let mut results = results.into_iter();
        for item in items {
            let result = results.next().and_then(|entry| entry.into_values().next());
            match result {
                Some(result) if (200..300).contains(&result.status) => {
                    BulkCounters::bump(&self.counters.indexed, 1);
                    item.succeed().await;
                }
                Some(result) => {
                    BulkCounters::bump(&self.counters.failed, 1);
                    let reason = result.error.map(|e| e.to_string()).unwrap_or_default();
                    warn!(
                        index = %item.index,
                        document_id = %item.document_id,
                        status = result.status,
                        %reason,
                        "document rejected"
                    );
                    item.fail(BulkError::Rejected {
                        status: result.status,
                        reason,
                    })
                    .await;
                }
                None => {
                    BulkCounters::bump(&self.counters.failed, 1);
                    item.fail(BulkError::Response("no result for document".into()))
                        .await;
                }
            }
        }
    }

    async fn send(&self, body: Vec<u8>) -> Result<Vec<HashMap<String, ItemResult>>, BulkError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }
        let response = request
            .send()
            .await
            .map_err(|err| BulkError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BulkError::Request(format!("status {status}: {text}")));
        }
        let parsed: BulkResponse = response
            .json()
            .await
            .map_err(|err| BulkError::Response(err.to_string()))?;
        Ok(parsed.items)
    }
}
