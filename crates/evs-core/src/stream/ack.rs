use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use super::{Message, StreamError};

pub const DEFAULT_ACK_CHANNEL_BUFFER: usize = 1000;
pub const DEFAULT_MAX_PENDING_OFFSETS: usize = 100_000;

/// What the processing side decided about a fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Handled; the offset may be committed.
    Done(Message),
    /// Deliberately dropped without storing. Not committed on its own, but it
    /// no longer holds back later offsets of its partition.
    Skipped(Message),
}

impl Ack {
    pub fn message(&self) -> &Message {
        match self {
            Self::Done(message) | Self::Skipped(message) => message,
        }
    }
}

/// Producer side of the acknowledgment channel.
///
/// Cloned into every place that can declare a message done: the projection
/// for snapshot updates, poison messages and filtered activity, and the bulk
/// sink callbacks for stored activity.
#[derive(Debug, Clone)]
pub struct AckSender {
    tx: mpsc::Sender<Ack>,
}

impl AckSender {
    /// Queue `message` for commit, waiting while the channel is full.
    pub async fn ack(&self, message: Message) -> Result<(), StreamError> {
        self.send(Ack::Done(message)).await
    }

    /// Report `message` as intentionally dropped.
    pub async fn skip(&self, message: Message) -> Result<(), StreamError> {
        self.send(Ack::Skipped(message)).await
    }

    async fn send(&self, ack: Ack) -> Result<(), StreamError> {
        self.tx
            .send(ack)
            .await
            .map_err(|_| StreamError::AckChannelClosed)
    }
}

#[derive(Debug)]
pub struct AckReceiver {
    rx: mpsc::Receiver<Ack>,
}

impl AckReceiver {
    pub async fn recv(&mut self) -> Option<Ack> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Ack> {
        self.rx.try_recv().ok()
    }
}

pub fn ack_channel(capacity: usize) -> (AckSender, AckReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AckSender { tx }, AckReceiver { rx })
}

/// How acknowledged messages turn into commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOrdering {
    /// Commit every acknowledged message as it arrives.
    #[default]
    Immediate,
    /// Commit only the highest offset whose predecessors on the same
    /// partition are all acknowledged.
    Contiguous,
}

impl FromStr for CommitOrdering {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "contiguous" => Ok(Self::Contiguous),
            _ => Err(()),
        }
    }
}

#[derive(Debug)]
enum Slot {
    InFlight,
    Done(Message),
    Skipped,
}

/// Per-partition bookkeeping for [`CommitOrdering::Contiguous`].
///
/// A partition keeps at most `limit` offsets. Past that, the oldest offset
/// still in flight is given up on so one lost acknowledgment cannot stall
/// the partition forever.
#[derive(Debug)]
pub struct OffsetTracker {
    // (topic, partition) -> offset -> state, ordered by offset
    partitions: Mutex<HashMap<(String, i32), BTreeMap<i64, Slot>>>,
    limit: usize,
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_PENDING_OFFSETS)
    }
}

impl OffsetTracker {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            limit: limit.max(1),
        }
    }

    /// Record a fetched message as in flight.
    pub fn track(&self, message: &Message) {
        self.partitions
            .lock()
            .entry((message.topic.clone(), message.partition))
            .or_default()
            .insert(message.offset, Slot::InFlight);
    }

    /// Mark `message` acknowledged and return the message to commit, if the
    /// settled prefix of its partition moved past an acknowledged offset.
    pub fn acknowledge(&self, message: Message) -> Option<Message> {
        // only the position is needed to commit
        let position = Message::new(message.topic, message.partition, message.offset);
        self.settle(
            position.topic.clone(),
            position.partition,
            position.offset,
            Slot::Done(position),
        )
    }

    /// Mark `message` as dropped on purpose. Returns a later acknowledged
    /// message that became committable, never `message` itself.
    pub fn skip(&self, message: &Message) -> Option<Message> {
        self.settle(
            message.topic.clone(),
            message.partition,
            message.offset,
            Slot::Skipped,
        )
    }

    /// Offsets fetched but not yet committable, across all partitions.
    pub fn in_flight(&self) -> usize {
        self.partitions.lock().values().map(BTreeMap::len).sum()
    }

    fn settle(&self, topic: String, partition: i32, offset: i64, slot: Slot) -> Option<Message> {
        let mut partitions = self.partitions.lock();
        let pending = partitions.entry((topic, partition)).or_default();
        pending.insert(offset, slot);

        let mut ready = advance(pending);
        while pending.len() > self.limit {
            // advance stopped at an in-flight offset
            let Some((abandoned, _)) = pending.pop_first() else {
                break;
            };
            warn!(
                partition,
                offset = abandoned,
                limit = self.limit,
                "offset never acknowledged, no longer holding back commits"
            );
            if let Some(next) = advance(pending) {
                ready = Some(next);
            }
        }
        ready
    }
}

/// Drop the settled prefix and return its highest acknowledged message.
fn advance(pending: &mut BTreeMap<i64, Slot>) -> Option<Message> {
    let mut ready = None;
    while let Some(entry) = pending.first_entry() {
        if matches!(entry.get(), Slot::InFlight) {
            break;
        }
        if let Slot::Done(message) = entry.remove() {
            ready = Some(message);
        }
    }
    ready
}
