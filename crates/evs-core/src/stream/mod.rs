//! Message source and sink contracts, the acknowledgment channel and the
//! fetch/commit loops that connect them.

mod ack;
#[cfg(feature = "kafka")]
mod kafka;
mod local;
mod message;
mod reader;
mod source;
mod writer;

pub use ack::{
    ack_channel, Ack, AckReceiver, AckSender, CommitOrdering, OffsetTracker,
    DEFAULT_ACK_CHANNEL_BUFFER, DEFAULT_MAX_PENDING_OFFSETS,
};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaSink, KafkaSource};
pub use local::{LocalQueue, LOCAL_TOPIC};
pub use message::Message;
pub use reader::{CommitLoop, ConsumeError, MessageProcessor, StreamReader};
pub use source::{MessageSink, MessageSource, StreamError};
pub use writer::StreamWriter;
