use evs_events::EventEnvelope;

use super::{MessageSink, StreamError};

/// Publishes event envelopes as JSON under their key.
pub struct StreamWriter<S> {
    sink: S,
}

impl<S: MessageSink> StreamWriter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub async fn write(&self, envelope: &EventEnvelope) -> Result<(), StreamError> {
        let value = serde_json::to_vec(&envelope.event)?;
        self.sink.write(&envelope.key, &value).await
    }

    pub async fn close(&self) -> Result<(), StreamError> {
        self.sink.close().await
    }
}
