use thiserror::Error;

/// An event that can never be processed, however many times it is redelivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed event: {reason}")]
pub struct MalformedEvent {
    pub reason: String,
}

impl MalformedEvent {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn missing_field(key: &str) -> Self {
        Self::new(format!("payload has no string field {key:?}"))
    }
}
