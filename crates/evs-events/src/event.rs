use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::MalformedEvent;
use crate::kind::EventKind;

/// Wire envelope: `{"name": ..., "payload": ..., "metadata": {...}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn kind(&self) -> Option<EventKind> {
        EventKind::from_name(&self.name)
    }

    /// String field of an object payload; anything else marks the event malformed.
    pub fn payload_str(&self, key: &str) -> Result<&str, MalformedEvent> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| MalformedEvent::missing_field(key))
    }

    /// Component versions from the metadata.
    ///
    /// Some producers nest the map twice (`{"versions": {"versions": {...}}}`);
    /// one level is unwrapped in that case.
    pub fn versions(&self) -> Option<Map<String, Value>> {
        let versions = self.metadata.get("versions")?.as_object()?;
        if versions.len() == 1 {
            if let Some(Value::Object(inner)) = versions.get("versions") {
                return Some(inner.clone());
            }
        }
        Some(versions.clone())
    }

    pub fn release_tag(&self) -> Option<String> {
        self.metadata
            .get("release_tag")
            .and_then(Value::as_str)
            .map(str::to_owned)
    }
}

/// An event together with the message key it is published under.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub key: Vec<u8>,
    pub event: Event,
}

impl EventEnvelope {
    pub fn new(key: impl Into<Vec<u8>>, event: Event) -> Self {
        Self {
            key: key.into(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_envelope_without_metadata() {
        let event = Event::from_slice(br#"{"name":"Event","payload":{"cluster_id":"c1"}}"#)
            .unwrap();
        assert_eq!(event.kind(), Some(EventKind::Activity));
        assert!(event.metadata.is_empty());
        assert_eq!(event.payload_str("cluster_id").unwrap(), "c1");

        let event = Event::from_slice(br#"{"name":"Event","payload":{},"metadata":null}"#).unwrap();
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn rejects_undecodable_bodies() {
        assert!(Event::from_slice(b"{not json").is_err());
        assert!(Event::from_slice(br#"{"payload":{}}"#).is_err());
        assert!(Event::from_slice(br#"{"name":"Event","metadata":"x"}"#).is_err());
    }

    #[test]
    fn payload_str_requires_string_field() {
        let event = Event::new("HostState", json!({"id": 7, "cluster_id": "c"}));
        assert_eq!(
            event.payload_str("id"),
            Err(MalformedEvent::missing_field("id"))
        );
        assert!(Event::new("HostState", json!("scalar"))
            .payload_str("id")
            .is_err());
    }

    #[test]
    fn versions_unwraps_double_nesting() {
        let flat = json!({"versions": {"assisted-installer": "v1"}, "release_tag": "v2.1"});
        let event = Event::new("Event", json!({})).with_metadata(flat.as_object().unwrap().clone());
        assert_eq!(event.versions().unwrap()["assisted-installer"], "v1");
        assert_eq!(event.release_tag().as_deref(), Some("v2.1"));

        let nested = json!({"versions": {"versions": {"assisted-service": "v3"}}});
        let event =
            Event::new("Event", json!({})).with_metadata(nested.as_object().unwrap().clone());
        assert_eq!(event.versions().unwrap()["assisted-service"], "v3");
        assert_eq!(event.release_tag(), None);

        assert_eq!(Event::new("Event", json!({})).versions(), None);
    }
}
