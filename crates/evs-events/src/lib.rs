//! Wire and document types shared by the event-stream consumer.

mod enriched;
mod error;
mod event;
pub mod kind;

pub use enriched::{EmbeddedEvent, EnrichedEvent, HostsSummary, InfraEnvStats, SUMMARY_STATS};
pub use error::MalformedEvent;
pub use event::{Event, EventEnvelope};
pub use kind::EventKind;
