//! Event stream projection: consumes cluster lifecycle events, keeps entity
//! snapshots current, and stores enriched activity documents with
//! at-least-once acknowledgment.
//!
//! A message travels source -> [`projection::Projection`] -> snapshot store
//! (state events, acknowledged right away) or enricher -> repository -> bulk
//! indexer (activity events, acknowledged from the indexer's success
//! callback). [`stream::StreamReader`] drives the fetch loop and commits
//! acknowledged offsets on a background task.

pub mod bulk;
pub mod config;
pub mod projection;
pub mod repository;
pub mod stream;
pub mod util;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{Config, ConfigError};
pub use projection::{Enricher, EventEnricher, Projection, ProjectionError, TransformRules};
