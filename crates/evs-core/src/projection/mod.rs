//! Routing of decoded events: state events update snapshots, activity events
//! are enriched and stored.

pub mod process;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use evs_events::{Event, EventKind, MalformedEvent};
use evs_snapshots::{Snapshot, SnapshotError, SnapshotRepository};
use thiserror::Error;
use tracing::{debug, warn};

use crate::repository::{EnrichedEventRepository, RepositoryError};
use crate::stream::{AckSender, Message, MessageProcessor, StreamError};

pub use process::{Enricher, EventEnricher, TransformRules};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error(transparent)]
    Malformed(#[from] MalformedEvent),
    #[error("unknown event name {name:?}")]
    UnknownEvent { name: String },
    #[error("snapshot update failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("failed to store enriched event: {0}")]
    Store(#[from] RepositoryError),
    #[error("failed to acknowledge message: {0}")]
    Ack(#[from] StreamError),
}

impl ProjectionError {
    /// Errors that redelivery cannot fix; the message is acknowledged and dropped.
    pub fn is_poison(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

pub struct Projection {
    snapshots: Arc<dyn SnapshotRepository>,
    enricher: Arc<dyn EventEnricher>,
    events: Arc<dyn EnrichedEventRepository>,
    acks: AckSender,
    excluded_user_names: HashSet<String>,
}

impl Projection {
    pub fn new(
        snapshots: Arc<dyn SnapshotRepository>,
        enricher: Arc<dyn EventEnricher>,
        events: Arc<dyn EnrichedEventRepository>,
        acks: AckSender,
    ) -> Self {
        Self {
            snapshots,
            enricher,
            events,
            acks,
            excluded_user_names: HashSet::new(),
        }
    }

    /// Activity of clusters owned by these users is neither enriched nor stored.
    pub fn with_excluded_user_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_user_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Decode and route one message. Undecodable messages are acknowledged
    /// and dropped.
    pub async fn process_message(&self, message: &Message) -> Result<(), ProjectionError> {
        let event = match Event::from_slice(&message.value) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    error = %err,
                    "could not decode event, discarding message"
                );
                self.acks.ack(message.clone()).await?;
                return Ok(());
            }
        };
        self.process_event(&event, message).await
    }

    pub async fn process_event(&self, event: &Event, message: &Message) -> Result<(), ProjectionError> {
        debug!(name = %event.name, offset = message.offset, "processing event");
        let Some(kind) = event.kind() else {
            return Err(ProjectionError::UnknownEvent {
                name: event.name.clone(),
            });
        };
        let routed = match kind {
            EventKind::Activity => self.process_activity(event, message).await,
            EventKind::ClusterState => self.process_cluster_state(event).await,
            EventKind::HostState => self.process_host_state(event).await,
            EventKind::InfraEnvState => self.process_infra_env_state(event).await,
        };
        match routed {
            Ok(()) => {
                if kind.is_state() {
                    self.acks.ack(message.clone()).await?;
                }
                Ok(())
            }
            Err(err) if err.is_poison() => {
                warn!(
                    name = %event.name,
                    offset = message.offset,
                    error = %err,
                    "malformed event discarded"
                );
                self.acks.ack(message.clone()).await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Flush enriched events still waiting to be stored.
    pub async fn close(&self) -> Result<(), ProjectionError> {
        self.events.close().await?;
        Ok(())
    }

    async fn process_activity(&self, event: &Event, message: &Message) -> Result<(), ProjectionError> {
        let cluster_id = event.payload_str("cluster_id")?;
        debug!(cluster_id, "processing activity event");

        let cluster = self
            .snapshots
            .get_cluster(cluster_id)
            .await
            .unwrap_or_else(|err| {
                warn!(cluster_id, error = %err, "could not retrieve cluster");
                Snapshot::new()
            });
        if self.is_excluded(&cluster) {
            debug!(cluster_id, "skipping activity of excluded user");
            self.acks.skip(message.clone()).await?;
            return Ok(());
        }
        let hosts = self.snapshots.get_hosts(cluster_id).await.unwrap_or_else(|err| {
            warn!(cluster_id, error = %err, "could not retrieve hosts");
            Vec::new()
        });
        let infra_envs = self
            .snapshots
            .get_infra_envs(cluster_id)
            .await
            .unwrap_or_else(|err| {
                warn!(cluster_id, error = %err, "could not retrieve infra-envs");
                Vec::new()
            });

        let enriched = self.enricher.enrich(event, cluster, hosts, infra_envs);
        if let Err(err) = self.events.store(&enriched, message.clone()).await {
            warn!(cluster_id, document_id = %enriched.id, error = %err, "failed to store enriched event");
            return Err(err.into());
        }
        Ok(())
    }

    async fn process_cluster_state(&self, event: &Event) -> Result<(), ProjectionError> {
        let cluster_id = event.payload_str("id")?;
        debug!(cluster_id, "processing cluster state");
        self.snapshots.set_cluster(cluster_id, event).await?;
        Ok(())
    }

    async fn process_host_state(&self, event: &Event) -> Result<(), ProjectionError> {
        let host_id = event.payload_str("id")?;
        let cluster_id = event.payload_str("cluster_id")?;
        debug!(host_id, cluster_id, "processing host state");
        self.snapshots.set_host(cluster_id, host_id, event).await?;
        Ok(())
    }

    async fn process_infra_env_state(&self, event: &Event) -> Result<(), ProjectionError> {
        let infra_env_id = event.payload_str("id")?;
        let cluster_id = event.payload_str("cluster_id")?;
        debug!(infra_env_id, cluster_id, "processing infra-env state");
        self.snapshots
            .set_infra_env(cluster_id, infra_env_id, event)
            .await?;
        Ok(())
    }

    fn is_excluded(&self, cluster: &Snapshot) -> bool {
        cluster
            .get("user_name")
            .and_then(|name| name.as_str())
            .is_some_and(|name| self.excluded_user_names.contains(name))
    }
}

#[async_trait]
impl MessageProcessor for Projection {
    type Error = ProjectionError;

    async fn process(&self, message: &Message) -> Result<(), ProjectionError> {
        self.process_message(message).await
    }
}
