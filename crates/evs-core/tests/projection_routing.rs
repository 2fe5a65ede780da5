use std::sync::Arc;

use async_trait::async_trait;
use evs_core::bulk::{BulkError, BulkIndexer, BulkItem, BulkStats};
use evs_core::projection::{Enricher, EventEnricher, Projection, ProjectionError};
use evs_core::repository::BulkEnrichedEventRepository;
use evs_core::stream::{ack_channel, Ack, AckReceiver, Message};
use evs_events::{EnrichedEvent, Event};
use evs_snapshots::{
    MemorySnapshotRepository, Snapshot, SnapshotError, SnapshotRepository,
    DEFAULT_SNAPSHOT_EXPIRATION,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Snapshot store that logs every call and can be told to fail.
struct RecordingSnapshots {
    inner: MemorySnapshotRepository,
    calls: Mutex<Vec<String>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl RecordingSnapshots {
    fn new() -> Self {
        Self {
            inner: MemorySnapshotRepository::in_memory(DEFAULT_SNAPSHOT_EXPIRATION),
            calls: Mutex::new(Vec::new()),
            fail_reads: false,
            fail_writes: false,
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn writes(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.starts_with("set_"))
            .cloned()
            .collect()
    }

    fn write_result(&self) -> Result<(), SnapshotError> {
        if self.fail_writes {
            Err(SnapshotError::Join("snapshot store unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn read_result(&self) -> Result<(), SnapshotError> {
        if self.fail_reads {
            Err(SnapshotError::Join("snapshot store unreachable".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SnapshotRepository for RecordingSnapshots {
    async fn set_cluster(&self, cluster_id: &str, event: &Event) -> Result<(), SnapshotError> {
        self.record(format!("set_cluster {cluster_id}"));
        self.write_result()?;
        self.inner.set_cluster(cluster_id, event).await
    }

    async fn set_host(
        &self,
        cluster_id: &str,
        host_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError> {
        self.record(format!("set_host {cluster_id} {host_id}"));
        self.write_result()?;
        self.inner.set_host(cluster_id, host_id, event).await
    }

    async fn set_infra_env(
        &self,
        cluster_id: &str,
        infra_env_id: &str,
        event: &Event,
    ) -> Result<(), SnapshotError> {
        self.record(format!("set_infra_env {cluster_id} {infra_env_id}"));
        self.write_result()?;
        self.inner.set_infra_env(cluster_id, infra_env_id, event).await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Snapshot, SnapshotError> {
        self.record(format!("get_cluster {cluster_id}"));
        self.read_result()?;
        self.inner.get_cluster(cluster_id).await
    }

    async fn get_hosts(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        self.record(format!("get_hosts {cluster_id}"));
        self.read_result()?;
        self.inner.get_hosts(cluster_id).await
    }

    async fn get_infra_envs(&self, cluster_id: &str) -> Result<Vec<Snapshot>, SnapshotError> {
        self.record(format!("get_infra_envs {cluster_id}"));
        self.read_result()?;
        self.inner.get_infra_envs(cluster_id).await
    }
}

/// Remembers what it was asked to enrich, then delegates.
#[derive(Default)]
struct RecordingEnricher {
    inner: Enricher,
    seen: Mutex<Vec<(Snapshot, usize, usize)>>,
}

impl EventEnricher for RecordingEnricher {
    fn enrich(
        &self,
        event: &Event,
        cluster: Snapshot,
        hosts: Vec<Snapshot>,
        infra_envs: Vec<Snapshot>,
    ) -> EnrichedEvent {
        self.seen
            .lock()
            .push((cluster.clone(), hosts.len(), infra_envs.len()));
        self.inner.enrich(event, cluster, hosts, infra_envs)
    }
}

/// Holds bulk items until the test settles them.
#[derive(Default)]
struct HeldIndexer {
    items: Mutex<Vec<BulkItem>>,
}

#[async_trait]
impl BulkIndexer for HeldIndexer {
    async fn add(&self, item: BulkItem) -> Result<(), BulkError> {
        self.items.lock().push(item);
        Ok(())
    }

    async fn close(&self) -> Result<(), BulkError> {
        Ok(())
    }

    fn stats(&self) -> BulkStats {
        BulkStats::default()
    }
}

struct Harness {
    projection: Projection,
    snapshots: Arc<RecordingSnapshots>,
    enricher: Arc<RecordingEnricher>,
    indexer: Arc<HeldIndexer>,
    acks: AckReceiver,
}

fn harness_with(snapshots: RecordingSnapshots) -> Harness {
    let (ack_tx, acks) = ack_channel(16);
    let snapshots = Arc::new(snapshots);
    let enricher = Arc::new(RecordingEnricher::default());
    let indexer = Arc::new(HeldIndexer::default());
    let repository = BulkEnrichedEventRepository::new(indexer.clone(), "events-", ack_tx.clone());
    let projection = Projection::new(
        snapshots.clone(),
        enricher.clone(),
        Arc::new(repository),
        ack_tx,
    )
    .with_excluded_user_names(["svc-bot"]);
    Harness {
        projection,
        snapshots,
        enricher,
        indexer,
        acks,
    }
}

fn harness() -> Harness {
    harness_with(RecordingSnapshots::new())
}

fn message(offset: i64, value: Value) -> Message {
    Message::new("events", 0, offset).with_value(value.to_string())
}

/// Queued acknowledgments as (committable, skipped) offsets.
fn settled(acks: &mut AckReceiver) -> (Vec<i64>, Vec<i64>) {
    let (mut done, mut skipped) = (Vec::new(), Vec::new());
    while let Some(ack) = acks.try_recv() {
        match ack {
            Ack::Done(message) => done.push(message.offset),
            Ack::Skipped(message) => skipped.push(message.offset),
        }
    }
    (done, skipped)
}

fn drain(acks: &mut AckReceiver) -> Vec<i64> {
    let (done, skipped) = settled(acks);
    assert!(skipped.is_empty(), "unexpected skips {skipped:?}");
    done
}

#[tokio::test]
async fn cluster_state_updates_snapshot_and_acks_immediately() {
    let mut h = harness();
    let msg = message(1, json!({"name": "ClusterState", "payload": {"id": "X", "name": "prod"}}));

    h.projection.process_message(&msg).await.unwrap();

    assert_eq!(h.snapshots.writes(), vec!["set_cluster X".to_string()]);
    assert_eq!(drain(&mut h.acks), vec![1]);
    assert!(h.enricher.seen.lock().is_empty());
    let stored = h.snapshots.inner.get_cluster("X").await.unwrap();
    assert_eq!(stored["name"], "prod");
}

#[tokio::test]
async fn host_and_infra_env_states_are_grouped_by_cluster() {
    let mut h = harness();
    h.projection
        .process_message(&message(
            1,
            json!({"name": "HostState", "payload": {"id": "h1", "cluster_id": "X"}}),
        ))
        .await
        .unwrap();
    h.projection
        .process_message(&message(
            2,
            json!({"name": "InfraEnv", "payload": {"id": "i1", "cluster_id": "X"}}),
        ))
        .await
        .unwrap();

    assert_eq!(
        h.snapshots.writes(),
        vec!["set_host X h1".to_string(), "set_infra_env X i1".to_string()]
    );
    assert_eq!(drain(&mut h.acks), vec![1, 2]);
}

#[tokio::test]
async fn activity_is_acked_only_after_the_store_confirms() {
    let mut h = harness();
    for (offset, value) in [
        (1, json!({"name": "ClusterState", "payload": {"id": "X", "user_name": "alice"}})),
        (2, json!({"name": "HostState", "payload": {"id": "h1", "cluster_id": "X", "infra_env_id": "i1"}})),
        (3, json!({"name": "InfraEnv", "payload": {"id": "i1", "cluster_id": "X", "cpu_architecture": "x86_64"}})),
    ] {
        h.projection.process_message(&message(offset, value)).await.unwrap();
    }
    assert_eq!(drain(&mut h.acks), vec![1, 2, 3]);

    let activity = message(
        4,
        json!({"name": "Event", "payload": {"cluster_id": "X", "message": "m", "event_time": "t"}}),
    );
    h.projection.process_message(&activity).await.unwrap();

    let seen = h.enricher.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0["user_name"], "alice");
    assert_eq!((seen[0].1, seen[0].2), (1, 1));

    let mut items = std::mem::take(&mut *h.indexer.items.lock());
    assert_eq!(items.len(), 1);
    assert!(drain(&mut h.acks).is_empty());

    let item = items.remove(0);
    assert_eq!(item.document_id, "9af4c9dc-79de-5246-b297-d7bba03d38ad");
    let doc: EnrichedEvent = serde_json::from_slice(&item.body).unwrap();
    assert_eq!(doc.cluster_id, "X");
    assert_eq!(doc.cluster["hosts"][0]["infra_env"]["cpu_architecture"], "x86_64");
    item.succeed().await;
    assert_eq!(drain(&mut h.acks), vec![4]);
}

#[tokio::test]
async fn failed_store_write_is_never_acked() {
    let mut h = harness();
    let activity = message(
        7,
        json!({"name": "Event", "payload": {"cluster_id": "X", "message": "m", "event_time": "t"}}),
    );
    h.projection.process_message(&activity).await.unwrap();

    let items = std::mem::take(&mut *h.indexer.items.lock());
    for item in items {
        item.fail(BulkError::Request("connection reset".into())).await;
    }
    assert!(drain(&mut h.acks).is_empty());
}

#[tokio::test]
async fn unparseable_body_is_acked_and_dropped() {
    let mut h = harness();
    let garbage = Message::new("events", 0, 9).with_value("{not json");

    h.projection.process_message(&garbage).await.unwrap();

    assert_eq!(drain(&mut h.acks), vec![9]);
    assert!(h.snapshots.calls.lock().is_empty());
    assert!(h.indexer.items.lock().is_empty());
}

#[tokio::test]
async fn excluded_user_activity_is_skipped_not_acked() {
    let mut h = harness();
    h.projection
        .process_message(&message(
            1,
            json!({"name": "ClusterState", "payload": {"id": "X", "user_name": "svc-bot"}}),
        ))
        .await
        .unwrap();
    drain(&mut h.acks);

    h.projection
        .process_message(&message(
            2,
            json!({"name": "Event", "payload": {"cluster_id": "X", "message": "m", "event_time": "t"}}),
        ))
        .await
        .unwrap();

    assert!(h.enricher.seen.lock().is_empty());
    assert!(h.indexer.items.lock().is_empty());
    assert_eq!(settled(&mut h.acks), (Vec::new(), vec![2]));
}

#[tokio::test]
async fn unknown_event_name_is_fatal() {
    let mut h = harness();
    let err = h
        .projection
        .process_message(&message(3, json!({"name": "ClusterDeleted", "payload": {"id": "X"}})))
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectionError::UnknownEvent { ref name } if name == "ClusterDeleted"));
    assert!(drain(&mut h.acks).is_empty());
}

#[tokio::test]
async fn missing_correlation_field_is_poison() {
    let mut h = harness();
    h.projection
        .process_message(&message(5, json!({"name": "Event", "payload": {"message": "m"}})))
        .await
        .unwrap();
    h.projection
        .process_message(&message(6, json!({"name": "HostState", "payload": {"id": "h1"}})))
        .await
        .unwrap();

    assert_eq!(drain(&mut h.acks), vec![5, 6]);
    assert!(h.snapshots.writes().is_empty());
    assert!(h.indexer.items.lock().is_empty());
}

#[tokio::test]
async fn snapshot_read_failure_enriches_with_empty_state() {
    let mut snapshots = RecordingSnapshots::new();
    snapshots.fail_reads = true;
    let h = harness_with(snapshots);

    h.projection
        .process_message(&message(
            1,
            json!({"name": "Event", "payload": {"cluster_id": "X", "message": "m", "event_time": "t"}}),
        ))
        .await
        .unwrap();

    let seen = h.enricher.seen.lock().clone();
    assert_eq!(seen, vec![(Snapshot::new(), 0, 0)]);
    assert_eq!(h.indexer.items.lock().len(), 1);
}

#[tokio::test]
async fn snapshot_write_failure_stops_without_ack() {
    let mut snapshots = RecordingSnapshots::new();
    snapshots.fail_writes = true;
    let mut h = harness_with(snapshots);

    let err = h
        .projection
        .process_message(&message(1, json!({"name": "ClusterState", "payload": {"id": "X"}})))
        .await
        .unwrap_err();

    assert!(matches!(err, ProjectionError::Snapshot(_)));
    assert!(!err.is_poison());
    assert!(drain(&mut h.acks).is_empty());
}
