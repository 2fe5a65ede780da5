use std::sync::Arc;

use anyhow::Context;
use evs_core::bulk::{BulkConfig, BulkIndexer, OpenSearchBulkIndexer};
use evs_core::config::{SnapshotBackend, SourceKind};
use evs_core::repository::OpenSearchEnrichedEventRepository;
use evs_core::stream::{
    ack_channel, CommitOrdering, LocalQueue, MessageSource, OffsetTracker, StreamReader,
};
use evs_core::{Config, Enricher, Projection};
use evs_snapshots::{MemorySnapshotRepository, SnapshotRepository, SqliteSnapshotRepository};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancel `shutdown` on SIGINT or SIGTERM.
pub async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown signal received");
    shutdown.cancel();
}

async fn open_snapshots(config: &Config) -> anyhow::Result<Arc<dyn SnapshotRepository>> {
    let snapshots = &config.snapshots;
    match snapshots.backend {
        SnapshotBackend::Memory => Ok(Arc::new(MemorySnapshotRepository::in_memory(
            snapshots.expiration,
        ))),
        SnapshotBackend::Sqlite => {
            let repository = SqliteSnapshotRepository::sqlite(&snapshots.db_path, snapshots.expiration)
                .with_context(|| {
                    format!("failed to open snapshot database {}", snapshots.db_path.display())
                })?;
            match repository.store().purge_expired_async().await {
                Ok(purged) => info!(purged, "expired snapshot groups removed"),
                Err(err) => warn!(error = %err, "could not purge expired snapshots"),
            }
            Ok(Arc::new(repository))
        }
    }
}

async fn open_source(config: &Config) -> anyhow::Result<Arc<dyn MessageSource>> {
    match config.source.kind {
        SourceKind::File => {
            let path = config
                .source
                .file
                .as_deref()
                .context("EVS_SOURCE_FILE is required for the file source")?;
            let queue = LocalQueue::replay_file(path)
                .await
                .with_context(|| format!("failed to read events from {}", path.display()))?;
            info!(path = %path.display(), "replaying events from file");
            Ok(Arc::new(queue))
        }
        SourceKind::Kafka => kafka_source(config),
    }
}

#[cfg(feature = "kafka")]
fn kafka_source(config: &Config) -> anyhow::Result<Arc<dyn MessageSource>> {
    let source = evs_core::stream::KafkaSource::connect(&config.kafka)
        .context("failed to connect to the event stream")?;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "kafka"))]
fn kafka_source(_config: &Config) -> anyhow::Result<Arc<dyn MessageSource>> {
    anyhow::bail!("kafka source selected but evs-consumer was built without the `kafka` feature")
}

/// Wire the adapters together and consume until shutdown, end of input or a
/// fatal processing error.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let (acks, ack_rx) = ack_channel(config.delivery.ack_channel_buffer);
    let snapshots = open_snapshots(config).await?;

    let indexer = OpenSearchBulkIndexer::new(BulkConfig::from_config(
        &config.opensearch,
        config.delivery.bulk_channel_buffer,
    ))
    .context("failed to create bulk indexer")?;
    let repository = Arc::new(OpenSearchEnrichedEventRepository::new(
        indexer,
        config.opensearch.index_prefix.clone(),
        acks.clone(),
    ));
    let projection = Projection::new(
        snapshots,
        Arc::new(Enricher::new(config.rules.clone())),
        repository.clone(),
        acks,
    )
    .with_excluded_user_names(config.projection.excluded_user_names.iter().cloned());

    let source = open_source(config).await?;
    let reader = StreamReader::new(source.clone()).with_shutdown(shutdown);
    let reader = match config.delivery.commit_ordering {
        CommitOrdering::Contiguous => reader
            .with_offset_tracker(OffsetTracker::with_limit(config.delivery.max_pending_offsets)),
        ordering => reader.with_ordering(ordering),
    };

    let commits = reader.spawn_commit_loop(ack_rx);
    let consumed = reader.run(&projection).await;

    // buffered documents acknowledge from the indexer, so flush before the
    // commit loop stops
    if let Err(err) = projection.close().await {
        error!(error = %err, "failed to flush pending enriched events");
    }
    let committed = commits.shutdown().await;
    if let Err(err) = source.close().await {
        warn!(error = %err, "failed to close message source");
    }
    let stats = repository.indexer().stats();
    info!(
        committed,
        indexed = stats.indexed,
        failed = stats.failed,
        requests = stats.requests,
        "consumer drained"
    );

    let processed = consumed.context("event consumption failed")?;
    info!(processed, "consume loop finished");
    Ok(())
}
