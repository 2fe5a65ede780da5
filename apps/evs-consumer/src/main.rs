mod bootstrap;

use anyhow::Context;
use evs_core::Config;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    evs_otel::init();

    let config = Config::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    info!(
        source = ?config.source.kind,
        snapshots = ?config.snapshots.backend,
        ordering = ?config.delivery.commit_ordering,
        "starting event stream consumer"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(bootstrap::cancel_on_signal(shutdown.clone()));

    if let Err(err) = bootstrap::run(&config, shutdown).await {
        error!(error = %format!("{err:#}"), "event stream consumer stopped on a fatal error");
        return Err(err);
    }
    info!("event stream consumer stopped");
    Ok(())
}
