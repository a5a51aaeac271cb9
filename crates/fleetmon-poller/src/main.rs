//! fleetmond: the Fleetmon collection daemon.

use clap::Parser;
use fleetmon_cache::SnapshotCache;
use fleetmon_core::ports::Backend;
use fleetmon_poller::{Poller, Scheduler};
use fleetmon_store::{resolve_data_dir, DualStore, ReadPreference};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetmond")]
#[command(author, version, about = "Fleetmon collection daemon", long_about = None)]
struct Cli {
    /// Data directory for the primary and mirror database files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Override the stored poll interval, in seconds.
    #[arg(long)]
    interval: Option<u64>,

    /// Serve reads from the mirror backend where possible.
    #[arg(long)]
    read_mirror: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir);
    info!(data_dir = %data_dir.display(), "Starting fleetmond");

    let mut store = DualStore::open(&data_dir).await?;
    if cli.read_mirror {
        store = store.with_read_preference(ReadPreference::Mirror);
    }
    let store: Arc<DualStore> = Arc::new(store);

    let config = store.get_config().await?;
    let poll_interval = Duration::from_secs(cli.interval.unwrap_or(config.poll_interval_secs));

    let cache = Arc::new(SnapshotCache::new());
    cache.warm(store.as_ref()).await?;

    let poller = Poller::new(store.clone(), cache.clone())?;
    let scheduler = Scheduler::new(poller, poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    shutdown_tx.send(true).ok();
    handle.await?;

    Ok(())
}
