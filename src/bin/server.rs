use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use metricflow::VERSION;
use metricflow::codec::{Decryptor, FrameDecoder};
use metricflow::config::{LogLevel, ServerConfig};
use metricflow::server::build_router;
use metricflow::storage::{FileSnapshotStore, MemoryStore, MetricStore};
use metricflow::util::{logging, shutdown};

/// Collect metrics over HTTP into memory or PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "metricflow-server", version, about)]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, host:port
    #[arg(short = 'a', long)]
    address: Option<String>,

    /// Seconds between snapshot saves, 0 saves on every write
    #[arg(short = 'i', long)]
    store_interval: Option<u64>,

    /// Snapshot file, empty disables snapshots
    #[arg(short = 'f', long)]
    file_storage_path: Option<String>,

    /// Load the snapshot file on startup
    #[arg(short = 'r', long)]
    restore: Option<bool>,

    /// PostgreSQL connection string
    #[arg(short = 'd', long)]
    database_dsn: Option<String>,

    /// Shared key for the HashSHA256 header
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// PEM private key used to decrypt request bodies
    #[arg(long)]
    crypto_key: Option<PathBuf>,

    /// Backoff delays in seconds, comma-separated
    #[arg(long)]
    backoff_intervals: Option<String>,

    /// Retry transient database errors
    #[arg(long)]
    backoff_retries: Option<bool>,

    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<LogLevel>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.store_interval {
            config.store_interval = secs;
        }
        if let Some(path) = self.file_storage_path {
            config.file_storage_path = path;
        }
        if let Some(restore) = self.restore {
            config.restore = restore;
        }
        if self.database_dsn.is_some() {
            config.database_dsn = self.database_dsn;
        }
        if self.key.is_some() {
            config.key = self.key;
        }
        if self.crypto_key.is_some() {
            config.crypto_key = self.crypto_key;
        }
        if let Some(intervals) = self.backoff_intervals {
            config.backoff_intervals = intervals;
        }
        if let Some(enabled) = self.backoff_retries {
            config.backoff_retries = enabled;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
    }
}

#[cfg(feature = "postgres")]
async fn database_store(config: &ServerConfig, dsn: &str) -> Result<Arc<dyn MetricStore>> {
    use metricflow::connection::postgres::PoolConfig;
    use metricflow::storage::PostgresStore;

    let store = PostgresStore::connect(&PoolConfig::new(dsn), config.retry()?)
        .await
        .context("Failed to bootstrap database")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn database_store(_config: &ServerConfig, _dsn: &str) -> Result<Arc<dyn MetricStore>> {
    anyhow::bail!("DATABASE_DSN is set but this build has no PostgreSQL support")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    logging::init(&config.log_level);
    info!("metricflow server {} starting", VERSION);

    let inner: Arc<dyn MetricStore> = match config.dsn() {
        Some(dsn) => database_store(&config, dsn).await?,
        None => Arc::new(MemoryStore::default()),
    };
    info!("Using {} storage", inner.name());

    let snapshots = Arc::new(
        FileSnapshotStore::open(inner, config.snapshot())
            .await
            .context("Failed to restore snapshot")?,
    );

    let decryptor = config
        .crypto_key
        .as_ref()
        .map(Decryptor::from_pem_file)
        .transpose()
        .context("Failed to load private key")?;
    let decoder = FrameDecoder::new(config.hash_key(), decryptor);

    let (stop_tx, stop_rx) = shutdown::channel();
    let ticker = snapshots.spawn_ticker(stop_rx.clone());

    let router = build_router(snapshots.clone(), decoder);
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind {}", config.address))?;
    info!("Listening on {}", config.address);

    let mut server_stop = stop_rx;
    let signals = shutdown::listen(stop_tx);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown::wait(&mut server_stop).await })
        .await
        .context("Server error")?;
    signals.abort();

    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            error!("Snapshot ticker failed: {}", e);
        }
    }
    if let Err(e) = snapshots.save().await {
        error!("Final snapshot save failed: {}", e);
    }

    info!("Server stopped");
    Ok(())
}
