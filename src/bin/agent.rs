use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::PathBuf;

use metricflow::VERSION;
use metricflow::agent::Agent;
use metricflow::collector::SysinfoSource;
use metricflow::config::{AgentConfig, LogLevel};
use metricflow::util::{logging, shutdown};

/// Sample process and host metrics and ship them to a collector
#[derive(Parser, Debug)]
#[command(name = "metricflow-agent", version, about)]
struct Args {
    /// Configuration file (TOML, JSON or YAML)
    #[arg(short = 'c', long, env = "CONFIG")]
    config: Option<PathBuf>,

    /// Collector address, host:port
    #[arg(short = 'a', long)]
    address: Option<String>,

    /// Seconds between reports
    #[arg(short = 'r', long)]
    report_interval: Option<u64>,

    /// Seconds between samples
    #[arg(short = 'p', long)]
    poll_interval: Option<u64>,

    /// Concurrent senders
    #[arg(short = 'l', long)]
    rate_limit: Option<i64>,

    /// Shared key for the HashSHA256 header
    #[arg(short = 'k', long)]
    key: Option<String>,

    /// PEM public key used to encrypt request bodies
    #[arg(long)]
    crypto_key: Option<PathBuf>,

    /// Gzip request bodies
    #[arg(long)]
    compress_request: Option<bool>,

    /// Backoff delays in seconds, comma-separated
    #[arg(long)]
    backoff_intervals: Option<String>,

    /// Retry failed deliveries
    #[arg(long)]
    backoff_retries: Option<bool>,

    /// error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<LogLevel>,
}

impl Args {
    fn apply(self, config: &mut AgentConfig) {
        if let Some(address) = self.address {
            config.address = address;
        }
        if let Some(secs) = self.report_interval {
            config.report_interval = secs;
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval = secs;
        }
        if let Some(limit) = self.rate_limit {
            config.rate_limit = limit;
        }
        if self.key.is_some() {
            config.key = self.key;
        }
        if self.crypto_key.is_some() {
            config.crypto_key = self.crypto_key;
        }
        if let Some(compress) = self.compress_request {
            config.compress_request = compress;
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

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config =
        AgentConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    logging::init(&config.log_level);
    info!("metricflow agent {} starting", VERSION);

    let agent =
        Agent::from_config(&config, SysinfoSource::new()).context("Failed to set up agent")?;

    let (stop_tx, stop_rx) = shutdown::channel();
    shutdown::listen(stop_tx);

    agent.run(stop_rx).await;
    Ok(())
}
