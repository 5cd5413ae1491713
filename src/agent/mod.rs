//! Telemetry agent: one poller sampling stats, N senders shipping them
//!
//! The poller only touches the [`CollectionStore`]. Each sender drains the
//! store on its own report interval, frames the snapshot and posts it with
//! retry. A failed delivery is logged and its counter deltas are put back so
//! the next send carries them.

pub mod client;

pub use client::MetricsClient;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::{DeliveryFramer, Encryptor, Frame};
use crate::collector::{CollectionStore, StatsSource};
use crate::config::AgentConfig;
use crate::error::Result;
use crate::retry::{RetryConfig, retry_until};
use crate::util::shutdown;

/// Where framed snapshots go
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: &Frame) -> Result<()>;
}

#[async_trait]
impl Transport for MetricsClient {
    async fn send(&self, frame: &Frame) -> Result<()> {
        MetricsClient::send(self, frame).await
    }
}

/// Lifecycle of a running agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Running,
    Draining,
    Stopped,
}

/// Timing and concurrency knobs
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub workers: usize,
    pub retry: RetryConfig,
}

impl AgentSettings {
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: config.poll_period(),
            report_interval: config.report_period(),
            workers: config.workers(),
            retry: config.retry()?,
        })
    }
}

pub struct Agent<S, T> {
    store: Arc<CollectionStore>,
    source: S,
    framer: Arc<DeliveryFramer>,
    transport: Arc<T>,
    settings: AgentSettings,
    state: Arc<watch::Sender<AgentState>>,
}

impl<S: StatsSource> Agent<S, MetricsClient> {
    /// Wire an agent from its configuration
    pub fn from_config(config: &AgentConfig, source: S) -> Result<Self> {
        let encryptor = config
            .crypto_key
            .as_ref()
            .map(Encryptor::from_pem_file)
            .transpose()?;

        let framer = DeliveryFramer::new()
            .with_compression(config.compress_request)
            .with_hash_key(config.hash_key())
            .with_encryptor(encryptor);

        let client = MetricsClient::new(&config.address, config.request_timeout());
        info!("Reporting to {}", client.url());

        Ok(Self::new(source, framer, client, AgentSettings::from_config(config)?))
    }
}

impl<S: StatsSource, T: Transport> Agent<S, T> {
    pub fn new(source: S, framer: DeliveryFramer, transport: T, mut settings: AgentSettings) -> Self {
        settings.workers = settings.workers.max(1);
        let (state, _) = watch::channel(AgentState::Running);
        Self {
            store: Arc::new(CollectionStore::new()),
            source,
            framer: Arc::new(framer),
            transport: Arc::new(transport),
            settings,
            state: Arc::new(state),
        }
    }

    pub fn store(&self) -> Arc<CollectionStore> {
        Arc::clone(&self.store)
    }

    /// Observe lifecycle transitions
    pub fn state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Run until the stop flag is set, then wait for every loop to finish
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let Agent {
            store,
            source,
            framer,
            transport,
            settings,
            state,
        } = self;

        info!(
            "Agent running: poll every {:?}, report every {:?}, {} sender(s)",
            settings.poll_interval, settings.report_interval, settings.workers
        );

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(settings.workers + 1);
        handles.push(tokio::spawn(poll_loop(
            Arc::clone(&store),
            source,
            settings.poll_interval,
            stop.clone(),
        )));

        for worker in 0..settings.workers {
            let sender = Sender {
                worker,
                store: Arc::clone(&store),
                framer: Arc::clone(&framer),
                transport: Arc::clone(&transport),
                retry: settings.retry.clone(),
            };
            handles.push(tokio::spawn(sender.run(settings.report_interval, stop.clone())));
        }

        shutdown::wait(&mut stop).await;
        state.send_replace(AgentState::Draining);
        info!("Agent draining {} loop(s)", handles.len());

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Agent loop failed: {}", e);
            }
        }

        state.send_replace(AgentState::Stopped);
        info!("Agent stopped");
    }
}

fn poll_once<S: StatsSource>(store: &CollectionStore, source: &mut S) -> Result<()> {
    store.update_self()?;
    store.update_runtime_stats(&source.runtime_stats())?;
    store.update_host_stats(source.host_stats().as_ref())
}

async fn poll_loop<S: StatsSource>(
    store: Arc<CollectionStore>,
    mut source: S,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            break;
        }
        if let Err(e) = poll_once(&store, &mut source) {
            warn!("Polling failed: {}", e);
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => {}
        }
    }
    debug!("Poller stopped");
}

struct Sender<T> {
    worker: usize,
    store: Arc<CollectionStore>,
    framer: Arc<DeliveryFramer>,
    transport: Arc<T>,
    retry: RetryConfig,
}

impl<T: Transport> Sender<T> {
    /// Report immediately, then once per period until stopped
    async fn run(self, period: Duration, mut stop: watch::Receiver<bool>) {
        loop {
            if *stop.borrow() {
                break;
            }
            self.report(&mut stop).await;
            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                _ = shutdown::wait(&mut stop) => {}
            }
        }
        debug!("Sender {} stopped", self.worker);
    }

    /// Ship one snapshot; never fails the loop
    async fn report(&self, stop: &mut watch::Receiver<bool>) {
        let batch = match self.store.take() {
            Ok(batch) => batch,
            Err(e) => {
                error!("Sender {}: cannot snapshot metrics: {}", self.worker, e);
                return;
            }
        };
        if batch.is_empty() {
            debug!("Sender {}: nothing to report", self.worker);
            return;
        }

        let result = match self.framer.encode(&batch) {
            Ok(frame) => {
                let transport = &self.transport;
                let frame = &frame;
                retry_until(move || transport.send(frame), &self.retry, stop, "Delivery failed").await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!("Sender {}: reported {} metrics", self.worker, batch.len()),
            Err(e) => {
                error!("Sender {}: giving up on {} metrics: {}", self.worker, batch.len(), e);
                if let Err(e) = self.store.restore(&batch) {
                    error!("Sender {}: cannot requeue counters: {}", self.worker, e);
                }
            }
        }
    }
}
