use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricKey};
use crate::storage::MetricStore;

/// Snapshot persistence settings
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotConfig {
    /// Snapshot file; an empty path disables persistence
    pub path: PathBuf,
    /// Period between background saves; zero saves after every write
    pub interval: Duration,
    /// Load the file into the inner store on startup
    pub restore: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/metrics-db.json"),
            interval: Duration::from_secs(300),
            restore: true,
        }
    }
}

/// Decorator that mirrors another store into a JSON snapshot file
///
/// All reads and writes go to the inner store. The file is a JSON array of
/// wire records, overwritten in full on every save.
pub struct FileSnapshotStore {
    inner: Arc<dyn MetricStore>,
    config: SnapshotConfig,
    save_lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(inner: Arc<dyn MetricStore>, config: SnapshotConfig) -> Self {
        Self {
            inner,
            config,
            save_lock: Mutex::new(()),
        }
    }

    /// Build the decorator and restore prior state when configured to
    pub async fn open(inner: Arc<dyn MetricStore>, config: SnapshotConfig) -> Result<Self> {
        let store = Self::new(inner, config);
        if store.enabled() && store.config.restore {
            let restored = store.load().await?;
            info!(
                "Restored {} metrics from {}",
                restored,
                store.config.path.display()
            );
        }
        Ok(store)
    }

    pub fn enabled(&self) -> bool {
        !self.config.path.as_os_str().is_empty()
    }

    fn saves_on_write(&self) -> bool {
        self.enabled() && self.config.interval.is_zero()
    }

    /// Read the snapshot file into the inner store
    ///
    /// A missing or empty file means there is no prior state.
    pub async fn load(&self) -> Result<usize> {
        if !self.enabled() {
            return Ok(0);
        }

        let path = &self.config.path;
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Snapshot file {} does not exist yet", path.display());
                return Ok(0);
            }
            Err(e) => {
                return Err(MetricsError::Persistence(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            warn!("Snapshot file {} is empty", path.display());
            return Ok(0);
        }

        let metrics: Vec<Metric> = serde_json::from_slice(&data).map_err(|e| {
            MetricsError::Persistence(format!("failed to decode {}: {}", path.display(), e))
        })?;
        let count = metrics.len();
        self.inner.bulk_add(metrics).await?;
        Ok(count)
    }

    /// Overwrite the snapshot file with the inner store's contents
    pub async fn save(&self) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }

        let _guard = self.save_lock.lock().await;
        let metrics = self.inner.list().await?;
        let data = serde_json::to_vec(&metrics)?;

        tokio::fs::write(&self.config.path, data).await.map_err(|e| {
            MetricsError::Persistence(format!(
                "failed to write {}: {}",
                self.config.path.display(),
                e
            ))
        })?;

        debug!(
            "Saved {} metrics to {}",
            metrics.len(),
            self.config.path.display()
        );
        Ok(())
    }

    async fn save_logged(&self) {
        if let Err(e) = self.save().await {
            error!("Snapshot save failed: {}", e);
        }
    }

    /// Start the periodic saver; `None` when saves are not periodic
    pub fn spawn_ticker(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.enabled() || self.config.interval.is_zero() {
            return None;
        }

        let store = Arc::clone(self);
        let period = self.config.interval;
        Some(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(period) => store.save_logged().await,
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Snapshot ticker stopped");
        }))
    }
}

#[async_trait]
impl MetricStore for FileSnapshotStore {
    async fn add(&self, metric: Metric) -> Result<()> {
        self.inner.add(metric).await?;
        if self.saves_on_write() {
            self.save_logged().await;
        }
        Ok(())
    }

    async fn bulk_add(&self, metrics: Vec<Metric>) -> Result<()> {
        self.inner.bulk_add(metrics).await?;
        if self.saves_on_write() {
            self.save_logged().await;
        }
        Ok(())
    }

    async fn get(&self, key: &MetricKey) -> Result<Metric> {
        self.inner.get(key).await
    }

    async fn list(&self) -> Result<Vec<Metric>> {
        self.inner.list().await
    }

    async fn ping(&self) -> bool {
        self.inner.ping().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
