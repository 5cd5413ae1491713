//! Server-side metric storage
//!
//! Every backend implements [`MetricStore`]. Gauges replace the stored value,
//! counters add their delta to it.

use async_trait::async_trait;

use crate::error::Result;
use crate::metric::{Metric, MetricKey};

/// Snapshot-to-file decorator over another store
pub mod file;
/// Default in-memory backend
pub mod memory;
/// PostgreSQL backend
#[cfg(feature = "postgres")]
pub mod postgres;

pub use file::{FileSnapshotStore, SnapshotConfig};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Contract shared by all metric backends
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Merge a single metric into the store
    async fn add(&self, metric: Metric) -> Result<()>;

    /// Merge a batch; backends apply it as a unit where they can
    async fn bulk_add(&self, metrics: Vec<Metric>) -> Result<()>;

    /// Fetch one metric, `NotFound` when absent
    async fn get(&self, key: &MetricKey) -> Result<Metric>;

    /// Full snapshot of every stored metric
    async fn list(&self) -> Result<Vec<Metric>>;

    /// Whether the backend is reachable
    async fn ping(&self) -> bool;

    /// Backend name, for logs
    fn name(&self) -> &str;
}
