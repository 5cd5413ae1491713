//! Telemetry agent and collector server
//!
//! The agent samples gauges and counters, frames each snapshot (JSON, gzip,
//! signature, encryption) and ships it with retry. The server undoes the
//! framing in a middleware chain and merges metrics into a pluggable store.

pub mod agent;
pub mod codec;
pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod metric;
pub mod retry;
pub mod server;
pub mod storage;
pub mod util;

/// Re-export of commonly used types for convenience
pub mod prelude {
    pub use crate::agent::{Agent, AgentState, MetricsClient, Transport};
    pub use crate::codec::{DeliveryFramer, FrameDecoder};
    pub use crate::collector::{CollectionStore, StatsSource, SysinfoSource};
    pub use crate::config::{AgentConfig, LogLevel, ServerConfig};
    pub use crate::error::{MetricsError, Result};
    pub use crate::metric::{Metric, MetricKey, MetricKind, MetricValue};
    pub use crate::retry::{RetryConfig, execute_with_retry};
    pub use crate::storage::{FileSnapshotStore, MemoryStore, MetricStore};
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
