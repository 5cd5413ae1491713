use log::{trace, warn};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use super::source::{HostStats, RuntimeStats};
use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricValue};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

#[derive(Debug, Default)]
struct Samples {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Samples {
    fn snapshot(&self) -> Vec<Metric> {
        let mut metrics = Vec::with_capacity(self.gauges.len() + self.counters.len());
        metrics.extend(self.gauges.iter().map(|(id, v)| Metric::gauge(id.clone(), *v)));
        metrics.extend(self.counters.iter().map(|(id, d)| Metric::counter(id.clone(), *d)));
        metrics
    }

    /// Keep the previous reading when a sample is NaN or infinite
    fn set_gauge(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        if value.is_finite() {
            self.gauges.insert(name, value);
        } else {
            warn!("Dropping non-finite sample {} = {}", name, value);
        }
    }
}

/// Agent-side accumulator of sampled gauges and counters
///
/// One lock serializes every update and snapshot.
#[derive(Debug, Default)]
pub struct CollectionStore {
    samples: Mutex<Samples>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Samples>> {
        self.samples
            .lock()
            .map_err(|_| MetricsError::Storage("Lock poisoned".to_string()))
    }

    /// Bump `PollCount` and refresh the time-derived `RandomValue`
    pub fn update_self(&self) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let mut samples = self.lock()?;
        samples.gauges.insert(RANDOM_VALUE.to_string(), now);
        *samples.counters.entry(POLL_COUNT.to_string()).or_insert(0) += 1;
        Ok(())
    }

    pub fn update_runtime_stats(&self, stats: &RuntimeStats) -> Result<()> {
        let mut samples = self.lock()?;
        for (name, value) in stats.gauges() {
            samples.set_gauge(name, value);
        }
        Ok(())
    }

    /// Overwrite host gauges; `None` means the host could not be sampled and is skipped
    pub fn update_host_stats(&self, stats: Option<&HostStats>) -> Result<()> {
        let Some(stats) = stats else {
            trace!("Host stats unavailable, skipping");
            return Ok(());
        };

        let mut samples = self.lock()?;
        for (name, value) in stats.gauges() {
            samples.set_gauge(name, value);
        }
        Ok(())
    }

    /// Copy of every entry
    pub fn list(&self) -> Result<Vec<Metric>> {
        Ok(self.lock()?.snapshot())
    }

    /// Copy of every entry, draining the counter deltas
    ///
    /// Each counter delta is handed to exactly one caller, so concurrent
    /// senders never ship the same increment twice.
    pub fn take(&self) -> Result<Vec<Metric>> {
        let mut samples = self.lock()?;
        let metrics = samples.snapshot();
        samples.counters.clear();
        Ok(metrics)
    }

    /// Put back the counter deltas of a batch that could not be delivered
    pub fn restore(&self, metrics: &[Metric]) -> Result<()> {
        let mut samples = self.lock()?;
        for metric in metrics {
            if let MetricValue::Counter(delta) = metric.value {
                *samples.counters.entry(metric.id.clone()).or_insert(0) += delta;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let samples = self.lock()?;
        Ok(samples.gauges.len() + samples.counters.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn counter(metrics: &[Metric], id: &str) -> Option<i64> {
        metrics.iter().find_map(|m| match m.value {
            MetricValue::Counter(d) if m.id == id => Some(d),
            _ => None,
        })
    }

    fn gauge(metrics: &[Metric], id: &str) -> Option<f64> {
        metrics.iter().find_map(|m| match m.value {
            MetricValue::Gauge(v) if m.id == id => Some(v),
            _ => None,
        })
    }

    #[test]
    fn test_update_self() {
        let store = CollectionStore::new();
        store.update_self().unwrap();
        store.update_self().unwrap();

        let metrics = store.list().unwrap();
        assert_eq!(counter(&metrics, POLL_COUNT), Some(2));
        assert!(gauge(&metrics, RANDOM_VALUE).unwrap() > 0.0);
    }

    #[test]
    fn test_runtime_stats_overwrite() {
        let store = CollectionStore::new();
        let mut stats = RuntimeStats::default();
        stats.alloc = 100;
        store.update_runtime_stats(&stats).unwrap();
        stats.alloc = 250;
        store.update_runtime_stats(&stats).unwrap();

        let metrics = store.list().unwrap();
        assert_eq!(gauge(&metrics, "Alloc"), Some(250.0));
        assert_eq!(metrics.len(), RuntimeStats::default().gauges().len());
    }

    #[test]
    fn test_host_stats() {
        let store = CollectionStore::new();
        store.update_host_stats(None).unwrap();
        assert!(store.is_empty().unwrap());

        let stats = HostStats {
            total_memory: 1024,
            free_memory: 512,
            cpu_utilization: vec![12.5, 40.0],
        };
        store.update_host_stats(Some(&stats)).unwrap();

        let metrics = store.list().unwrap();
        assert_eq!(gauge(&metrics, "TotalMemory"), Some(1024.0));
        assert_eq!(gauge(&metrics, "FreeMemory"), Some(512.0));
        assert_eq!(gauge(&metrics, "CPUutilization1"), Some(12.5));
        assert_eq!(gauge(&metrics, "CPUutilization2"), Some(40.0));
    }

    #[test]
    fn test_non_finite_samples_dropped() {
        let store = CollectionStore::new();
        let mut stats = RuntimeStats {
            gc_cpu_fraction: 0.25,
            ..RuntimeStats::default()
        };
        store.update_runtime_stats(&stats).unwrap();
        stats.gc_cpu_fraction = f64::NAN;
        store.update_runtime_stats(&stats).unwrap();

        let host = HostStats {
            total_memory: 1024,
            free_memory: 512,
            cpu_utilization: vec![f64::INFINITY, 10.0],
        };
        store.update_host_stats(Some(&host)).unwrap();

        let metrics = store.list().unwrap();
        assert_eq!(gauge(&metrics, "GCCPUFraction"), Some(0.25));
        assert_eq!(gauge(&metrics, "CPUutilization1"), None);
        assert_eq!(gauge(&metrics, "CPUutilization2"), Some(10.0));
        // Every snapshot still passes wire validation
        let body = serde_json::to_vec(&metrics).unwrap();
        let decoded: Vec<Metric> = serde_json::from_slice(&body).unwrap();
        assert_eq!(decoded.len(), metrics.len());
    }

    #[test]
    fn test_take_drains_counters_only() {
        let store = CollectionStore::new();
        store.update_self().unwrap();
        store.update_self().unwrap();

        let first = store.take().unwrap();
        assert_eq!(counter(&first, POLL_COUNT), Some(2));

        let second = store.take().unwrap();
        assert_eq!(counter(&second, POLL_COUNT), None);
        assert!(gauge(&second, RANDOM_VALUE).is_some());
    }

    #[test]
    fn test_restore_requeues_deltas() {
        let store = CollectionStore::new();
        store.update_self().unwrap();
        let failed = store.take().unwrap();

        store.update_self().unwrap();
        store.restore(&failed).unwrap();

        assert_eq!(counter(&store.take().unwrap(), POLL_COUNT), Some(2));
    }

    #[test]
    fn test_concurrent_updates_and_takes() {
        let store = Arc::new(CollectionStore::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for _ in 0..250 {
                    store.update_self().unwrap();
                }
            }));
        }

        let mut shipped = 0;
        for _ in 0..10 {
            shipped += counter(&store.take().unwrap(), POLL_COUNT).unwrap_or(0);
        }
        for handle in handles {
            handle.join().unwrap();
        }
        shipped += counter(&store.take().unwrap(), POLL_COUNT).unwrap_or(0);

        assert_eq!(shipped, 1000);
    }
}
