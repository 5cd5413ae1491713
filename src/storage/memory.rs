use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricKey, MetricKind, MetricValue};
use crate::storage::MetricStore;

#[derive(Debug, Default)]
struct Tables {
    gauges: HashMap<String, f64>,
    counters: HashMap<String, i64>,
}

impl Tables {
    fn merge(&mut self, metric: Metric) {
        match metric.value {
            MetricValue::Gauge(value) => {
                self.gauges.insert(metric.id, value);
            }
            MetricValue::Counter(delta) => {
                let stored = self.counters.entry(metric.id).or_insert(0);
                *stored = stored.wrapping_add(delta);
            }
        }
    }
}

/// Metric store held entirely in process memory
pub struct MemoryStore {
    tables: Mutex<Tables>,
    name: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            name: name.into(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| MetricsError::Storage("Lock poisoned".to_string()))
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn add(&self, metric: Metric) -> Result<()> {
        self.lock()?.merge(metric);
        Ok(())
    }

    async fn bulk_add(&self, metrics: Vec<Metric>) -> Result<()> {
        let mut tables = self.lock()?;
        for metric in metrics {
            tables.merge(metric);
        }
        Ok(())
    }

    async fn get(&self, key: &MetricKey) -> Result<Metric> {
        let tables = self.lock()?;
        let found = match key.kind {
            MetricKind::Gauge => tables.gauges.get(&key.id).map(|v| Metric::gauge(&key.id, *v)),
            MetricKind::Counter => tables
                .counters
                .get(&key.id)
                .map(|d| Metric::counter(&key.id, *d)),
        };
        found.ok_or_else(|| MetricsError::NotFound(format!("{} {}", key.kind, key.id)))
    }

    async fn list(&self) -> Result<Vec<Metric>> {
        let tables = self.lock()?;
        let mut metrics = Vec::with_capacity(tables.gauges.len() + tables.counters.len());
        metrics.extend(tables.gauges.iter().map(|(id, v)| Metric::gauge(id.clone(), *v)));
        metrics.extend(tables.counters.iter().map(|(id, d)| Metric::counter(id.clone(), *d)));
        Ok(metrics)
    }

    async fn ping(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut metrics: Vec<Metric>) -> Vec<Metric> {
        metrics.sort_by(|a, b| a.id.cmp(&b.id));
        metrics
    }

    #[tokio::test]
    async fn test_gauge_replaces() {
        let store = MemoryStore::default();
        store.add(Metric::gauge("Alloc", 120.5)).await.unwrap();
        store.add(Metric::gauge("Alloc", 130.0)).await.unwrap();

        let got = store.get(&MetricKey::new("Alloc", MetricKind::Gauge)).await.unwrap();
        assert_eq!(got.value, MetricValue::Gauge(130.0));
    }

    #[tokio::test]
    async fn test_counter_accumulates() {
        let store = MemoryStore::default();
        for _ in 0..3 {
            store.add(Metric::counter("PollCount", 1)).await.unwrap();
        }

        let got = store
            .get(&MetricKey::new("PollCount", MetricKind::Counter))
            .await
            .unwrap();
        assert_eq!(got.value, MetricValue::Counter(3));
    }

    #[tokio::test]
    async fn test_kinds_are_separate_namespaces() {
        let store = MemoryStore::default();
        store.add(Metric::gauge("x", 1.0)).await.unwrap();
        store.add(Metric::counter("x", 5)).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        let gauge = store.get(&MetricKey::new("x", MetricKind::Gauge)).await.unwrap();
        assert_eq!(gauge.value, MetricValue::Gauge(1.0));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::default();
        let err = store
            .get(&MetricKey::new("nope", MetricKind::Counter))
            .await
            .unwrap_err();
        assert!(matches!(err, MetricsError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bulk_add_then_list() {
        let store = MemoryStore::default();
        let records = vec![
            Metric::gauge("a", 1.5),
            Metric::counter("b", 2),
            Metric::gauge("c", -3.0),
        ];
        store.bulk_add(records.clone()).await.unwrap();

        assert_eq!(sorted(store.list().await.unwrap()), sorted(records));
    }

    #[tokio::test]
    async fn test_bulk_add_merges_duplicates() {
        let store = MemoryStore::default();
        store
            .bulk_add(vec![Metric::counter("c", 2), Metric::counter("c", 3)])
            .await
            .unwrap();

        let got = store.get(&MetricKey::new("c", MetricKind::Counter)).await.unwrap();
        assert_eq!(got.value, MetricValue::Counter(5));
    }

    #[tokio::test]
    async fn test_ping() {
        assert!(MemoryStore::default().ping().await);
    }
}
