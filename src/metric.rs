//! Metric records and their validation rules
//!
//! A [`Metric`] is either a gauge (point-in-time value, replaced on merge) or a
//! counter (delta, accumulated on merge). The JSON wire form carries the value
//! in one of two optional fields; it is validated once when converted into a
//! [`Metric`], so an inconsistent record never exists past the boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MetricsError, Result};

/// The two kinds of metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value, replaced on every write
    Gauge,
    /// Monotonic delta, added to the stored total
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(MetricsError::Validation(format!(
                "metric type `{}` is not valid",
                other
            ))),
        }
    }
}

/// A metric value tagged with its kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse the textual value of a path-form update
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self> {
        match kind {
            MetricKind::Gauge => {
                let value = raw.parse::<f64>().map_err(|e| {
                    MetricsError::Validation(format!("failed to parse gauge value `{}`: {}", raw, e))
                })?;
                check_finite(value)?;
                Ok(MetricValue::Gauge(value))
            }
            MetricKind::Counter => raw.parse::<i64>().map(MetricValue::Counter).map_err(|e| {
                MetricsError::Validation(format!("failed to parse counter delta `{}`: {}", raw, e))
            }),
        }
    }

    /// Merge an incoming value into the stored one
    ///
    /// Both values must be of the same kind; a gauge replaces, a counter adds.
    pub fn merge(self, incoming: MetricValue) -> MetricValue {
        match (self, incoming) {
            (MetricValue::Counter(stored), MetricValue::Counter(delta)) => {
                MetricValue::Counter(stored.wrapping_add(delta))
            }
            (_, incoming) => incoming,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{}", v),
            MetricValue::Counter(d) => write!(f, "{}", d),
        }
    }
}

fn check_finite(value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(MetricsError::Validation(format!(
            "gauge value `{}` is not a finite number",
            value
        )))
    }
}

/// Identifies a stored metric: gauges and counters live in separate namespaces
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

impl MetricKey {
    pub fn new(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// A single validated metric record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MetricWire", into = "MetricWire")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    /// Build a metric from the three path segments of `/update/{type}/{name}/{value}`
    pub fn parse(kind: &str, id: &str, raw_value: &str) -> Result<Self> {
        let kind = kind.parse::<MetricKind>()?;
        check_id(id)?;
        let value = MetricValue::parse(kind, raw_value)?;
        Ok(Self {
            id: id.to_string(),
            value,
        })
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.id.clone(), self.kind())
    }
}

fn check_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(MetricsError::Validation("metric id must not be empty".to_string()));
    }
    Ok(())
}

/// JSON representation shared by the agent, the server and the snapshot file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWire {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl TryFrom<MetricWire> for Metric {
    type Error = MetricsError;

    fn try_from(wire: MetricWire) -> Result<Self> {
        let kind = wire.kind.parse::<MetricKind>()?;
        check_id(&wire.id)?;

        let value = match kind {
            MetricKind::Gauge => {
                let value = wire.value.ok_or_else(|| {
                    MetricsError::Validation(format!("gauge `{}` must carry a value", wire.id))
                })?;
                check_finite(value)?;
                MetricValue::Gauge(value)
            }
            MetricKind::Counter => MetricValue::Counter(wire.delta.ok_or_else(|| {
                MetricsError::Validation(format!("counter `{}` must carry a delta", wire.id))
            })?),
        };

        Ok(Metric { id: wire.id, value })
    }
}

impl From<Metric> for MetricWire {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };

        MetricWire {
            id: metric.id,
            kind: metric.value.kind().as_str().to_string(),
            delta,
            value,
        }
    }
}
