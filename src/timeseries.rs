//! Time-series key package (C7).
//!
//! Grounded on `bvc_pergeovisibility.c`'s `gen_metrics_t`/per-country metric
//! key arrays: metrics are pre-registered once at startup and identified by
//! an opaque key id thereafter, so the hot per-view path never does string
//! formatting — it only calls `set(key, value)` and, once per view, `flush`.

use async_trait::async_trait;
use tracing::info;

/// Opaque handle returned by [`TimeseriesBackend::register`]. Stable for
/// the lifetime of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyId(pub u64);

/// A metric value. Most of the consumer's metrics are counters (`Int`); the
/// geo-visibility consumer's `avg_numcountries_perpfx` is the one metric
/// carried as a ratio, so the package needs to hold both without the hot
/// per-prefix path paying for a cast either way.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Int(v)
    }
}

impl From<u64> for MetricValue {
    fn from(v: u64) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<u32> for MetricValue {
    fn from(v: u32) -> Self {
        MetricValue::Int(v as i64)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Float(v)
    }
}

/// A batch of `(key, value)` pairs accumulated during one view's
/// processing and flushed together at the view's timestamp.
#[derive(Debug, Default)]
pub struct KeyPackage {
    entries: Vec<(KeyId, MetricValue)>,
}

impl KeyPackage {
    pub fn new() -> Self {
        KeyPackage::default()
    }

    /// Set (overwriting any prior value this view) the value for `key`.
    pub fn set(&mut self, key: KeyId, value: impl Into<MetricValue>) {
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[(KeyId, MetricValue)] {
        &self.entries
    }
}

/// The external time-series collaborator: registers metric names up front
/// and later receives flushed batches.
#[async_trait]
pub trait TimeseriesBackend: Send + Sync {
    /// Register a metric path, returning the stable key id future `set`
    /// calls will use.
    fn register(&mut self, metric_path: &str) -> KeyId;

    /// Flush a batch of `(key, value)` pairs at `timestamp` (seconds since
    /// epoch).
    async fn flush(&self, timestamp: i64, package: &KeyPackage);
}

/// Reference backend: logs every flush via `tracing` instead of writing to
/// a real time-series store. Metric paths are kept so log lines are
/// readable.
#[derive(Default)]
pub struct LoggingBackend {
    names: Vec<String>,
}

impl LoggingBackend {
    pub fn new() -> Self {
        LoggingBackend::default()
    }
}

#[async_trait]
impl TimeseriesBackend for LoggingBackend {
    fn register(&mut self, metric_path: &str) -> KeyId {
        let id = KeyId(self.names.len() as u64);
        self.names.push(metric_path.to_string());
        id
    }

    async fn flush(&self, timestamp: i64, package: &KeyPackage) {
        for (key, value) in package.entries() {
            let name = self.names.get(key.0 as usize).map(String::as_str).unwrap_or("<unknown>");
            match value {
                MetricValue::Int(v) => info!(timestamp, metric = name, value = *v, "flushed metric"),
                MetricValue::Float(v) => info!(timestamp, metric = name, value = *v, "flushed metric"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_same_key_within_a_package() {
        let mut package = KeyPackage::new();
        let key = KeyId(1);
        package.set(key, 10i64);
        package.set(key, 20i64);
        assert_eq!(package.entries(), &[(key, MetricValue::Int(20))]);
    }

    #[test]
    fn set_accepts_float_metrics() {
        let mut package = KeyPackage::new();
        let key = KeyId(7);
        package.set(key, 1.5f64);
        assert_eq!(package.entries(), &[(key, MetricValue::Float(1.5))]);
    }

    #[tokio::test]
    async fn register_returns_stable_distinct_ids() {
        let mut backend = LoggingBackend::new();
        let a = backend.register("a.metric");
        let b = backend.register("b.metric");
        assert_ne!(a, b);
        let mut package = KeyPackage::new();
        package.set(a, 1i64);
        package.set(b, 2i64);
        backend.flush(1_700_000_000, &package).await;
    }
}
