//! Metric observables and the fan-out registry.

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Anything that can observe a latency (or other) sample.
pub trait Observable: Send + Sync {
    fn observe(&self, value: f64);
}

/// Registration surface for observables.
pub trait Registry: Send + Sync {
    fn register(&self, observable: Arc<dyn Observable>) -> usize;
    fn deregister(&self, id: usize);
}

/// Fan-out registry: one observation is delivered to every registered
/// observable. Register/deregister take the write lock, fan-out the read lock.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    observables: HashMap<usize, Arc<dyn Observable>>,
    next: usize,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for ObserverRegistry {
    fn register(&self, observable: Arc<dyn Observable>) -> usize {
        let mut inner = self.inner.write();
        let id = inner.next;
        inner.next += 1;
        inner.observables.insert(id, observable);
        id
    }

    fn deregister(&self, id: usize) {
        self.inner.write().observables.remove(&id);
    }
}

impl Observable for ObserverRegistry {
    fn observe(&self, value: f64) {
        let inner = self.inner.read();
        for observable in inner.observables.values() {
            observable.observe(value);
        }
    }
}

/// Discards every observation. Stands in wherever metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObservable;

impl Observable for NoopObservable {
    fn observe(&self, _value: f64) {}
}

/// Latency summary computed from a [`LatencyObservable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencySummary {
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

/// Records observations (microseconds) into an HDR histogram for the
/// end-of-run summary.
pub struct LatencyObservable {
    histogram: Mutex<Histogram<u64>>,
}

impl LatencyObservable {
    pub fn new() -> Self {
        Self {
            // 1us .. 60s at 3 significant digits.
            histogram: Mutex::new(
                Histogram::new_with_bounds(1, 60_000_000, 3)
                    .expect("histogram bounds are static and valid"),
            ),
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let histogram = self.histogram.lock();
        if histogram.is_empty() {
            return LatencySummary::default();
        }
        LatencySummary {
            count: histogram.len(),
            min_us: histogram.min(),
            max_us: histogram.max(),
            mean_us: histogram.mean() as u64,
            p50_us: histogram.value_at_quantile(0.50),
            p95_us: histogram.value_at_quantile(0.95),
            p99_us: histogram.value_at_quantile(0.99),
        }
    }
}

impl Default for LatencyObservable {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for LatencyObservable {
    fn observe(&self, value: f64) {
        if value.is_finite() && value >= 0.0 {
            let _ = self.histogram.lock().record(value as u64);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Collects observed values for assertions.
    #[derive(Default)]
    pub struct RecordingObservable {
        pub values: Mutex<Vec<f64>>,
    }

    impl Observable for RecordingObservable {
        fn observe(&self, value: f64) {
            self.values.lock().push(value);
        }
    }
}
