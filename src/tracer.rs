//! Round-trip latency tracer with single-trace backpressure.
//!
//! A [`BlockingTracer`] admits at most one trace in flight: `begin()` blocks
//! while a prior trace is still pending, which serializes publish attempts on
//! top of the rate limiter. `received()` closes the pending trace, reports the
//! elapsed time to an [`Observable`], and completes the handle returned by the
//! matching `begin()`. A publisher and its paired subscriber share one tracer,
//! so the reported duration is the broker round trip.

use crate::registry::Observable;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{oneshot, Semaphore};

#[async_trait]
pub trait Tracer: Send + Sync {
    /// Starts a trace, blocking while another trace is outstanding. The
    /// returned handle completes when the matching [`received`](Self::received)
    /// runs.
    async fn begin(&self) -> TraceHandle;

    /// Completes the pending trace, reporting its duration. Returns `false`
    /// when no trace is pending.
    fn received(&self) -> bool;
}

/// Completion handle for one trace. Awaiting it is optional.
pub struct TraceHandle {
    done: Option<oneshot::Receiver<()>>,
}

impl TraceHandle {
    pub async fn wait(self) {
        if let Some(done) = self.done {
            let _ = done.await;
        }
    }
}

struct PendingTrace {
    started: Instant,
    done: oneshot::Sender<()>,
}

/// Tracer enforcing at most one trace in flight via a single-permit semaphore.
pub struct BlockingTracer {
    slot: Semaphore,
    pending: Mutex<Option<PendingTrace>>,
    observable: Arc<dyn Observable>,
}

impl BlockingTracer {
    pub fn new(observable: Arc<dyn Observable>) -> Self {
        Self {
            slot: Semaphore::new(1),
            pending: Mutex::new(None),
            observable,
        }
    }
}

#[async_trait]
impl Tracer for BlockingTracer {
    async fn begin(&self) -> TraceHandle {
        let permit = self
            .slot
            .acquire()
            .await
            .expect("tracer semaphore is never closed");
        permit.forget();

        let (done_tx, done_rx) = oneshot::channel();
        *self.pending.lock() = Some(PendingTrace {
            started: Instant::now(),
            done: done_tx,
        });
        TraceHandle {
            done: Some(done_rx),
        }
    }

    fn received(&self) -> bool {
        let trace = match self.pending.lock().take() {
            Some(trace) => trace,
            None => return false,
        };
        self.observable
            .observe(trace.started.elapsed().as_micros() as f64);
        // The handle may already be dropped; completion is best-effort.
        let _ = trace.done.send(());
        self.slot.add_permits(1);
        true
    }
}

/// Tracer used when tracing is disabled: `begin()` never blocks and the
/// returned handle completes immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

#[async_trait]
impl Tracer for NoopTracer {
    async fn begin(&self) -> TraceHandle {
        TraceHandle { done: None }
    }

    fn received(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::testing::RecordingObservable;
    use crate::registry::NoopObservable;
    use std::time::Duration;

    #[tokio::test]
    async fn test_second_begin_blocks_until_received() {
        let tracer = Arc::new(BlockingTracer::new(Arc::new(NoopObservable)));
        let _first = tracer.begin().await;

        let second = {
            let tracer = tracer.clone();
            tokio::spawn(async move {
                tracer.begin().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        assert!(tracer.received());
        second.await.unwrap();
    }

    #[tokio::test]
    async fn test_received_reports_elapsed_and_completes_handle() {
        let recording = Arc::new(RecordingObservable::default());
        let tracer = BlockingTracer::new(recording.clone());

        let handle = tracer.begin().await;
        assert!(tracer.received());
        handle.wait().await;

        let values = recording.values.lock();
        assert_eq!(values.len(), 1);
        assert!(values[0] >= 0.0);
    }

    #[test]
    fn test_received_without_pending_trace() {
        let tracer = BlockingTracer::new(Arc::new(NoopObservable));
        assert!(!tracer.received());
    }

    #[tokio::test]
    async fn test_noop_tracer_never_blocks() {
        let tracer = NoopTracer;
        let first = tracer.begin().await;
        let second = tracer.begin().await;
        first.wait().await;
        second.wait().await;
        assert!(tracer.received());
    }
}
