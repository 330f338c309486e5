//! Publish loop: rate-limited, traced, cancellation-aware.
//!
//! A publisher waits for its client to connect, then repeats: request a slot
//! from the rate limiter, render the payload, open a trace, publish. The
//! trace blocks the next publish until the paired subscriber reports the
//! message back (or tracing is disabled via [`NoopTracer`]).
//!
//! [`NoopTracer`]: crate::tracer::NoopTracer

use crate::client::Client;
use crate::environment::Environment;
use crate::limiter::LimiterChannels;
use crate::registry::Observable;
use crate::renderer::PayloadRenderer;
use crate::topic::Topic;
use crate::tracer::Tracer;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct Publisher {
    client: Arc<dyn Client>,
    topic: Arc<Topic>,
    renderer: PayloadRenderer,
    environment: Arc<Environment>,
    tracer: Arc<dyn Tracer>,
    monitor: Arc<dyn Observable>,
    qos: u8,
    retain: bool,
    renders_per_publish: usize,
    cancel: CancellationToken,
}

impl Publisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn Client>,
        topic: Arc<Topic>,
        renderer: PayloadRenderer,
        environment: Arc<Environment>,
        tracer: Arc<dyn Tracer>,
        monitor: Arc<dyn Observable>,
        qos: u8,
        retain: bool,
        renders_per_publish: usize,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            client,
            topic,
            renderer,
            environment,
            tracer,
            monitor,
            qos,
            retain,
            renders_per_publish: renders_per_publish.max(1),
            cancel: parent.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Runs until cancelled, the limiter shuts down, or the client drops its
    /// connection before the first publish.
    pub async fn run(&self, mut limiter: LimiterChannels) {
        let connected = self.client.connected();
        let disconnected = self.client.disconnected();
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = disconnected.wait() => {
                warn!(client = %self.client.name(), "client disconnected before publishing started");
                return;
            }
            _ = connected.wait() => {}
        }

        let mut x: i64 = 0;
        loop {
            let requested = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = disconnected.wait() => break,
                sent = limiter.input.send(()) => sent,
            };
            if requested.is_err() {
                break;
            }

            let granted = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = disconnected.wait() => break,
                granted = limiter.output.recv() => granted,
            };
            if granted.is_none() {
                break;
            }

            if !self.publish_once(&mut x).await {
                break;
            }
        }
        debug!(client = %self.client.name(), site = %self.client.site(), "publisher stopped");
    }

    /// Renders and publishes one payload. Returns `false` on cancellation.
    async fn publish_once(&self, x: &mut i64) -> bool {
        let payload = match self
            .renderer
            .render(&self.environment, *x, self.renders_per_publish)
        {
            Ok(payload) => payload,
            Err(err) => {
                warn!(client = %self.client.name(), error = %err, "payload encoding failed");
                return true;
            }
        };
        *x += self.renders_per_publish as i64;

        // Handle deliberately dropped: the next begin() provides the
        // backpressure, not this publish.
        let _handle = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            handle = self.tracer.begin() => handle,
        };

        let started = Instant::now();
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = self.client.publish(self.topic.render(), self.qos, self.retain, payload) => result,
        };

        match result {
            Ok(()) => {
                let elapsed = started.elapsed().as_micros() as f64;
                self.topic.observe(elapsed);
                self.client.observe(elapsed);
                self.monitor.observe(elapsed);
            }
            Err(err) => {
                warn!(client = %self.client.name(), topic = %self.topic.render(), error = %err, "publish failed");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockClient;
    use crate::client::BrokerConnection;
    use crate::composition::{Collection, Label, Node};
    use crate::expression::parse;
    use crate::formatter::JsonFormatter;
    use crate::outlet::NoopOutlet;
    use crate::registry::testing::RecordingObservable;
    use crate::registry::NoopObservable;
    use crate::subscriber::Subscriber;
    use crate::tracer::{BlockingTracer, NoopTracer};
    use crate::value::Value;
    use std::time::Duration;

    fn renderer() -> PayloadRenderer {
        let node: Node = Collection::new()
            .with(Label::new("value", parse("x * 2").unwrap().into()))
            .into();
        PayloadRenderer::new(Arc::new(node), Arc::new(JsonFormatter::new()))
    }

    fn publisher(client: Arc<MockClient>, cancel: &CancellationToken) -> Publisher {
        Publisher::new(
            client,
            Arc::new(Topic::new("site/telemetry", Arc::new(NoopObservable))),
            renderer(),
            Arc::new(Environment::new()),
            Arc::new(NoopTracer),
            Arc::new(NoopObservable),
            1,
            false,
            1,
            cancel,
        )
    }

    #[tokio::test]
    async fn test_publishes_rendered_payloads_in_sequence() {
        let (client, mut published) = MockClient::new("pub-1", "plant-a");
        let cancel = CancellationToken::new();
        let publisher = Arc::new(publisher(client.clone(), &cancel));

        client.connect().await.unwrap();
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run(LimiterChannels::passthrough()).await })
        };

        let first = published.recv().await.unwrap();
        let second = published.recv().await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(first.topic, "site/telemetry");
        assert_eq!(first.qos, 1);
        assert!(!first.retain);

        let rows: Value = serde_json::from_slice(&first.payload).unwrap();
        match rows {
            Value::Array(rows) => match &rows[0] {
                Value::Map(row) => assert_eq!(row.get("value"), Some(&Value::Int(0))),
                other => panic!("expected map row, got {other:?}"),
            },
            other => panic!("expected array payload, got {other:?}"),
        }
        let rows: Value = serde_json::from_slice(&second.payload).unwrap();
        match rows {
            Value::Array(rows) => match &rows[0] {
                Value::Map(row) => assert_eq!(row.get("value"), Some(&Value::Int(2))),
                other => panic!("expected map row, got {other:?}"),
            },
            other => panic!("expected array payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_waits_for_connection_before_publishing() {
        let (client, mut published) = MockClient::new("pub-2", "plant-a");
        let cancel = CancellationToken::new();
        let publisher = Arc::new(publisher(client.clone(), &cancel));

        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run(LimiterChannels::passthrough()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(published.try_recv().is_err());

        client.connect().await.unwrap();
        assert!(published.recv().await.is_some());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_client_disconnects_before_start() {
        let (client, _published) = MockClient::new("pub-3", "plant-a");
        let cancel = CancellationToken::new();
        let publisher = publisher(client.clone(), &cancel);

        client.disconnect().await.unwrap();
        publisher.run(LimiterChannels::passthrough()).await;
    }

    #[tokio::test]
    async fn test_successful_publish_reports_latency_to_monitor() {
        let (client, mut published) = MockClient::new("pub-5", "plant-a");
        let monitor = Arc::new(RecordingObservable::default());
        let cancel = CancellationToken::new();
        let publisher = Arc::new(Publisher::new(
            client.clone(),
            Arc::new(Topic::new("site/telemetry", Arc::new(NoopObservable))),
            renderer(),
            Arc::new(Environment::new()),
            Arc::new(NoopTracer),
            monitor.clone(),
            1,
            false,
            1,
            &cancel,
        ));

        client.connect().await.unwrap();
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run(LimiterChannels::passthrough()).await })
        };

        published.recv().await.unwrap();
        published.recv().await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        let values = monitor.values.lock();
        assert!(values.len() >= 2);
        assert!(values.iter().all(|v| *v >= 0.0));
        assert!(!client.observed().is_empty());
    }

    #[tokio::test]
    async fn test_shared_tracer_measures_broker_round_trips() {
        let (client, mut published) = MockClient::new("pub-6", "plant-a");
        let round_trips = Arc::new(RecordingObservable::default());
        let tracer = Arc::new(BlockingTracer::new(round_trips.clone()));
        let cancel = CancellationToken::new();

        let subscriber = Subscriber::new(
            client.clone(),
            Arc::new(Topic::new("site/telemetry", Arc::new(NoopObservable))),
            Arc::new(NoopOutlet),
            tracer.clone(),
            1,
            &cancel,
        );
        let publisher = Arc::new(Publisher::new(
            client.clone(),
            Arc::new(Topic::new("site/telemetry", Arc::new(NoopObservable))),
            renderer(),
            Arc::new(Environment::new()),
            tracer,
            Arc::new(NoopObservable),
            1,
            false,
            1,
            &cancel,
        ));

        client.connect().await.unwrap();
        subscriber.start().await.unwrap();
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run(LimiterChannels::passthrough()).await })
        };

        // Each delivery closes the pending trace and unblocks the next publish.
        for _ in 0..3 {
            let message = published.recv().await.unwrap();
            client.deliver(&message.topic, &message.payload);
        }
        cancel.cancel();
        task.await.unwrap();

        let values = round_trips.values.lock();
        assert!(values.len() >= 3);
        assert!(values.iter().all(|v| *v >= 0.0));
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_the_loop() {
        let (client, mut published) = MockClient::new("pub-4", "plant-a");
        let cancel = CancellationToken::new();
        let publisher = Arc::new(publisher(client.clone(), &cancel));

        client.fail_publishes();
        client.connect().await.unwrap();
        let task = {
            let publisher = publisher.clone();
            tokio::spawn(async move { publisher.run(LimiterChannels::passthrough()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert!(published.try_recv().is_err());

        cancel.cancel();
        task.await.unwrap();
    }
}
