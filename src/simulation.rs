//! Fleet simulation orchestration.
//!
//! Builds the composition tree once from configuration, then creates one
//! client, environment, rate limiter, and publisher per device and runs them
//! until the configured duration elapses or the run is cancelled.

use crate::client::{Client, ClientMetrics};
use crate::client::v3::MqttV3Client;
use crate::client::v5::MqttV5Client;
use crate::composition::{Collection, Label, Node};
use crate::config::{ProtocolVersion, SimulationConfig, SubscribeConfig};
use crate::environment::Environment;
use crate::expression::{parse, ParseError};
use crate::fleet::generate_fleet;
use crate::formatter::JsonFormatter;
use crate::limiter::{LimiterError, RateLimiter};
use crate::outlet::{ExpressionOutlet, LoggingOutlet, NoopOutlet, Outlet};
use crate::publisher::Publisher;
use crate::registry::{
    LatencyObservable, LatencySummary, NoopObservable, Observable, ObserverRegistry, Registry,
};
use crate::renderer::PayloadRenderer;
use crate::subscriber::Subscriber;
use crate::topic::Topic;
use crate::tracer::{BlockingTracer, NoopTracer, Tracer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("invalid expression for field {field}: {source}")]
    Field {
        field: String,
        source: ParseError,
    },

    #[error("invalid measure expression: {0}")]
    Measure(#[source] ParseError),

    #[error(transparent)]
    Limiter(#[from] LimiterError),

    #[error("simulation requires at least one device")]
    EmptyFleet,

    #[error("simulation requires at least one payload field")]
    NoFields,
}

/// Builds the shared composition tree from the configured field list.
///
/// A malformed expression is fatal here, before any client connects.
pub fn build_tree(config: &SimulationConfig) -> Result<Arc<Node>, SimulationError> {
    if config.fields.is_empty() {
        return Err(SimulationError::NoFields);
    }
    let mut collection = Collection::new();
    for field in &config.fields {
        let expr = parse(&field.expression).map_err(|source| SimulationError::Field {
            field: field.name.clone(),
            source,
        })?;
        collection = collection.with(Label::new(&field.name, expr.into()));
    }
    Ok(Arc::new(collection.into()))
}

fn make_client(
    protocol: ProtocolVersion,
    id: &str,
    site: &str,
    host: &str,
    port: u16,
    cancel: &CancellationToken,
) -> Arc<dyn Client> {
    match protocol {
        ProtocolVersion::V3 => Arc::new(MqttV3Client::new(
            id,
            site,
            host,
            port,
            cancel,
            ClientMetrics::noop(),
        )),
        ProtocolVersion::V5 => Arc::new(MqttV5Client::new(
            id,
            site,
            host,
            port,
            cancel,
            ClientMetrics::noop(),
        )),
    }
}

async fn wait_for_deadline(duration: Option<Duration>, cancel: &CancellationToken) {
    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        }
        None => cancel.cancelled().await,
    }
}

/// Runs the publish workload. The returned summary holds publish
/// acknowledgement latencies, or broker round-trip latencies when tracing is
/// enabled: in trace mode each device also subscribes to its own topic and a
/// shared [`BlockingTracer`] times publish-to-delivery.
pub async fn run_publish(
    config: SimulationConfig,
    cancel: CancellationToken,
) -> Result<LatencySummary, SimulationError> {
    if config.device_count == 0 {
        return Err(SimulationError::EmptyFleet);
    }
    let tree = build_tree(&config)?;
    // Validate the limiter parameters once; each device gets its own pump.
    RateLimiter::new(config.limit, config.period)?;

    let latency = Arc::new(LatencyObservable::new());
    let registry = Arc::new(ObserverRegistry::new());
    registry.register(latency.clone());

    let fleet = generate_fleet(&config.site, config.device_count);
    info!(
        devices = fleet.len(),
        protocol = %config.protocol,
        broker = format!("{}:{}", config.broker_host, config.broker_port),
        "starting publish workload"
    );

    let mut tasks = JoinSet::new();
    for device in fleet {
        let client = make_client(
            config.protocol,
            &device.id,
            &device.site,
            &config.broker_host,
            config.broker_port,
            &cancel,
        );
        let environment = Arc::new(Environment::for_device(&device.id, &device.site));
        let topic = Arc::new(Topic::from_pattern(
            &config.topic_pattern,
            &device.site,
            &device.id,
            Arc::new(NoopObservable),
        ));
        let renderer = PayloadRenderer::new(tree.clone(), Arc::new(JsonFormatter::new()));
        let limiter = RateLimiter::new(config.limit, config.period)?;
        let channels = limiter.start(cancel.child_token());

        // In trace mode the registry collects round trips via the tracer;
        // otherwise it collects acknowledgement latency from the publisher.
        let (tracer, monitor): (Arc<dyn Tracer>, Arc<dyn Observable>) = if config.trace {
            (
                Arc::new(BlockingTracer::new(registry.clone())),
                Arc::new(NoopObservable),
            )
        } else {
            (Arc::new(NoopTracer), registry.clone())
        };
        let subscriber = config.trace.then(|| {
            Subscriber::new(
                client.clone(),
                Arc::new(Topic::new(topic.render(), Arc::new(NoopObservable))),
                Arc::new(NoopOutlet),
                tracer.clone(),
                config.qos,
                &cancel,
            )
        });
        let publisher = Publisher::new(
            client.clone(),
            topic,
            renderer,
            environment,
            tracer,
            monitor,
            config.qos,
            config.retain,
            config.renders_per_publish,
            &cancel,
        );

        tasks.spawn(async move {
            if let Err(err) = client.connect().await {
                error!(client = %client.name(), error = %err, "connect failed");
                return;
            }
            if let Some(subscriber) = &subscriber {
                if let Err(err) = subscriber.start().await {
                    error!(client = %client.name(), error = %err, "subscribe failed");
                    return;
                }
            }
            publisher.run(channels).await;
            if let Some(subscriber) = &subscriber {
                if !client.disconnected().is_triggered() {
                    if let Err(err) = subscriber.cancel().await {
                        warn!(client = %client.name(), error = %err, "unsubscribe failed");
                    }
                }
            }
            // The connection may already be gone; disconnecting twice panics.
            if !client.disconnected().is_triggered() {
                if let Err(err) = client.disconnect().await {
                    warn!(client = %client.name(), error = %err, "disconnect failed");
                }
            }
        });
    }

    wait_for_deadline(config.duration, &cancel).await;
    while tasks.join_next().await.is_some() {}

    Ok(latency.summary())
}

/// Runs the subscribe workload and returns a summary of measured values.
pub async fn run_subscribe(
    config: SubscribeConfig,
    cancel: CancellationToken,
) -> Result<LatencySummary, SimulationError> {
    let measurements = Arc::new(LatencyObservable::new());
    let registry = Arc::new(ObserverRegistry::new());
    registry.register(measurements.clone());

    let outlet: Arc<dyn Outlet> = match &config.measure {
        Some(source) => Arc::new(ExpressionOutlet::new(
            parse(source).map_err(SimulationError::Measure)?,
            Arc::new(JsonFormatter::new()),
            registry.clone(),
        )),
        None => Arc::new(LoggingOutlet),
    };

    let client = make_client(
        config.protocol,
        "subscriber-0001",
        "subscriber",
        &config.broker_host,
        config.broker_port,
        &cancel,
    );
    let topic = Arc::new(Topic::new(&config.topic, registry.clone()));
    let subscriber = Subscriber::new(
        client.clone(),
        topic,
        outlet,
        Arc::new(NoopTracer),
        config.qos,
        &cancel,
    );

    info!(
        topic = %config.topic,
        protocol = %config.protocol,
        broker = format!("{}:{}", config.broker_host, config.broker_port),
        "starting subscribe workload"
    );

    if let Err(err) = client.connect().await {
        error!(client = %client.name(), error = %err, "connect failed");
        return Ok(measurements.summary());
    }
    if let Err(err) = subscriber.start().await {
        error!(client = %client.name(), error = %err, "subscribe failed");
        return Ok(measurements.summary());
    }

    wait_for_deadline(config.duration, &cancel).await;

    if let Err(err) = subscriber.cancel().await {
        warn!(client = %client.name(), error = %err, "unsubscribe failed");
    }
    if !client.disconnected().is_triggered() {
        if let Err(err) = client.disconnect().await {
            warn!(client = %client.name(), error = %err, "disconnect failed");
        }
    }

    Ok(measurements.summary())
}
