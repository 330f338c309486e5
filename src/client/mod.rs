//! MQTT client abstraction unifying the v3.1.1 and v5.0 protocol clients.
//!
//! One set of traits, two independent implementations ([`v3::MqttV3Client`]
//! and [`v5::MqttV5Client`]) wrapping `rumqttc`'s respective async clients.
//! The wire protocol itself is delegated entirely to `rumqttc`; this layer
//! only selects QoS, retain flag, topic, and payload, and adds connection
//! lifecycle signals plus cancellation-aware operation waits.

pub mod v3;
pub mod v5;

#[cfg(test)]
pub mod mock;

use crate::registry::Observable;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Callback invoked with the raw payload of each received message.
pub type MessageHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to broker: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("unsubscribe failed: {0}")]
    Unsubscribe(String),

    #[error("connection to client {client} already closed")]
    ConnectionClosed { client: String },

    #[error("invalid qos level {0} (must be 0, 1, or 2)")]
    InvalidQoS(u8),
}

/// Connection lifecycle of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connected,
    Disconnected,
}

/// One-shot lifecycle notification, the channel-close idiom behind
/// `connected()`/`disconnected()`.
///
/// Triggering a signal twice panics; each lifecycle half transitions exactly
/// once and re-triggering is deliberately unguarded.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    token: CancellationToken,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        if self.token.is_cancelled() {
            panic!("lifecycle signal triggered twice");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal has been triggered; completes immediately if
    /// it already has.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Exposes the connect/disconnect lifecycle signals.
pub trait ConnectionNotifier: Send + Sync {
    fn connected(&self) -> Signal;
    fn disconnected(&self) -> Signal;
}

#[async_trait]
pub trait BrokerConnection: ConnectionNotifier {
    /// Establishes the broker session. A failed connect leaves the client
    /// `NotConnected`; a cancelled connect returns `Ok(())`.
    async fn connect(&self) -> Result<(), ClientError>;

    /// Tears the session down and fires the `disconnected` signal.
    async fn disconnect(&self) -> Result<(), ClientError>;
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ClientError>;
}

#[async_trait]
pub trait MessageSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        topic: &str,
        qos: u8,
        on_receive: MessageHandler,
    ) -> Result<(), ClientError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError>;
}

/// Full client surface consumed by publishers and subscribers.
pub trait Client: BrokerConnection + MessagePublisher + MessageSubscriber {
    fn name(&self) -> &str;
    fn site(&self) -> &str;

    /// Reports an acknowledgement latency to the client's metric fan-out.
    fn observe(&self, value: f64);
}

/// Latency fan-out shared by every client: one observation goes to the
/// client's own metric, its broker's, and its site's.
pub struct ClientMetrics {
    pub client: Arc<dyn Observable>,
    pub broker: Arc<dyn Observable>,
    pub site: Arc<dyn Observable>,
}

impl ClientMetrics {
    pub fn noop() -> Self {
        use crate::registry::NoopObservable;
        Self {
            client: Arc::new(NoopObservable),
            broker: Arc::new(NoopObservable),
            site: Arc::new(NoopObservable),
        }
    }

    pub fn observe(&self, value: f64) {
        self.client.observe(value);
        self.broker.observe(value);
        self.site.observe(value);
    }
}

/// Per-topic message handler table used by both protocol clients to route
/// incoming publishes.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, MessageHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, filter: &str, handler: MessageHandler) {
        self.handlers.write().insert(filter.to_string(), handler);
    }

    pub fn unregister(&self, filter: &str) {
        self.handlers.write().remove(filter);
    }

    /// Invokes every handler whose filter matches `topic`.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handlers = self.handlers.read();
        for (filter, handler) in handlers.iter() {
            if topic_matches(filter, topic) {
                handler(payload);
            }
        }
    }
}

/// MQTT topic filter matching, including `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

pub(crate) fn qos_from_u8(qos: u8) -> Result<rumqttc::QoS, ClientError> {
    match qos {
        0 => Ok(rumqttc::QoS::AtMostOnce),
        1 => Ok(rumqttc::QoS::AtLeastOnce),
        2 => Ok(rumqttc::QoS::ExactlyOnce),
        other => Err(ClientError::InvalidQoS(other)),
    }
}

pub(crate) fn qos_v5_from_u8(qos: u8) -> Result<rumqttc::v5::mqttbytes::QoS, ClientError> {
    match qos {
        0 => Ok(rumqttc::v5::mqttbytes::QoS::AtMostOnce),
        1 => Ok(rumqttc::v5::mqttbytes::QoS::AtLeastOnce),
        2 => Ok(rumqttc::v5::mqttbytes::QoS::ExactlyOnce),
        other => Err(ClientError::InvalidQoS(other)),
    }
}
