//! MQTT v5.0 client wrapping `rumqttc`'s v5 async client.
//!
//! Structurally parallel to [`super::v3::MqttV3Client`] but kept independent;
//! the two protocol clients share traits, not code. One behavioural
//! difference: unsubscribe removes the local handler before the broker call,
//! so a message racing the unsubscribe is dropped rather than delivered to a
//! handler that is being torn down.

use super::{
    qos_v5_from_u8, BrokerConnection, Client, ClientError, ClientMetrics, ConnectionNotifier,
    ConnectionState, HandlerTable, MessageHandler, MessagePublisher, MessageSubscriber, Signal,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::{AsyncClient, Event, EventLoop, MqttOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct MqttV5Client {
    name: String,
    site: String,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    cancel: CancellationToken,
    connected: Signal,
    disconnected: Signal,
    state: Arc<Mutex<ConnectionState>>,
    handlers: Arc<HandlerTable>,
    metrics: ClientMetrics,
}

impl MqttV5Client {
    pub fn new(
        name: impl Into<String>,
        site: impl Into<String>,
        host: &str,
        port: u16,
        parent: &CancellationToken,
        metrics: ClientMetrics,
    ) -> Self {
        let name = name.into();
        let mut options = MqttOptions::new(&name, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);
        let (client, event_loop) = AsyncClient::new(options, 64);

        Self {
            name,
            site: site.into(),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            cancel: parent.child_token(),
            connected: Signal::new(),
            disconnected: Signal::new(),
            state: Arc::new(Mutex::new(ConnectionState::NotConnected)),
            handlers: Arc::new(HandlerTable::new()),
            metrics,
        }
    }
}

#[async_trait]
impl BrokerConnection for MqttV5Client {
    async fn connect(&self) -> Result<(), ClientError> {
        // A second connect takes from an empty slot; double-connect panics.
        let mut event_loop = self
            .event_loop
            .lock()
            .take()
            .expect("client connected twice");

        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), ClientError>>();
        let cancel = self.cancel.clone();
        let connected = self.connected.clone();
        let disconnected = self.disconnected.clone();
        let state = self.state.clone();
        let handlers = self.handlers.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut ready = Some(ready_tx);
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = event_loop.poll() => event,
                };

                match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        if ack.code == ConnectReturnCode::Success {
                            if *state.lock() == ConnectionState::NotConnected {
                                *state.lock() = ConnectionState::Connected;
                                connected.trigger();
                            }
                            if let Some(tx) = ready.take() {
                                let _ = tx.send(Ok(()));
                            }
                        } else {
                            if let Some(tx) = ready.take() {
                                let _ = tx.send(Err(ClientError::Connect(format!(
                                    "broker refused connection: {:?}",
                                    ack.code
                                ))));
                            }
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let topic = String::from_utf8_lossy(&publish.topic);
                        handlers.dispatch(&topic, &publish.payload);
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if let Some(tx) = ready.take() {
                            // Failed before the handshake; the client stays
                            // NotConnected.
                            let _ = tx.send(Err(ClientError::Connect(err.to_string())));
                            break;
                        }
                        if cancel.is_cancelled() {
                            break;
                        }
                        warn!(client = %name, error = %err, "mqtt v5 connection lost");
                        *state.lock() = ConnectionState::Disconnected;
                        disconnected.trigger();
                        break;
                    }
                }
            }
        });

        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = ready_rx => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Connect("connection task exited".to_string())),
            },
        }
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let _ = self.client.disconnect().await;
        self.cancel.cancel();
        *self.state.lock() = ConnectionState::Disconnected;
        self.disconnected.trigger();
        Ok(())
    }
}

impl ConnectionNotifier for MqttV5Client {
    fn connected(&self) -> Signal {
        self.connected.clone()
    }

    fn disconnected(&self) -> Signal {
        self.disconnected.clone()
    }
}

#[async_trait]
impl MessagePublisher for MqttV5Client {
    async fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        let qos = qos_v5_from_u8(qos)?;
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = self.client.publish(topic, qos, retain, payload) => {
                result.map_err(|e| ClientError::Publish(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl MessageSubscriber for MqttV5Client {
    async fn subscribe(
        &self,
        topic: &str,
        qos: u8,
        on_receive: MessageHandler,
    ) -> Result<(), ClientError> {
        let qos = qos_v5_from_u8(qos)?;
        self.handlers.register(topic, on_receive);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = self.client.subscribe(topic, qos) => {
                result.map_err(|e| ClientError::Subscribe(e.to_string()))
            }
        };
        if result.is_err() {
            self.handlers.unregister(topic);
        }
        result
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        // Drop the handler first so nothing in flight is routed to it while
        // the broker processes the unsubscribe.
        self.handlers.unregister(topic);
        tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            result = self.client.unsubscribe(topic) => {
                result.map_err(|e| ClientError::Unsubscribe(e.to_string()))
            }
        }
    }
}

impl Client for MqttV5Client {
    fn name(&self) -> &str {
        &self.name
    }

    fn site(&self) -> &str {
        &self.site
    }

    fn observe(&self, value: f64) {
        self.metrics.observe(value);
    }
}
