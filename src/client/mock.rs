//! In-process fake client for publisher and subscriber tests.

use super::{
    BrokerConnection, Client, ClientError, ConnectionNotifier, HandlerTable, MessageHandler,
    MessagePublisher, MessageSubscriber, Signal,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// Broker-less [`Client`] that records publishes and lets tests inject
/// incoming messages with [`deliver`](MockClient::deliver).
pub struct MockClient {
    name: String,
    site: String,
    connected: Signal,
    disconnected: Signal,
    publishes: mpsc::UnboundedSender<PublishedMessage>,
    fail_publish: AtomicBool,
    handlers: HandlerTable,
    subscriptions: Mutex<Vec<String>>,
    observed: Mutex<Vec<f64>>,
}

impl MockClient {
    pub fn new(
        name: impl Into<String>,
        site: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PublishedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            name: name.into(),
            site: site.into(),
            connected: Signal::new(),
            disconnected: Signal::new(),
            publishes: tx,
            fail_publish: AtomicBool::new(false),
            handlers: HandlerTable::new(),
            subscriptions: Mutex::new(Vec::new()),
            observed: Mutex::new(Vec::new()),
        });
        (client, rx)
    }

    /// Makes every subsequent publish fail.
    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    /// Routes a message to the registered handlers, as the event loop would.
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        self.handlers.dispatch(topic, payload);
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().clone()
    }

    pub fn observed(&self) -> Vec<f64> {
        self.observed.lock().clone()
    }
}

#[async_trait]
impl BrokerConnection for MockClient {
    async fn connect(&self) -> Result<(), ClientError> {
        self.connected.trigger();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        self.disconnected.trigger();
        Ok(())
    }
}

impl ConnectionNotifier for MockClient {
    fn connected(&self) -> Signal {
        self.connected.clone()
    }

    fn disconnected(&self) -> Signal {
        self.disconnected.clone()
    }
}

#[async_trait]
impl MessagePublisher for MockClient {
    async fn publish(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), ClientError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(ClientError::Publish("mock publish failure".to_string()));
        }
        let _ = self.publishes.send(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retain,
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl MessageSubscriber for MockClient {
    async fn subscribe(
        &self,
        topic: &str,
        _qos: u8,
        on_receive: MessageHandler,
    ) -> Result<(), ClientError> {
        self.handlers.register(topic, on_receive);
        self.subscriptions.lock().push(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), ClientError> {
        self.handlers.unregister(topic);
        self.subscriptions.lock().retain(|t| t != topic);
        Ok(())
    }
}

impl Client for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn site(&self) -> &str {
        &self.site
    }

    fn observe(&self, value: f64) {
        self.observed.lock().push(value);
    }
}
