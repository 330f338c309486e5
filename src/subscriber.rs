//! Subscribe path: routes received messages into an outlet and closes traces.

use crate::client::{Client, ClientError, MessageHandler};
use crate::outlet::Outlet;
use crate::registry::Observable;
use crate::topic::Topic;
use crate::tracer::Tracer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One subscription on one client.
///
/// The message callback forwards payload bytes to the outlet, reports a zero
/// latency observation on the topic, and completes the pending trace. Sharing
/// the tracer with a publisher turns that completion into a broker round-trip
/// measurement.
pub struct Subscriber {
    client: Arc<dyn Client>,
    topic: Arc<Topic>,
    outlet: Arc<dyn Outlet>,
    tracer: Arc<dyn Tracer>,
    qos: u8,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn new(
        client: Arc<dyn Client>,
        topic: Arc<Topic>,
        outlet: Arc<dyn Outlet>,
        tracer: Arc<dyn Tracer>,
        qos: u8,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            client,
            topic,
            outlet,
            tracer,
            qos,
            cancel: parent.child_token(),
        }
    }

    /// Waits for the client to connect, then subscribes once.
    pub async fn start(&self) -> Result<(), ClientError> {
        let connected = self.client.connected();
        let disconnected = self.client.disconnected();
        tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            _ = disconnected.wait() => {
                return Err(ClientError::ConnectionClosed {
                    client: self.client.name().to_string(),
                });
            }
            _ = connected.wait() => {}
        }

        let outlet = self.outlet.clone();
        let topic = self.topic.clone();
        let tracer = self.tracer.clone();
        let client_name = self.client.name().to_string();
        let handler: MessageHandler = Arc::new(move |payload: &[u8]| {
            if let Err(err) = outlet.observe(payload) {
                warn!(client = %client_name, error = %err, "outlet rejected payload");
            }
            topic.observe(0.0);
            tracer.received();
        });

        self.client
            .subscribe(self.topic.render(), self.qos, handler)
            .await
    }

    /// Removes the subscription. Fails when the client's connection has
    /// already closed, since there is no session left to unsubscribe from.
    pub async fn cancel(&self) -> Result<(), ClientError> {
        if self.client.disconnected().is_triggered() {
            return Err(ClientError::ConnectionClosed {
                client: self.client.name().to_string(),
            });
        }
        self.client.unsubscribe(self.topic.render()).await
    }
}
