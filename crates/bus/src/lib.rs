//! `bus` crate — the fire-and-forget telemetry publish client.
//!
//! A NATS-shaped publish client with a single subject convention
//! (`telemetry.raw.<connection_id>`) and no delivery acknowledgement. Tag
//! writes are fire-and-forget — duplicate suppression lives in
//! `TagOutput` (deadband + heartbeat), not here — so
//! [`BusClient::publish`] hands the payload to a background task and
//! returns immediately rather than awaiting the transport.

pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use nodes::error::NodeError;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use error::BusError;

/// The thing that actually moves bytes to the wire. Swapping this out for a
/// real NATS client is the only change needed to go from this stand-in to a
/// production deployment; nothing above `Transport` knows the difference.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// One message handed to the background publish task.
struct Outgoing {
    subject: String,
    payload: Vec<u8>,
}

/// Fire-and-forget publish client. Construct one per process and clone the
/// handle into every [`nodes::context::ExecutionContext`] — it is cheap to
/// clone (an `mpsc::Sender` and an `Arc`).
#[derive(Clone)]
pub struct BusClient {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl BusClient {
    /// Spawn the background publish loop over `transport` and return a
    /// handle. The loop runs until every `BusClient` clone (and therefore
    /// every sender) is dropped.
    #[must_use]
    pub fn spawn(transport: Arc<dyn Transport>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(err) = transport.send(&msg.subject, msg.payload).await {
                    warn!(subject = %msg.subject, error = %err, "bus publish failed, dropping message");
                } else {
                    debug!(subject = %msg.subject, "bus publish delivered");
                }
            }
        });

        Self { tx }
    }

    /// Publish `payload` on `subject`. Returns as soon as the message is
    /// queued, not when (or whether) the transport has sent it — tag writes
    /// are fire-and-forget on the bus.
    pub fn publish(&self, subject: &str, payload: &Value) -> Result<(), BusError> {
        let bytes = serde_json::to_vec(payload).map_err(|e| BusError::Serialize(e.to_string()))?;
        self.tx
            .send(Outgoing { subject: subject.to_string(), payload: bytes })
            .map_err(|_| BusError::ChannelClosed)
    }
}

#[async_trait]
impl nodes::context::Publisher for BusClient {
    async fn publish(&self, subject: &str, payload: Value) -> Result<(), NodeError> {
        BusClient::publish(self, subject, &payload).map_err(|e| NodeError::Transient(e.to_string()))
    }
}

/// A [`Transport`] that never leaves the process: messages are recorded in
/// order and can be inspected by tests, in place of a live NATS broker.
pub struct InProcessTransport {
    sent: std::sync::Mutex<Vec<(String, Vec<u8>)>>,
}

impl InProcessTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sent: std::sync::Mutex::new(Vec::new()) })
    }

    #[must_use]
    pub fn messages(&self) -> Vec<(String, Value)> {
        self.sent
            .lock()
            .expect("in-process transport mutex poisoned")
            .iter()
            .map(|(subject, bytes)| {
                let value = serde_json::from_slice(bytes).unwrap_or(Value::Null);
                (subject.clone(), value)
            })
            .collect()
    }
}

impl Default for InProcessTransport {
    fn default() -> Self {
        Self { sent: std::sync::Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.sent
            .lock()
            .expect("in-process transport mutex poisoned")
            .push((subject.to_string(), payload));
        Ok(())
    }
}

/// A [`Transport`] that always fails, for exercising the "log and continue"
/// policy on a transient bus error.
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _subject: &str, _payload: Vec<u8>) -> Result<(), BusError> {
        Err(BusError::Unavailable("simulated transport failure".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_is_delivered_asynchronously() {
        let transport = InProcessTransport::new();
        let client = BusClient::spawn(transport.clone());

        client
            .publish("telemetry.raw.conn-1", &serde_json::json!({"v": 5, "q": 0}))
            .expect("queue send should succeed");

        // The background task needs a tick to drain the channel.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let messages = transport.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "telemetry.raw.conn-1");
        assert_eq!(messages[0].1, serde_json::json!({"v": 5, "q": 0}));
    }

    #[tokio::test]
    async fn failing_transport_does_not_panic_the_loop() {
        let client = BusClient::spawn(Arc::new(FailingTransport));
        // publish still succeeds from the caller's point of view — the
        // failure happens asynchronously in the background task.
        client
            .publish("telemetry.raw.conn-1", &serde_json::json!({"v": 1, "q": 0}))
            .expect("queue send should succeed even if delivery later fails");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
