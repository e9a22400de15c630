//! The shared publish/subscribe channel, as the dispatcher sees it.
//!
//! The dispatcher only needs to publish on the request topic, to know
//! whether the link is up, and to be fed inbound messages. The MQTT client
//! that implements this lives outside the crate; [`MemoryTransport`] stands
//! in for it in tests and local tooling.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// Outbound topic for every request envelope.
pub const REQUEST_TOPIC: &str = "/ls_req";

/// Inbound topic carrying every response envelope.
pub const RESPONSE_TOPIC: &str = "/ls_resp";

/// One message delivered by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Publish side of the realtime channel. Publishes are QoS 1, not retained.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

/// A message the memory transport accepted for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

/// In-process transport: every publish is forwarded to a receiver.
#[derive(Debug)]
pub struct MemoryTransport {
    connected: AtomicBool,
    outbound: mpsc::UnboundedSender<PublishedMessage>,
    fail_next: Mutex<Option<String>>,
}

impl MemoryTransport {
    /// A connected transport and the receiving end of its publishes.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connected: AtomicBool::new(true),
                outbound: tx,
                fail_next: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Make the next publish fail with `reason`.
    pub fn fail_next_publish(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl RealtimeTransport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(TransportError::Publish(reason));
        }
        self.outbound
            .send(PublishedMessage {
                topic: topic.to_string(),
                payload: payload.to_string(),
            })
            .map_err(|_| TransportError::Publish("receiver dropped".to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
