//! Broker transport boundary.

use crate::error::TransportError;
use crate::manifest::Manifest;

/// Outbound half of the broker connection.
///
/// The inbound half calls back into [`AgentCore`](crate::AgentCore):
/// lifecycle signals go to `on_connection_event`, frames to
/// `on_inbound_frame`. Implementations must serialize physical writes;
/// `send` is called concurrently from handler threads.
pub trait Transport: Send + Sync {
    /// Start the handshake. Completion is signaled through
    /// `AgentCore::on_connection_event`.
    fn open(&self, manifest: &Manifest) -> Result<(), TransportError>;

    /// Start an orderly teardown.
    fn close(&self) -> Result<(), TransportError>;

    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// A frame delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
