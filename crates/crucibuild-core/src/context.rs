//! Response context handed to command handlers.

use crate::agent::Shared;
use crate::error::Result;
use crate::message::Message;
use crate::types::TypeHandle;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Context for one dispatched command.
///
/// Bound to the originating topic and a correlation id unique within the
/// agent. Handlers use it to answer with zero or more events.
pub struct CommandContext {
    topic: String,
    correlation_id: u64,
    shared: Arc<Shared>,
    events_sent: AtomicUsize,
}

impl CommandContext {
    pub(crate) fn new(topic: impl Into<String>, correlation_id: u64, shared: Arc<Shared>) -> Self {
        Self {
            topic: topic.into(),
            correlation_id,
            shared,
            events_sent: AtomicUsize::new(0),
        }
    }

    /// Topic the command arrived on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Encode `event` and send it on the bus.
    ///
    /// Encode and transport failures are returned to the caller.
    pub fn send_event<E: Message>(&self, ty: &TypeHandle<E>, event: &E) -> Result<()> {
        self.shared.send(ty, event)?;
        self.events_sent.fetch_add(1, Ordering::Relaxed);
        debug!(
            command = %self.topic,
            correlation_id = self.correlation_id,
            event = ty.name(),
            "event sent"
        );
        Ok(())
    }

    /// Events successfully sent through this context so far.
    pub fn events_sent(&self) -> usize {
        self.events_sent.load(Ordering::Relaxed)
    }

    /// A context whose transport is always closed.
    #[cfg(test)]
    pub(crate) fn detached(topic: &str, correlation_id: u64) -> Self {
        use crate::codec::JsonCodec;
        use crate::error::TransportError;
        use crate::manifest::Manifest;
        use crate::transport::Transport;

        struct Closed;

        impl Transport for Closed {
            fn open(&self, _: &Manifest) -> Result<(), TransportError> {
                Err(TransportError::Closed)
            }

            fn close(&self) -> Result<(), TransportError> {
                Ok(())
            }

            fn send(&self, _: &str, _: Vec<u8>) -> Result<(), TransportError> {
                Err(TransportError::Closed)
            }
        }

        Self::new(
            topic,
            correlation_id,
            Arc::new(Shared::new(Arc::new(JsonCodec), Arc::new(Closed))),
        )
    }
}
