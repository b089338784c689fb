use crate::error::TransportError;
use crate::event::{InboundEvent, OutboundEvent};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Guarded delivery path used by log sources.
///
/// Sources never see connection state beyond `is_connected`. Failures are
/// handled behind `send` (the implementation reconnects), so it never fails.
pub trait Outbox: Send + Sync {
    /// Whether delivery is currently possible
    fn is_connected(&self) -> bool;

    /// Send an event, fire-and-forget
    fn send(&self, event: OutboundEvent);
}

/// Write half of one live collector connection
pub trait DeliveryChannel: Send + Sync {
    /// Queue an event for the collector.
    ///
    /// Fails when the connection is not writable.
    fn emit(&self, event: &OutboundEvent) -> Result<(), TransportError>;
}

/// Opens collector connections
pub trait Connector: Send + Sync {
    /// Start opening a connection and return its write half right away.
    ///
    /// Lifecycle and inbound events for this connection are reported through
    /// `events` as they happen. Called with the connection state locked, so it
    /// must neither block on I/O nor call back into the caller.
    fn open(&self, events: ConnectionEvents) -> Arc<dyn DeliveryChannel>;
}

/// Something that happened on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; the channel is writable
    Connected,
    /// The connection failed or broke
    Error(String),
    /// The peer closed the connection
    Closed,
    /// A control event from the collector
    Message(InboundEvent),
}

/// A transport event tagged with the connection it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub generation: u64,
    pub kind: TransportEvent,
}

/// Event sink handed to a connector for one connection
#[derive(Debug, Clone)]
pub struct ConnectionEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionEvents {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ConnectionEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Returns false once nobody is listening anymore.
    pub fn report(&self, kind: TransportEvent) -> bool {
        self.tx
            .send(ConnectionEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}
