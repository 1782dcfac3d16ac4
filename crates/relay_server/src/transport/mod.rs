//! Transport collaborator abstraction.
//!
//! The relay core never touches sockets. It drives a [`Transport`] for
//! lifecycle and outbound bytes, and consumes [`TransportEvent`]s that the
//! transport pushes into an unbounded tokio channel.

pub mod memory;

pub use memory::MemoryTransport;

use crate::connection::ConnectionId;
use std::io;
use tokio::sync::mpsc;

/// Sender half handed to transports for reporting inbound events.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half consumed by the server task.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates the channel a transport uses to report inbound events.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Raw connection lifecycle and byte delivery.
///
/// All methods are synchronous and must not block: `send` queues bytes and
/// reports whether they were accepted.
pub trait Transport: Send + Sync {
    /// Starts listening. Failure here is fatal for the server start.
    fn start(&self) -> io::Result<()>;

    /// Stops listening and drops every client.
    fn stop(&self);

    /// Whether the transport is currently listening.
    fn is_active(&self) -> bool;

    /// Queues `data` for every connection in `connection_ids` on `channel`.
    fn send(&self, connection_ids: &[ConnectionId], channel: u8, data: &[u8]) -> bool;

    /// Remote address of a client, for informational purposes.
    fn client_address(&self, connection_id: ConnectionId) -> String;
}

/// Inbound event reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    Disconnected(ConnectionId),
    Data(ConnectionId, Vec<u8>),
    Error(ConnectionId, String),
}

impl TransportEvent {
    pub fn connection_id(&self) -> ConnectionId {
        match self {
            TransportEvent::Connected(id)
            | TransportEvent::Disconnected(id)
            | TransportEvent::Data(id, _)
            | TransportEvent::Error(id, _) => *id,
        }
    }
}
