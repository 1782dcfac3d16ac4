//! Client connection representation.
//!
//! A [`Connection`] is owned by the [`ConnectionRegistry`](super::ConnectionRegistry).
//! Handlers and callbacks never see it directly; they get a cheap
//! [`ConnectionRef`] that can still send back to the peer.

use super::ConnectionId;
use crate::codec;
use crate::error::ServerResult;
use crate::handlers::HandlerRegistry;
use crate::message::NetworkMessage;
use crate::transport::Transport;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Represents one logical peer of a running server session.
///
/// # Fields
///
/// * `connection_id` - Transport-assigned id, unique among live connections
/// * `address` - Remote address as reported by the transport
/// * `host_id` - Server session that accepted the connection
/// * `handlers` - Message handler table used for this peer's inbound traffic
pub struct Connection {
    connection_id: ConnectionId,
    address: String,
    host_id: u32,
    connected: bool,
    connected_at: SystemTime,
    channel: u8,
    transport: Arc<dyn Transport>,
    handlers: Arc<HandlerRegistry>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_id", &self.connection_id)
            .field("address", &self.address)
            .field("host_id", &self.host_id)
            .field("connected", &self.connected)
            .field("connected_at", &self.connected_at)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Connection {
    /// Creates a connection bound to the session `host_id`.
    ///
    /// The connection starts with `handlers` as its handler table; in practice
    /// this is the server-wide table, shared rather than copied, so handlers
    /// registered later are visible too.
    pub fn new(
        connection_id: ConnectionId,
        address: String,
        host_id: u32,
        channel: u8,
        transport: Arc<dyn Transport>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            connection_id,
            address,
            host_id,
            connected: true,
            connected_at: SystemTime::now(),
            channel,
            transport,
            handlers,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn host_id(&self) -> u32 {
        self.host_id
    }

    pub fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    /// Whether the transport session behind this connection is still valid.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Marks the underlying session invalid. Sends fail afterwards.
    pub fn disconnect(&mut self) {
        if self.connected {
            debug!("Connection {} marked disconnected", self.connection_id);
        }
        self.connected = false;
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.handlers.clone()
    }

    /// Replaces this connection's handler table.
    pub fn set_handlers(&mut self, handlers: Arc<HandlerRegistry>) {
        self.handlers = handlers;
    }

    pub fn is_transport_active(&self) -> bool {
        self.transport.is_active()
    }

    /// Hands `data` to the transport for this peer.
    pub fn send(&self, data: &[u8]) -> bool {
        self.connected && self.transport.send(&[self.connection_id], self.channel, data)
    }

    /// Returns a handle that can reach this peer after the registry borrow ends.
    pub fn handle(&self) -> ConnectionRef {
        ConnectionRef {
            connection_id: self.connection_id,
            address: self.address.clone(),
            host_id: self.host_id,
            channel: self.channel,
            transport: self.transport.clone(),
        }
    }
}

/// Lightweight reference to a connection, handed to message handlers.
#[derive(Clone)]
pub struct ConnectionRef {
    pub connection_id: ConnectionId,
    pub address: String,
    pub host_id: u32,
    channel: u8,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("connection_id", &self.connection_id)
            .field("address", &self.address)
            .field("host_id", &self.host_id)
            .field("transport", &"[transport]")
            .finish()
    }
}

impl ConnectionRef {
    /// Sends raw bytes to the peer. No envelope is added.
    pub fn send(&self, data: &[u8]) -> bool {
        self.transport.is_active()
            && self
                .transport
                .send(&[self.connection_id], self.channel, data)
    }

    /// Sends an envelope with the given header fields and payload.
    pub fn send_envelope(&self, msg_type: u16, correlation_id: i32, payload: &[u8]) -> bool {
        self.send(&codec::encode(msg_type, correlation_id, payload))
    }

    /// Serializes `message` and sends it fire-and-forget.
    pub fn send_message<M: NetworkMessage>(&self, message: &M) -> ServerResult<bool> {
        let payload = message.to_payload()?;
        Ok(self.send_envelope(M::MSG_TYPE, codec::NO_CORRELATION, &payload))
    }
}
