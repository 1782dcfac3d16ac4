//! # Relay Server - Callback-Correlated Message Dispatch
//!
//! A message dispatch core that layers request/response semantics and
//! broadcast completion tracking on top of an unordered, connection-oriented
//! transport. The crate never touches sockets itself: it drives a
//! [`Transport`] and consumes the [`TransportEvent`]s that transport reports.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Wire Codec** ([`codec`]) - `[u16 msg_type][i32 correlation_id][payload]`, little-endian
//! * **Connection Registry** ([`ConnectionRegistry`]) - Live connections keyed by transport id
//! * **Callback Table** ([`CallbackTable`]) - Pending responses and the timeout sweep
//! * **Broadcast Aggregator** ([`BroadcastAggregator`]) - Completion tracking for "send to all"
//! * **Dispatcher** ([`RelayServer`]) - Lifecycle state machine and inbound routing
//! * **Runtime** ([`runtime`]) - A tokio task that owns the server and serializes all access
//!
//! ### Message Flow
//!
//! 1. The transport reports `Data(connection_id, bytes)`
//! 2. The dispatcher decodes the envelope header
//! 3. A non-zero correlation id with a pending callback resolves that callback
//! 4. Anything else goes to the handler registered for the message type
//! 5. A periodic tick expires overdue callbacks and broadcast groups
//!
//! ### Handler Registration
//!
//! ```rust
//! use relay_server::{create_server, IncomingMessage, MemoryTransport};
//! use std::sync::Arc;
//!
//! let server = create_server(Arc::new(MemoryTransport::new()));
//! server.register_handler(1, |message: IncomingMessage| {
//!     message.reply_bytes(2, message.payload());
//!     Ok(())
//! });
//! ```
//!
//! ## Error Handling
//!
//! Transport and protocol anomalies (unknown connections, malformed frames,
//! stale responses) are logged and dropped; the public send API reports them
//! as `false`. The only hard failure is a transport that cannot start, which
//! surfaces as [`ServerError::Transport`] from [`RelayServer::start`].
//! Timeouts reach callers as a status value, never as an error.
//!
//! ## Thread Safety
//!
//! [`RelayServer`] takes `&mut self` for everything that mutates session
//! state. Run it through [`runtime::spawn`] to share it across tasks: the
//! returned [`ServerHandle`] funnels every call into the owning task.

pub use broadcast::{group_callback, BroadcastAggregator, BroadcastGroup, GroupCallback, GroupId};
pub use callbacks::{callback, CallbackHandler, CallbackOutcome, CallbackStatus, CallbackTable};
pub use codec::{Envelope, HEADER_LEN, NO_CORRELATION};
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionRef, ConnectionRegistry};
pub use error::{ServerError, ServerResult};
pub use handlers::{HandlerRegistry, MessageHandler};
pub use message::{IncomingMessage, NetworkMessage};
pub use runtime::{spawn, ServerHandle};
pub use server::{RelayServer, ServerState, ServerStats};
pub use transport::{event_channel, EventReceiver, EventSender, MemoryTransport, Transport, TransportEvent};

pub mod broadcast;
pub mod callbacks;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod message;
pub mod runtime;
pub mod server;
pub mod transport;

use std::sync::Arc;

/// Creates a new relay server with default configuration.
///
/// # Returns
///
/// A stopped [`RelayServer`] over `transport`.
pub fn create_server(transport: Arc<dyn Transport>) -> RelayServer {
    create_server_with_config(ServerConfig::default(), transport)
}

/// Creates a new relay server with custom configuration.
///
/// # Arguments
///
/// * `config` - Timing and channel configuration
/// * `transport` - The transport the server drives
pub fn create_server_with_config(config: ServerConfig, transport: Arc<dyn Transport>) -> RelayServer {
    RelayServer::new(config, transport)
}
