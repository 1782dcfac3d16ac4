//! Core relay server implementation.
//!
//! `RelayServer` owns all state of one server instance: the connection
//! registry, the pending callback table and the active broadcast groups.
//! Every method takes `&mut self`, so whoever owns the server serializes
//! events, ticks and sends by construction. [`crate::runtime`] hands the
//! server to a single tokio task for exactly that reason.

use super::{ServerState, ServerStats};
use crate::broadcast::BroadcastAggregator;
use crate::callbacks::CallbackTable;
use crate::codec::{self, NO_CORRELATION};
use crate::config::ServerConfig;
use crate::connection::{Connection, ConnectionId, ConnectionRegistry};
use crate::error::{ServerError, ServerResult};
use crate::handlers::HandlerRegistry;
use crate::message::{IncomingMessage, NetworkMessage};
use crate::transport::{Transport, TransportEvent};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The relay server.
///
/// # Lifecycle
///
/// `Stopped → Starting → Listening → Stopped`. [`RelayServer::start`] brings
/// the transport up and allocates fresh session state;
/// [`RelayServer::stop`] tears it down. Pending callbacks and broadcast
/// groups outstanding at stop are abandoned without being invoked.
///
/// # Dispatch
///
/// Inbound data is decoded into an envelope. A non-zero correlation id that
/// matches a pending callback resolves that callback (and advances its
/// broadcast group, if any); everything else is routed to the handler
/// registered for the envelope's message type on the sender's connection.
pub struct RelayServer {
    pub(super) config: ServerConfig,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) handlers: Arc<HandlerRegistry>,
    pub(super) state: ServerState,
    pub(super) sessions_started: u32,
    pub(super) connections: ConnectionRegistry,
    pub(super) callbacks: CallbackTable,
    pub(super) broadcasts: BroadcastAggregator,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("connections", &self.connections.len())
            .field("pending_callbacks", &self.callbacks.len())
            .field("active_broadcasts", &self.broadcasts.len())
            .finish()
    }
}

impl RelayServer {
    /// Creates a stopped server over `transport`.
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_handlers(config, transport, Arc::new(HandlerRegistry::new()))
    }

    /// Creates a stopped server that dispatches through an existing handler table.
    pub fn with_handlers(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            config,
            transport,
            handlers,
            state: ServerState::Stopped,
            sessions_started: 0,
            connections: ConnectionRegistry::new(),
            callbacks: CallbackTable::new(),
            broadcasts: BroadcastAggregator::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == ServerState::Listening
    }

    /// Identifier of the current transport session, if listening.
    pub fn host_id(&self) -> Option<u32> {
        self.is_listening().then_some(self.sessions_started)
    }

    /// The server-wide handler table.
    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.handlers.clone()
    }

    /// Registers `handler` for `msg_type`, replacing any previous handler.
    pub fn register_handler<F>(&self, msg_type: u16, handler: F) -> bool
    where
        F: Fn(IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.handlers.register(msg_type, handler)
    }

    /// Registers a handler receiving the payload decoded as `M`.
    pub fn register_message_handler<M, F>(&self, handler: F) -> bool
    where
        M: NetworkMessage + 'static,
        F: Fn(M, IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.handlers.register_typed::<M, F>(handler)
    }

    /// Starts the transport and opens a fresh session.
    ///
    /// # Errors
    ///
    /// * [`ServerError::InvalidState`] unless the server is stopped
    /// * [`ServerError::Transport`] if the transport fails to start; the server
    ///   stays stopped
    pub fn start(&mut self) -> ServerResult<()> {
        if self.state != ServerState::Stopped {
            return Err(ServerError::InvalidState(self.state));
        }

        info!("🚀 Starting relay server");
        self.state = ServerState::Starting;

        if let Err(e) = self.transport.start() {
            self.state = ServerState::Stopped;
            error!("❌ Transport failed to start: {}", e);
            return Err(ServerError::Transport(e.to_string()));
        }

        self.connections = ConnectionRegistry::new();
        self.callbacks = CallbackTable::new();
        self.broadcasts = BroadcastAggregator::new();
        self.sessions_started = self.sessions_started.wrapping_add(1);
        self.state = ServerState::Listening;

        info!("✅ Relay server listening (session {})", self.sessions_started);
        Ok(())
    }

    /// Drops every connection, stops the transport and abandons pending work.
    pub fn stop(&mut self) {
        if self.state == ServerState::Stopped {
            debug!("Relay server already stopped");
            return;
        }

        info!("🛑 Stopping relay server");
        self.connections.clear();
        self.transport.stop();

        let abandoned_callbacks = self.callbacks.clear();
        let abandoned_groups = self.broadcasts.clear();
        if abandoned_callbacks > 0 || abandoned_groups > 0 {
            warn!(
                "⚠️ Abandoned {} pending callback(s) and {} broadcast group(s) on stop",
                abandoned_callbacks, abandoned_groups
            );
        }

        self.state = ServerState::Stopped;
        info!("Relay server stopped");
    }

    /// Processes one inbound transport event.
    ///
    /// Anomalies are logged and the event is dropped; nothing here can stop
    /// the dispatch loop.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected(connection_id) => {
                if let Err(e) = self.handle_connect(connection_id) {
                    warn!("⚠️ Connect from {} dropped: {}", connection_id, e);
                }
            }
            TransportEvent::Disconnected(connection_id) => {
                if let Err(e) = self.handle_disconnect(connection_id) {
                    debug!("Disconnect from {} ignored: {}", connection_id, e);
                }
            }
            TransportEvent::Data(connection_id, data) => {
                if let Err(e) = self.handle_data(connection_id, &data) {
                    match e {
                        ServerError::Handler(_) | ServerError::Serialization(_) => {
                            error!("❌ Handler failed for connection {}: {}", connection_id, e)
                        }
                        _ => warn!("⚠️ Data from connection {} dropped: {}", connection_id, e),
                    }
                }
            }
            TransportEvent::Error(connection_id, err) => {
                error!("❌ Transport error on connection {}: {}", connection_id, err);
            }
        }
    }

    pub(crate) fn handle_connect(&mut self, connection_id: ConnectionId) -> ServerResult<()> {
        if self.state != ServerState::Listening {
            return Err(ServerError::InvalidState(self.state));
        }

        let address = self.transport.client_address(connection_id);
        info!("👋 Client connected: {} from {}", connection_id, address);

        let connection = Connection::new(
            connection_id,
            address,
            self.sessions_started,
            self.config.channel,
            self.transport.clone(),
            self.handlers.clone(),
        );
        self.connections.try_add(connection)
    }

    pub(crate) fn handle_disconnect(&mut self, connection_id: ConnectionId) -> ServerResult<()> {
        let connection = self
            .connections
            .get_mut(connection_id)
            .ok_or(ServerError::UnknownConnection(connection_id))?;

        connection.disconnect();
        self.connections.remove(connection_id);
        info!("👋 Client disconnected: {}", connection_id);
        Ok(())
    }

    pub(crate) fn handle_data(&mut self, connection_id: ConnectionId, data: &[u8]) -> ServerResult<()> {
        let (msg_type, correlation_id, payload) = codec::decode(data)?;

        let connection = self
            .connections
            .get(connection_id)
            .ok_or(ServerError::UnknownConnection(connection_id))?;
        let handlers = connection.handlers();
        let message = IncomingMessage::new(connection.handle(), msg_type, correlation_id, payload.to_vec());

        let pending = match correlation_id {
            NO_CORRELATION => None,
            id => self.callbacks.get(id),
        };
        if let Some(pending) = pending {
            // Any connection may answer; a reply from elsewhere still resolves.
            if let Some(target) = pending.target.filter(|target| *target != connection_id) {
                warn!(
                    "⚠️ Callback {} was sent to connection {} but answered by {}",
                    correlation_id, target, connection_id
                );
            }
            self.callbacks.resolve(correlation_id, message);
            self.broadcasts.notify_resolved(correlation_id);
            return Ok(());
        }

        match handlers.get(msg_type) {
            Some(handler) => {
                debug!(
                    "📨 Routing message type {} from connection {}",
                    msg_type, connection_id
                );
                handler.handle(message)
            }
            // Most likely the answer to a request that already timed out.
            None if correlation_id != NO_CORRELATION => Err(ServerError::StaleResponse(correlation_id)),
            None => {
                warn!(
                    "⚠️ No handler for message type {} from connection {}",
                    msg_type, connection_id
                );
                Ok(())
            }
        }
    }

    /// Runs one timeout sweep against the current time.
    pub fn tick(&mut self) {
        self.check_callback_timeouts(Instant::now());
    }

    /// Expires every pending callback, then every broadcast group, whose
    /// deadline is before `now`.
    pub fn check_callback_timeouts(&mut self, now: Instant) {
        let expired_callbacks = self.callbacks.sweep(now);
        let expired_groups = self.broadcasts.sweep(now);

        if !expired_callbacks.is_empty() || !expired_groups.is_empty() {
            debug!(
                "⌛ Sweep expired {} callback(s) and {} broadcast group(s)",
                expired_callbacks.len(),
                expired_groups.len()
            );
        }
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.ids()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Address of a client as reported by the transport.
    pub fn connection_info(&self, connection_id: ConnectionId) -> String {
        self.transport.client_address(connection_id)
    }

    /// Gives one connection its own handler table.
    pub fn set_connection_handlers(
        &mut self,
        connection_id: ConnectionId,
        handlers: Arc<HandlerRegistry>,
    ) -> bool {
        match self.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.set_handlers(handlers);
                true
            }
            None => {
                warn!("⚠️ Cannot set handlers: unknown connection {}", connection_id);
                false
            }
        }
    }

    pub fn pending_callbacks(&self) -> usize {
        self.callbacks.len()
    }

    pub fn active_broadcasts(&self) -> usize {
        self.broadcasts.len()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            state: self.state,
            host_id: self.host_id(),
            connections: self.connections.len(),
            pending_callbacks: self.callbacks.len(),
            active_broadcasts: self.broadcasts.len(),
            registered_handlers: self.handlers.len(),
        }
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if self.state != ServerState::Stopped {
            self.stop();
        }
    }
}
