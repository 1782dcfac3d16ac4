//! Async driver for a [`RelayServer`].
//!
//! [`spawn`] moves the server into a single tokio task that owns it
//! exclusively. Transport events, API commands and the sweep ticker are
//! multiplexed in that task, so no two of them ever touch server state at the
//! same time. [`ServerHandle`] is the cloneable front door: every call becomes
//! a [`Command`] on a channel and is answered through a oneshot.

use crate::broadcast::GroupCallback;
use crate::callbacks::CallbackHandler;
use crate::connection::ConnectionId;
use crate::error::{ServerError, ServerResult};
use crate::handlers::HandlerRegistry;
use crate::message::{IncomingMessage, NetworkMessage};
use crate::server::{RelayServer, ServerStats};
use crate::transport::EventReceiver;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// Requests funneled into the server task.
pub enum Command {
    Start(oneshot::Sender<ServerResult<()>>),
    Stop(oneshot::Sender<()>),
    SendToClient {
        connection_id: ConnectionId,
        msg_type: u16,
        payload: Vec<u8>,
        callback: Option<CallbackHandler>,
        reply: oneshot::Sender<bool>,
    },
    SendToClientBytes {
        connection_id: ConnectionId,
        data: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    SendToAll {
        msg_type: u16,
        payload: Vec<u8>,
        callback: Option<CallbackHandler>,
        group_callback: Option<GroupCallback>,
        reply: oneshot::Sender<bool>,
    },
    SendToAllBytes {
        data: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    ConnectionCount(oneshot::Sender<usize>),
    ConnectionInfo(ConnectionId, oneshot::Sender<String>),
    SetConnectionHandlers(ConnectionId, Arc<HandlerRegistry>, oneshot::Sender<bool>),
    Stats(oneshot::Sender<ServerStats>),
    Shutdown(oneshot::Sender<()>),
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Start(_) => "Start",
            Command::Stop(_) => "Stop",
            Command::SendToClient { .. } => "SendToClient",
            Command::SendToClientBytes { .. } => "SendToClientBytes",
            Command::SendToAll { .. } => "SendToAll",
            Command::SendToAllBytes { .. } => "SendToAllBytes",
            Command::ConnectionCount(_) => "ConnectionCount",
            Command::ConnectionInfo(..) => "ConnectionInfo",
            Command::SetConnectionHandlers(..) => "SetConnectionHandlers",
            Command::Stats(_) => "Stats",
            Command::Shutdown(_) => "Shutdown",
        };
        f.write_str(name)
    }
}

/// Cloneable handle to a server running in its own task.
#[derive(Clone)]
pub struct ServerHandle {
    commands: mpsc::UnboundedSender<Command>,
    handlers: Arc<HandlerRegistry>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("closed", &self.commands.is_closed())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Spawns the dispatch task for `server`, fed by `events`.
///
/// The server is started immediately when its config has `auto_start` set.
/// The task ends after [`ServerHandle::shutdown`] or once every handle has
/// been dropped; the server is stopped on the way out.
pub fn spawn(server: RelayServer, events: EventReceiver) -> (ServerHandle, JoinHandle<()>) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handle = ServerHandle {
        commands: commands_tx,
        handlers: server.handlers(),
    };
    let task = tokio::spawn(run(server, events, commands_rx));
    (handle, task)
}

async fn run(
    mut server: RelayServer,
    mut events: EventReceiver,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    if server.config().auto_start {
        if let Err(e) = server.start() {
            error!("❌ Relay server failed to auto-start: {}", e);
        }
    }

    let mut ticker = interval(server.config().tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!("🕒 Callback sweep running every {:?}", server.config().tick_interval());

    let mut shutdown_ack = None;
    loop {
        // Events queued before a command are always dispatched first.
        tokio::select! {
            biased;

            Some(event) = events.recv() => server.handle_event(event),
            command = commands.recv() => match command {
                Some(command) => {
                    if let ControlFlow::Break(ack) = execute(&mut server, command) {
                        shutdown_ack = Some(ack);
                        break;
                    }
                }
                None => {
                    debug!("All server handles dropped");
                    break;
                }
            },
            _ = ticker.tick() => server.tick(),
        }
    }

    server.stop();
    info!("Relay server task finished");
    if let Some(ack) = shutdown_ack {
        let _ = ack.send(());
    }
}

/// Applies one command. Breaks with the acknowledgement sender when the
/// command asks the task to shut down.
fn execute(server: &mut RelayServer, command: Command) -> ControlFlow<oneshot::Sender<()>> {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Start(reply) => {
            let _ = reply.send(server.start());
        }
        Command::Stop(reply) => {
            server.stop();
            let _ = reply.send(());
        }
        Command::SendToClient {
            connection_id,
            msg_type,
            payload,
            callback,
            reply,
        } => {
            let sent = server.send_payload_to_client(connection_id, msg_type, &payload, callback);
            let _ = reply.send(sent);
        }
        Command::SendToClientBytes {
            connection_id,
            data,
            reply,
        } => {
            let _ = reply.send(server.send_to_client_bytes(connection_id, &data));
        }
        Command::SendToAll {
            msg_type,
            payload,
            callback,
            group_callback,
            reply,
        } => {
            let sent = server.send_payload_to_all(msg_type, &payload, callback, group_callback);
            let _ = reply.send(sent);
        }
        Command::SendToAllBytes { data, reply } => {
            let _ = reply.send(server.send_to_all_bytes(&data));
        }
        Command::ConnectionCount(reply) => {
            let _ = reply.send(server.connection_count());
        }
        Command::ConnectionInfo(connection_id, reply) => {
            let _ = reply.send(server.connection_info(connection_id));
        }
        Command::SetConnectionHandlers(connection_id, handlers, reply) => {
            let _ = reply.send(server.set_connection_handlers(connection_id, handlers));
        }
        Command::Stats(reply) => {
            let _ = reply.send(server.stats());
        }
        Command::Shutdown(ack) => return ControlFlow::Break(ack),
    }
    ControlFlow::Continue(())
}

impl ServerHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> ServerResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ServerError::Closed)?;
        rx.await.map_err(|_| ServerError::Closed)
    }

    /// Starts listening. See [`RelayServer::start`].
    pub async fn start(&self) -> ServerResult<()> {
        self.request(Command::Start).await?
    }

    /// Stops listening, abandoning every pending callback.
    pub async fn stop(&self) -> ServerResult<()> {
        self.request(Command::Stop).await
    }

    pub async fn send_to_client<M: NetworkMessage>(
        &self,
        connection_id: ConnectionId,
        message: &M,
        callback: Option<CallbackHandler>,
    ) -> ServerResult<bool> {
        let payload = message.to_payload()?;
        self.send_payload_to_client(connection_id, M::MSG_TYPE, payload, callback)
            .await
    }

    pub async fn send_payload_to_client(
        &self,
        connection_id: ConnectionId,
        msg_type: u16,
        payload: Vec<u8>,
        callback: Option<CallbackHandler>,
    ) -> ServerResult<bool> {
        self.request(|reply| Command::SendToClient {
            connection_id,
            msg_type,
            payload,
            callback,
            reply,
        })
        .await
    }

    pub async fn send_to_client_bytes(&self, connection_id: ConnectionId, data: Vec<u8>) -> ServerResult<bool> {
        self.request(|reply| Command::SendToClientBytes {
            connection_id,
            data,
            reply,
        })
        .await
    }

    pub async fn send_to_all<M: NetworkMessage>(
        &self,
        message: &M,
        callback: Option<CallbackHandler>,
        group_callback: Option<GroupCallback>,
    ) -> ServerResult<bool> {
        let payload = message.to_payload()?;
        self.send_payload_to_all(M::MSG_TYPE, payload, callback, group_callback)
            .await
    }

    pub async fn send_payload_to_all(
        &self,
        msg_type: u16,
        payload: Vec<u8>,
        callback: Option<CallbackHandler>,
        group_callback: Option<GroupCallback>,
    ) -> ServerResult<bool> {
        self.request(|reply| Command::SendToAll {
            msg_type,
            payload,
            callback,
            group_callback,
            reply,
        })
        .await
    }

    pub async fn send_to_all_bytes(&self, data: Vec<u8>) -> ServerResult<bool> {
        self.request(|reply| Command::SendToAllBytes { data, reply }).await
    }

    pub async fn connection_count(&self) -> ServerResult<usize> {
        self.request(Command::ConnectionCount).await
    }

    pub async fn connection_info(&self, connection_id: ConnectionId) -> ServerResult<String> {
        self.request(|reply| Command::ConnectionInfo(connection_id, reply)).await
    }

    pub async fn set_connection_handlers(
        &self,
        connection_id: ConnectionId,
        handlers: Arc<HandlerRegistry>,
    ) -> ServerResult<bool> {
        self.request(|reply| Command::SetConnectionHandlers(connection_id, handlers, reply))
            .await
    }

    pub async fn stats(&self) -> ServerResult<ServerStats> {
        self.request(Command::Stats).await
    }

    /// Registers a handler on the server-wide table.
    ///
    /// Takes effect for the next dispatched message; no round trip through
    /// the server task is needed.
    pub fn register_handler<F>(&self, msg_type: u16, handler: F) -> bool
    where
        F: Fn(IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.handlers.register(msg_type, handler)
    }

    pub fn register_message_handler<M, F>(&self, handler: F) -> bool
    where
        M: NetworkMessage + 'static,
        F: Fn(M, IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.handlers.register_typed::<M, F>(handler)
    }

    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        self.handlers.clone()
    }

    /// Stops the server and ends its task.
    pub async fn shutdown(&self) -> ServerResult<()> {
        self.request(Command::Shutdown).await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
