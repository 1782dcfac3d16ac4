//! Error types for the relay server core.
//!
//! Almost every anomaly the dispatcher sees is handled locally: it is logged
//! and the offending event is dropped. These variants exist so the internal
//! paths can propagate with `?` and the public boolean-returning API can log
//! a precise reason. The only error that reaches a caller as a hard failure is
//! [`ServerError::Transport`] from [`RelayServer::start`](crate::RelayServer::start).

use crate::connection::ConnectionId;
use crate::server::ServerState;
use thiserror::Error;

/// Errors raised by the relay server core.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A send was attempted while the transport is not listening
    #[error("Transport is not active")]
    TransportInactive,

    /// An event or send referenced a connection that is not registered
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// A frame was too short to carry the envelope header
    #[error("Malformed envelope: expected at least {expected} bytes, got {actual}")]
    MalformedEnvelope { expected: usize, actual: usize },

    /// A connection with the same id is already registered
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),

    /// A response arrived for a correlation id that is no longer pending
    #[error("Stale response for correlation id {0}")]
    StaleResponse(i32),

    /// The transport failed to initialize
    #[error("Transport error: {0}")]
    Transport(String),

    /// The requested lifecycle transition is not allowed from the current state
    #[error("Invalid server state: {0:?}")]
    InvalidState(ServerState),

    /// A message body could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A registered message handler reported a failure
    #[error("Handler error: {0}")]
    Handler(String),

    /// The server task is no longer running
    #[error("Server task has shut down")]
    Closed,
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Serialization(err.to_string())
    }
}

/// Result type alias used throughout the crate
pub type ServerResult<T> = Result<T, ServerError>;
