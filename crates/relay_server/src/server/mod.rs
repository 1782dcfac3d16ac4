//! The relay server: lifecycle, inbound dispatch and outbound API.

mod core;
mod outbound;

pub use self::core::RelayServer;

use serde::Serialize;

/// Lifecycle state of a [`RelayServer`].
///
/// `Starting` is only entered from `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServerState {
    Stopped,
    Starting,
    Listening,
}

/// Point-in-time counters of a running server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub state: ServerState,
    pub host_id: Option<u32>,
    pub connections: usize,
    pub pending_callbacks: usize,
    pub active_broadcasts: usize,
    pub registered_handlers: usize,
}
