//! Connection management for transport clients.
//!
//! This module holds the per-peer [`Connection`] record and the
//! [`ConnectionRegistry`] that owns every live connection for one running
//! server session.

pub mod client;
pub mod registry;

pub use client::{Connection, ConnectionRef};
pub use registry::ConnectionRegistry;

/// Type alias for connection identifiers.
///
/// Ids are assigned by the transport and stay stable for the lifetime of
/// the connection.
pub type ConnectionId = usize;
