//! Registry of live connections for one server session.

use super::{Connection, ConnectionId};
use crate::error::{ServerError, ServerResult};
use std::collections::HashMap;
use tracing::{error, warn};

/// Owns every live [`Connection`] keyed by its transport id.
///
/// The registry has no locking of its own. It is mutated only from the
/// server's dispatch context, which serializes every event and tick.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `connection` unless its id is already registered.
    ///
    /// A duplicate id never overwrites the existing entry; the new connection
    /// is dropped and `false` is returned.
    pub fn add(&mut self, connection: Connection) -> bool {
        match self.try_add(connection) {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️ {}", e);
                false
            }
        }
    }

    pub(crate) fn try_add(&mut self, connection: Connection) -> ServerResult<()> {
        let connection_id = connection.connection_id();
        if self.connections.contains_key(&connection_id) {
            return Err(ServerError::DuplicateConnection(connection_id));
        }
        self.connections.insert(connection_id, connection);
        Ok(())
    }

    /// Removes the connection with `connection_id`, returning whether it existed.
    pub fn remove(&mut self, connection_id: ConnectionId) -> bool {
        self.connections.remove(&connection_id).is_some()
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&connection_id)
    }

    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    /// Forwards `data` to the transport for `connection_id`.
    ///
    /// Returns `false` and logs when the connection is unknown or the
    /// transport is not active.
    pub fn send_to(&self, connection_id: ConnectionId, data: &[u8]) -> bool {
        match self.try_send_to(connection_id, data) {
            Ok(sent) => sent,
            Err(e) => {
                error!("❌ Send to connection {} failed: {}", connection_id, e);
                false
            }
        }
    }

    pub(crate) fn try_send_to(&self, connection_id: ConnectionId, data: &[u8]) -> ServerResult<bool> {
        let connection = self
            .connections
            .get(&connection_id)
            .ok_or(ServerError::UnknownConnection(connection_id))?;

        if !connection.is_transport_active() {
            return Err(ServerError::TransportInactive);
        }

        Ok(connection.send(data))
    }

    /// Ids of every live connection, in ascending order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerRegistry;
    use crate::transport::{MemoryTransport, Transport};
    use std::sync::Arc;

    fn make_connection(id: ConnectionId, address: &str, transport: &Arc<MemoryTransport>) -> Connection {
        Connection::new(
            id,
            address.to_string(),
            1,
            0,
            transport.clone(),
            Arc::new(HandlerRegistry::new()),
        )
    }

    #[test]
    fn test_add_then_remove_leaves_nothing() {
        let transport = Arc::new(MemoryTransport::new());
        let mut registry = ConnectionRegistry::new();

        for id in [1, 7, 3, 1000] {
            assert!(registry.add(make_connection(id, "peer", &transport)));
            assert!(registry.remove(id));
            assert!(registry.get(id).is_none());
        }
        assert!(registry.is_empty());
        assert!(!registry.remove(7));
    }

    #[test]
    fn test_duplicate_add_keeps_original() {
        let transport = Arc::new(MemoryTransport::new());
        let mut registry = ConnectionRegistry::new();

        assert!(registry.add(make_connection(2, "first", &transport)));
        assert!(!registry.add(make_connection(2, "second", &transport)));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(2).unwrap().address(), "first");
        assert!(matches!(
            registry.try_add(make_connection(2, "third", &transport)),
            Err(ServerError::DuplicateConnection(2))
        ));
    }

    #[test]
    fn test_send_to_checks_connection_and_transport() {
        let transport = Arc::new(MemoryTransport::new());
        transport.connect(1, "peer");
        let mut registry = ConnectionRegistry::new();
        registry.add(make_connection(1, "peer", &transport));

        assert!(matches!(
            registry.try_send_to(1, b"x"),
            Err(ServerError::TransportInactive)
        ));
        assert!(!registry.send_to(1, b"x"));

        transport.start().unwrap();
        assert!(registry.send_to(1, b"x"));
        assert!(matches!(
            registry.try_send_to(9, b"x"),
            Err(ServerError::UnknownConnection(9))
        ));
        assert_eq!(transport.send_count(), 1);
    }

    #[test]
    fn test_ids_are_sorted() {
        let transport = Arc::new(MemoryTransport::new());
        let mut registry = ConnectionRegistry::new();
        for id in [5, 2, 9] {
            registry.add(make_connection(id, "peer", &transport));
        }
        assert_eq!(registry.ids(), vec![2, 5, 9]);
    }
}
