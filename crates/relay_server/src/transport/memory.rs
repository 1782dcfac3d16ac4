//! In-process transport.
//!
//! `MemoryTransport` keeps its "clients" in a map and records every frame it
//! is asked to send. Inbound traffic is injected with [`MemoryTransport::connect`],
//! [`MemoryTransport::deliver`] and friends, which forward a [`TransportEvent`]
//! to the server when an event sender is attached. It backs the test suites
//! and is usable for embedding the server in a single process.

use super::{EventSender, Transport, TransportEvent};
use crate::connection::ConnectionId;
use dashmap::DashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// A frame accepted by [`MemoryTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub connection_id: ConnectionId,
    pub channel: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MemoryTransport {
    active: AtomicBool,
    fail_start: AtomicBool,
    reject_sends: AtomicBool,
    clients: DashMap<ConnectionId, String>,
    sent: Mutex<Vec<SentFrame>>,
    events: Option<EventSender>,
}

impl MemoryTransport {
    /// Creates a transport that does not forward events anywhere.
    ///
    /// Useful when the caller feeds events to the server directly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport that forwards injected events to `events`.
    pub fn with_events(events: EventSender) -> Self {
        Self {
            events: Some(events),
            ..Self::default()
        }
    }

    /// Makes the next `start` calls fail.
    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Makes `send` refuse every frame while set.
    pub fn set_reject_sends(&self, reject: bool) {
        self.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Registers a client and reports the connect event.
    pub fn connect(&self, connection_id: ConnectionId, address: impl Into<String>) -> TransportEvent {
        self.clients.insert(connection_id, address.into());
        self.emit(TransportEvent::Connected(connection_id))
    }

    /// Drops a client and reports the disconnect event.
    pub fn disconnect(&self, connection_id: ConnectionId) -> TransportEvent {
        self.clients.remove(&connection_id);
        self.emit(TransportEvent::Disconnected(connection_id))
    }

    /// Reports bytes received from a client.
    pub fn deliver(&self, connection_id: ConnectionId, data: impl Into<Vec<u8>>) -> TransportEvent {
        self.emit(TransportEvent::Data(connection_id, data.into()))
    }

    /// Reports a transport-level error for a client.
    pub fn fail(&self, connection_id: ConnectionId, error: impl Into<String>) -> TransportEvent {
        self.emit(TransportEvent::Error(connection_id, error.into()))
    }

    /// Every frame accepted so far, in send order.
    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    /// Frames accepted for a single connection, in send order.
    pub fn frames_for(&self, connection_id: ConnectionId) -> Vec<Vec<u8>> {
        self.sent_frames()
            .into_iter()
            .filter(|frame| frame.connection_id == connection_id)
            .map(|frame| frame.data)
            .collect()
    }

    /// Removes and returns every recorded frame.
    pub fn take_sent(&self) -> Vec<SentFrame> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    fn emit(&self, event: TransportEvent) -> TransportEvent {
        if let Some(events) = &self.events {
            if events.send(event.clone()).is_err() {
                debug!("Memory transport event dropped, receiver is gone");
            }
        }
        event
    }
}

impl Transport for MemoryTransport {
    fn start(&self) -> io::Result<()> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "memory transport configured to fail",
            ));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.clients.clear();
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn send(&self, connection_ids: &[ConnectionId], channel: u8, data: &[u8]) -> bool {
        if !self.is_active() || self.reject_sends.load(Ordering::SeqCst) {
            return false;
        }

        let Ok(mut sent) = self.sent.lock() else {
            warn!("Memory transport outbox poisoned");
            return false;
        };

        let mut all_delivered = true;
        for &connection_id in connection_ids {
            if self.clients.contains_key(&connection_id) {
                sent.push(SentFrame {
                    connection_id,
                    channel,
                    data: data.to_vec(),
                });
            } else {
                all_delivered = false;
            }
        }
        all_delivered
    }

    fn client_address(&self, connection_id: ConnectionId) -> String {
        self.clients
            .get(&connection_id)
            .map(|address| address.value().clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;

    #[test]
    fn test_send_requires_active_transport() {
        let transport = MemoryTransport::new();
        transport.connect(1, "10.0.0.1:4000");

        assert!(!transport.send(&[1], 0, b"early"));
        transport.start().unwrap();
        assert!(transport.send(&[1], 0, b"ok"));
        assert_eq!(transport.frames_for(1), vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_unknown_client_is_reported() {
        let transport = MemoryTransport::new();
        transport.start().unwrap();
        transport.connect(1, "a");

        assert!(!transport.send(&[1, 2], 0, b"x"));
        assert_eq!(transport.send_count(), 1);
    }

    #[test]
    fn test_events_are_forwarded() {
        let (tx, mut rx) = event_channel();
        let transport = MemoryTransport::with_events(tx);

        transport.connect(3, "peer");
        transport.deliver(3, vec![1, 2, 3]);
        transport.disconnect(3);

        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Connected(3));
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Data(3, vec![1, 2, 3]));
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Disconnected(3));
        assert_eq!(transport.client_address(3), "");
    }

    #[test]
    fn test_fail_start() {
        let transport = MemoryTransport::new();
        transport.set_fail_start(true);
        assert!(transport.start().is_err());
        assert!(!transport.is_active());
    }
}
