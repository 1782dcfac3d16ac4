//! Pending response callbacks and the timeout sweep.
//!
//! Every tracked request stores a [`PendingCallback`] keyed by the
//! correlation id written into its envelope. The record is consumed exactly
//! once: by a matching inbound envelope ([`CallbackTable::resolve`]) or by the
//! periodic [`CallbackTable::sweep`] once its deadline has passed. Nothing
//! else ever fires it, and there is no per-request timer.

use crate::codec::NO_CORRELATION;
use crate::connection::ConnectionId;
use crate::message::IncomingMessage;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Final status delivered to a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Success,
    Timeout,
}

/// What a response callback receives.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// The peer answered; the response envelope is attached.
    Success(IncomingMessage),
    /// The deadline elapsed before an answer arrived.
    Timeout { correlation_id: i32 },
}

impl CallbackOutcome {
    pub fn status(&self) -> CallbackStatus {
        match self {
            CallbackOutcome::Success(_) => CallbackStatus::Success,
            CallbackOutcome::Timeout { .. } => CallbackStatus::Timeout,
        }
    }

    pub fn correlation_id(&self) -> i32 {
        match self {
            CallbackOutcome::Success(message) => message.correlation_id(),
            CallbackOutcome::Timeout { correlation_id } => *correlation_id,
        }
    }

    pub fn message(&self) -> Option<&IncomingMessage> {
        match self {
            CallbackOutcome::Success(message) => Some(message),
            CallbackOutcome::Timeout { .. } => None,
        }
    }
}

/// Shared response handler.
///
/// A single handler may back many pending entries (one per recipient of a
/// broadcast), so it is `Fn` behind an `Arc`.
pub type CallbackHandler = Arc<dyn Fn(CallbackOutcome) + Send + Sync>;

/// Wraps a closure as a [`CallbackHandler`].
pub fn callback<F>(handler: F) -> CallbackHandler
where
    F: Fn(CallbackOutcome) + Send + Sync + 'static,
{
    Arc::new(handler)
}

/// A continuation waiting for one correlation id.
pub struct PendingCallback {
    pub correlation_id: i32,
    /// Connection the request went to, when known.
    pub target: Option<ConnectionId>,
    pub registered_at: Instant,
    pub deadline: Instant,
    handler: CallbackHandler,
}

impl std::fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback")
            .field("correlation_id", &self.correlation_id)
            .field("target", &self.target)
            .field("registered_at", &self.registered_at)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Table of outstanding response callbacks.
#[derive(Debug, Default)]
pub struct CallbackTable {
    last_id: i32,
    pending: HashMap<i32, PendingCallback>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` with a deadline of `timeout` from now.
    pub fn register(&mut self, handler: CallbackHandler, timeout: Duration) -> i32 {
        self.register_at(handler, Instant::now(), timeout)
    }

    /// Registers `handler` with a deadline of `timeout` after `now`.
    ///
    /// Ids are pre-incremented from the last one handed out, skip 0 and skip
    /// any id still outstanding after a wrap-around.
    pub fn register_at(&mut self, handler: CallbackHandler, now: Instant, timeout: Duration) -> i32 {
        self.insert(handler, None, now, timeout)
    }

    /// Registers `handler` for a request sent to `connection_id`.
    pub fn register_for(
        &mut self,
        connection_id: ConnectionId,
        handler: CallbackHandler,
        timeout: Duration,
    ) -> i32 {
        self.insert(handler, Some(connection_id), Instant::now(), timeout)
    }

    fn insert(
        &mut self,
        handler: CallbackHandler,
        target: Option<ConnectionId>,
        now: Instant,
        timeout: Duration,
    ) -> i32 {
        let correlation_id = self.next_id();
        self.pending.insert(
            correlation_id,
            PendingCallback {
                correlation_id,
                target,
                registered_at: now,
                deadline: now + timeout,
                handler,
            },
        );
        debug!("⏳ Registered callback {} (timeout {:?})", correlation_id, timeout);
        correlation_id
    }

    fn next_id(&mut self) -> i32 {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if self.last_id != NO_CORRELATION && !self.pending.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }

    pub fn contains(&self, correlation_id: i32) -> bool {
        self.pending.contains_key(&correlation_id)
    }

    pub fn get(&self, correlation_id: i32) -> Option<&PendingCallback> {
        self.pending.get(&correlation_id)
    }

    /// Consumes the pending entry for the response's correlation id and runs
    /// its handler with [`CallbackOutcome::Success`].
    ///
    /// Returns `false` for a stale or unexpected response.
    pub fn resolve(&mut self, correlation_id: i32, message: IncomingMessage) -> bool {
        match self.pending.remove(&correlation_id) {
            Some(pending) => {
                debug!(
                    "✅ Callback {} resolved after {:?}",
                    correlation_id,
                    pending.registered_at.elapsed()
                );
                (pending.handler)(CallbackOutcome::Success(message));
                true
            }
            None => {
                warn!("⚠️ No pending callback for correlation id {}", correlation_id);
                false
            }
        }
    }

    /// Fires [`CallbackOutcome::Timeout`] for every entry whose deadline is
    /// before `now` and removes them.
    ///
    /// Returns the expired correlation ids in ascending order.
    pub fn sweep(&mut self, now: Instant) -> Vec<i32> {
        let mut expired: Vec<i32> = self
            .pending
            .values()
            .filter(|pending| pending.deadline < now)
            .map(|pending| pending.correlation_id)
            .collect();
        expired.sort_unstable();

        for correlation_id in &expired {
            if let Some(pending) = self.pending.remove(correlation_id) {
                debug!("⌛ Callback {} timed out", correlation_id);
                (pending.handler)(CallbackOutcome::Timeout {
                    correlation_id: *correlation_id,
                });
            }
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending entry without invoking its handler.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::handlers::HandlerRegistry;
    use crate::transport::MemoryTransport;
    use std::sync::Mutex;

    fn recorder() -> (CallbackHandler, Arc<Mutex<Vec<(CallbackStatus, i32)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = callback(move |outcome| {
            sink.lock()
                .unwrap()
                .push((outcome.status(), outcome.correlation_id()));
        });
        (handler, seen)
    }

    fn response(correlation_id: i32) -> IncomingMessage {
        let connection = Connection::new(
            1,
            "peer".to_string(),
            1,
            0,
            Arc::new(MemoryTransport::new()),
            Arc::new(HandlerRegistry::new()),
        );
        IncomingMessage::new(connection.handle(), 3, correlation_id, Vec::new())
    }

    #[test]
    fn test_register_for_records_target() {
        let mut table = CallbackTable::new();
        let (handler, _) = recorder();

        let targeted = table.register_for(7, handler.clone(), Duration::from_secs(1));
        let untargeted = table.register(handler, Duration::from_secs(1));

        assert_eq!(table.get(targeted).and_then(|pending| pending.target), Some(7));
        assert_eq!(table.get(untargeted).and_then(|pending| pending.target), None);
    }

    #[test]
    fn test_ids_strictly_increase_and_skip_zero() {
        let mut table = CallbackTable::new();
        let (handler, _) = recorder();

        let mut previous = NO_CORRELATION;
        for _ in 0..100 {
            let id = table.register(handler.clone(), Duration::from_secs(30));
            assert_ne!(id, NO_CORRELATION);
            assert!(id > previous);
            previous = id;
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_allocator_wraps_past_zero() {
        let mut table = CallbackTable::new();
        table.last_id = -2;
        let (handler, _) = recorder();

        assert_eq!(table.register(handler.clone(), Duration::from_secs(1)), -1);
        assert_eq!(table.register(handler, Duration::from_secs(1)), 1);
    }

    #[test]
    fn test_resolved_callback_never_fires_again() {
        let mut table = CallbackTable::new();
        let (handler, seen) = recorder();
        let now = Instant::now();

        let id = table.register_at(handler, now, Duration::from_millis(10));
        assert!(table.resolve(id, response(id)));
        assert!(!table.resolve(id, response(id)));
        assert!(table.sweep(now + Duration::from_secs(5)).is_empty());

        assert_eq!(*seen.lock().unwrap(), vec![(CallbackStatus::Success, id)]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_sweep_fires_every_expired_entry_once() {
        let mut table = CallbackTable::new();
        let (handler, seen) = recorder();
        let now = Instant::now();

        let a = table.register_at(handler.clone(), now, Duration::from_millis(10));
        let b = table.register_at(handler.clone(), now, Duration::from_millis(20));
        let c = table.register_at(handler, now, Duration::from_secs(60));

        // Deadline equal to `now` is not yet expired.
        assert!(table.sweep(now + Duration::from_millis(10)).is_empty());

        let expired = table.sweep(now + Duration::from_millis(25));
        assert_eq!(expired, vec![a, b]);
        assert!(table.sweep(now + Duration::from_millis(30)).is_empty());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(CallbackStatus::Timeout, a), (CallbackStatus::Timeout, b)]
        );
        assert!(table.contains(c));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_clear_abandons_without_firing() {
        let mut table = CallbackTable::new();
        let (handler, seen) = recorder();
        table.register(handler.clone(), Duration::from_millis(1));
        table.register(handler, Duration::from_millis(1));

        assert_eq!(table.clear(), 2);
        assert!(table.sweep(Instant::now() + Duration::from_secs(1)).is_empty());
        assert!(seen.lock().unwrap().is_empty());
    }
}
