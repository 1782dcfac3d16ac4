//! Message-type handler registration.
//!
//! Handlers are keyed by the envelope's `msg_type` tag. The table is shared:
//! the server keeps one, every [`Connection`](crate::Connection) holds a
//! reference to the table it was created with, and the [`ServerHandle`](crate::ServerHandle)
//! registers into it from other tasks, so it lives behind a `DashMap`.

use crate::error::ServerResult;
use crate::message::{IncomingMessage, NetworkMessage};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Handles every inbound message carrying one `msg_type`.
///
/// Implemented for any `Fn(IncomingMessage) -> ServerResult<()>` closure.
/// An `Err` is logged by the dispatcher and the message is dropped; it never
/// stops the dispatch loop.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: IncomingMessage) -> ServerResult<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(IncomingMessage) -> ServerResult<()> + Send + Sync,
{
    fn handle(&self, message: IncomingMessage) -> ServerResult<()> {
        self(message)
    }
}

/// Table of handlers keyed by message type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<u16, Arc<dyn MessageHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<u16> = self.handlers.iter().map(|entry| *entry.key()).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("msg_types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `msg_type`, replacing any previous one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register<F>(&self, msg_type: u16, handler: F) -> bool
    where
        F: Fn(IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.register_handler(msg_type, Arc::new(handler))
    }

    /// Registers an already shared handler object for `msg_type`.
    pub fn register_handler(&self, msg_type: u16, handler: Arc<dyn MessageHandler>) -> bool {
        let replaced = self.handlers.insert(msg_type, handler).is_some();
        if replaced {
            debug!("🔁 Replaced handler for message type {}", msg_type);
        } else {
            debug!("📝 Registered handler for message type {}", msg_type);
        }
        replaced
    }

    /// Registers a handler that receives the payload already decoded as `M`.
    pub fn register_typed<M, F>(&self, handler: F) -> bool
    where
        M: NetworkMessage + 'static,
        F: Fn(M, IncomingMessage) -> ServerResult<()> + Send + Sync + 'static,
    {
        self.register(M::MSG_TYPE, move |message: IncomingMessage| {
            let body = message.read_message::<M>()?;
            handler(body, message)
        })
    }

    pub fn unregister(&self, msg_type: u16) -> bool {
        self.handlers.remove(&msg_type).is_some()
    }

    pub fn get(&self, msg_type: u16) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&msg_type).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, msg_type: u16) -> bool {
        self.handlers.contains_key(&msg_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_reregistration_replaces() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        assert!(!registry.register(5, move |_message: IncomingMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let counter = second.clone();
        assert!(registry.register(5, move |_message: IncomingMessage| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains(5));
        assert!(registry.unregister(5));
        assert!(registry.get(5).is_none());
        assert!(registry.is_empty());
    }
}
