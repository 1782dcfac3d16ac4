//! Typed message bodies and the inbound message handed to handlers.

use crate::codec;
use crate::connection::{ConnectionId, ConnectionRef};
use crate::error::ServerResult;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A message body with a fixed wire type tag.
///
/// Bodies are serialized as JSON into the envelope payload. Callers that own
/// their own serializer can skip this trait and use the raw payload APIs.
///
/// # Example
///
/// ```rust
/// use relay_server::NetworkMessage;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct ChatMessage {
///     origin: String,
///     data: String,
/// }
///
/// impl NetworkMessage for ChatMessage {
///     const MSG_TYPE: u16 = 1001;
/// }
/// ```
pub trait NetworkMessage: Serialize + DeserializeOwned {
    /// Wire tag identifying this message type.
    const MSG_TYPE: u16;

    fn to_payload(&self) -> ServerResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_payload(payload: &[u8]) -> ServerResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// An inbound envelope together with the connection that sent it.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    connection: ConnectionRef,
    msg_type: u16,
    correlation_id: i32,
    payload: Vec<u8>,
}

impl IncomingMessage {
    pub fn new(connection: ConnectionRef, msg_type: u16, correlation_id: i32, payload: Vec<u8>) -> Self {
        Self {
            connection,
            msg_type,
            correlation_id,
            payload,
        }
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id
    }

    pub fn msg_type(&self) -> u16 {
        self.msg_type
    }

    pub fn correlation_id(&self) -> i32 {
        self.correlation_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the sender is waiting for a reply.
    pub fn expects_response(&self) -> bool {
        self.correlation_id != codec::NO_CORRELATION
    }

    /// Decodes the payload as `M`.
    pub fn read_message<M: NetworkMessage>(&self) -> ServerResult<M> {
        M::from_payload(&self.payload)
    }

    /// Replies to the sender, echoing this message's correlation id.
    pub fn reply<M: NetworkMessage>(&self, message: &M) -> ServerResult<bool> {
        let payload = message.to_payload()?;
        Ok(self.reply_bytes(M::MSG_TYPE, &payload))
    }

    /// Replies with a pre-serialized payload, echoing this message's correlation id.
    pub fn reply_bytes(&self, msg_type: u16, payload: &[u8]) -> bool {
        self.connection
            .send_envelope(msg_type, self.correlation_id, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::handlers::HandlerRegistry;
    use crate::transport::{MemoryTransport, Transport};
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Pong {
        tick: u64,
    }

    impl NetworkMessage for Pong {
        const MSG_TYPE: u16 = 2;
    }

    #[test]
    fn test_reply_echoes_correlation_id() {
        let transport = Arc::new(MemoryTransport::new());
        transport.start().unwrap();
        transport.connect(8, "peer");
        let connection = Connection::new(
            8,
            "peer".to_string(),
            1,
            0,
            transport.clone(),
            Arc::new(HandlerRegistry::new()),
        );

        let request = IncomingMessage::new(connection.handle(), 1, 77, Vec::new());
        assert!(request.expects_response());
        assert!(request.reply(&Pong { tick: 3 }).unwrap());

        let frames = transport.frames_for(8);
        let (msg_type, correlation_id, payload) = codec::decode(&frames[0]).unwrap();
        assert_eq!(msg_type, Pong::MSG_TYPE);
        assert_eq!(correlation_id, 77);
        assert_eq!(Pong::from_payload(payload).unwrap(), Pong { tick: 3 });
    }

    #[test]
    fn test_read_message_rejects_garbage() {
        let transport = Arc::new(MemoryTransport::new());
        let connection = Connection::new(
            1,
            String::new(),
            1,
            0,
            transport,
            Arc::new(HandlerRegistry::new()),
        );
        let message = IncomingMessage::new(connection.handle(), Pong::MSG_TYPE, 0, b"not json".to_vec());
        assert!(message.read_message::<Pong>().is_err());
    }
}
