//! Outbound API: direct sends, tracked requests and broadcasts.
//!
//! Every operation returns whether the frame was handed to the transport.
//! Whether it was answered is only observable through the callback.

use super::core::RelayServer;
use crate::broadcast::GroupCallback;
use crate::callbacks::CallbackHandler;
use crate::codec::{self, NO_CORRELATION};
use crate::connection::ConnectionId;
use crate::error::{ServerError, ServerResult};
use crate::message::NetworkMessage;
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, error, warn};

impl RelayServer {
    /// Sends a typed message to one client.
    ///
    /// With a `callback` the send is tracked: the callback fires once with
    /// the response, or with a timeout after the configured callback timeout.
    pub fn send_to_client<M: NetworkMessage>(
        &mut self,
        connection_id: ConnectionId,
        message: &M,
        callback: Option<CallbackHandler>,
    ) -> bool {
        match message.to_payload() {
            Ok(payload) => self.send_payload_to_client(connection_id, M::MSG_TYPE, &payload, callback),
            Err(e) => {
                error!("❌ Failed to serialize message type {}: {}", M::MSG_TYPE, e);
                false
            }
        }
    }

    /// Sends a pre-serialized payload to one client under `msg_type`.
    pub fn send_payload_to_client(
        &mut self,
        connection_id: ConnectionId,
        msg_type: u16,
        payload: &[u8],
        callback: Option<CallbackHandler>,
    ) -> bool {
        match self.try_send_payload(connection_id, msg_type, payload, callback) {
            Ok((_, sent)) => sent,
            Err(e) => {
                warn!("⚠️ Send to connection {} dropped: {}", connection_id, e);
                false
            }
        }
    }

    /// Returns the correlation id written into the frame and whether the
    /// transport accepted it.
    ///
    /// The connection and transport are checked before a callback is
    /// registered, so those failures leave nothing pending. A frame the
    /// transport itself refuses keeps its callback, which then times out.
    pub(crate) fn try_send_payload(
        &mut self,
        connection_id: ConnectionId,
        msg_type: u16,
        payload: &[u8],
        callback: Option<CallbackHandler>,
    ) -> ServerResult<(i32, bool)> {
        if !self.connections.contains(connection_id) {
            return Err(ServerError::UnknownConnection(connection_id));
        }
        if !self.transport.is_active() {
            return Err(ServerError::TransportInactive);
        }

        let correlation_id = match callback {
            Some(handler) => {
                self.callbacks
                    .register_for(connection_id, handler, self.config.callback_timeout())
            }
            None => NO_CORRELATION,
        };

        let frame = codec::encode(msg_type, correlation_id, payload);
        let sent = self.connections.try_send_to(connection_id, &frame)?;
        if sent {
            debug!(
                "📤 Sent message type {} to connection {} (correlation {})",
                msg_type, connection_id, correlation_id
            );
        } else {
            warn!(
                "⚠️ Transport refused message type {} for connection {}",
                msg_type, connection_id
            );
        }
        Ok((correlation_id, sent))
    }

    /// Sends raw bytes to one client, bypassing the envelope.
    pub fn send_to_client_bytes(&self, connection_id: ConnectionId, data: &[u8]) -> bool {
        self.connections.send_to(connection_id, data)
    }

    /// Sends a typed message to every live connection.
    ///
    /// `group_callback` is only honored together with `callback`; without
    /// per-recipient tracking there is nothing to count completions against.
    pub fn send_to_all<M: NetworkMessage>(
        &mut self,
        message: &M,
        callback: Option<CallbackHandler>,
        group_callback: Option<GroupCallback>,
    ) -> bool {
        match message.to_payload() {
            Ok(payload) => self.send_payload_to_all(M::MSG_TYPE, &payload, callback, group_callback),
            Err(e) => {
                error!("❌ Failed to serialize message type {}: {}", M::MSG_TYPE, e);
                false
            }
        }
    }

    /// Broadcasts a pre-serialized payload under `msg_type`.
    ///
    /// Untracked broadcasts go out as a single transport call over every
    /// connection id. Tracked broadcasts issue one frame per recipient, each
    /// with its own correlation id, and a group over those ids when
    /// `group_callback` is given. The group deadline is one callback timeout
    /// after the last send; with no recipients the group succeeds at once.
    pub fn send_payload_to_all(
        &mut self,
        msg_type: u16,
        payload: &[u8],
        callback: Option<CallbackHandler>,
        group_callback: Option<GroupCallback>,
    ) -> bool {
        if !self.transport.is_active() {
            warn!("⚠️ Broadcast of message type {} dropped: {}", msg_type, ServerError::TransportInactive);
            return false;
        }

        let recipients = self.connections.ids();

        let Some(callback) = callback else {
            if group_callback.is_some() {
                debug!("Ignoring group callback on untracked broadcast");
            }
            if recipients.is_empty() {
                return true;
            }
            let frame = codec::encode(msg_type, NO_CORRELATION, payload);
            let sent = self.transport.send(&recipients, self.config.channel, &frame);
            debug!(
                "📢 Broadcast message type {} to {} connection(s)",
                msg_type,
                recipients.len()
            );
            return sent;
        };

        let mut all_sent = true;
        let mut required = HashSet::with_capacity(recipients.len());
        for connection_id in recipients {
            match self.try_send_payload(connection_id, msg_type, payload, Some(callback.clone())) {
                Ok((correlation_id, sent)) => {
                    required.insert(correlation_id);
                    all_sent &= sent;
                }
                Err(e) => {
                    warn!("⚠️ Broadcast to connection {} failed: {}", connection_id, e);
                    all_sent = false;
                }
            }
        }

        if let Some(group_callback) = group_callback {
            let deadline = Instant::now() + self.config.callback_timeout();
            self.broadcasts.track(required, group_callback, deadline);
        }

        all_sent
    }

    /// Sends raw bytes to every live connection, bypassing the envelope.
    pub fn send_to_all_bytes(&self, data: &[u8]) -> bool {
        if !self.transport.is_active() {
            warn!("⚠️ Raw broadcast dropped: {}", ServerError::TransportInactive);
            return false;
        }

        let recipients = self.connections.ids();
        if recipients.is_empty() {
            return true;
        }
        self.transport.send(&recipients, self.config.channel, data)
    }
}
