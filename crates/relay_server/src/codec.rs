//! Envelope wire codec.
//!
//! Every frame handed to the transport is laid out as
//!
//! ```text
//! +----------------+---------------------+-----------------+
//! | msg_type: u16  | correlation_id: i32 | payload bytes   |
//! +----------------+---------------------+-----------------+
//! ```
//!
//! Integers are little-endian. The payload carries no framing of its own; the
//! serializer that produced it owns its self-description.

use crate::error::{ServerError, ServerResult};

/// Size of the fixed envelope header in bytes.
pub const HEADER_LEN: usize = 6;

/// Correlation id meaning "no response expected".
pub const NO_CORRELATION: i32 = 0;

/// A decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub msg_type: u16,
    pub correlation_id: i32,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(msg_type: u16, correlation_id: i32, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            correlation_id,
            payload,
        }
    }

    /// Whether the sender expects a reply to this envelope.
    pub fn expects_response(&self) -> bool {
        self.correlation_id != NO_CORRELATION
    }

    pub fn encode(&self) -> Vec<u8> {
        encode(self.msg_type, self.correlation_id, &self.payload)
    }

    pub fn decode(data: &[u8]) -> ServerResult<Self> {
        let (msg_type, correlation_id, payload) = decode(data)?;
        Ok(Self::new(msg_type, correlation_id, payload.to_vec()))
    }
}

/// Writes the envelope header followed by `payload`.
pub fn encode(msg_type: u16, correlation_id: i32, payload: &[u8]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());

    buffer.extend_from_slice(&msg_type.to_le_bytes());
    buffer.extend_from_slice(&correlation_id.to_le_bytes());
    buffer.extend_from_slice(payload);

    buffer
}

/// Splits a frame into its header fields and the payload slice.
///
/// # Errors
///
/// Returns [`ServerError::MalformedEnvelope`] if `data` is shorter than the
/// header.
pub fn decode(data: &[u8]) -> ServerResult<(u16, i32, &[u8])> {
    if data.len() < HEADER_LEN {
        return Err(ServerError::MalformedEnvelope {
            expected: HEADER_LEN,
            actual: data.len(),
        });
    }

    let msg_type = u16::from_le_bytes([data[0], data[1]]);
    let correlation_id = i32::from_le_bytes([data[2], data[3], data[4], data[5]]);

    Ok((msg_type, correlation_id, &data[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0x0102, 7, b"hi");
        assert_eq!(frame, vec![0x02, 0x01, 7, 0, 0, 0, b'h', b'i']);
    }

    #[test]
    fn test_decode_inverts_encode() {
        let cases: [(u16, i32, &[u8]); 4] = [
            (0, 0, b""),
            (u16::MAX, i32::MAX, b"payload"),
            (42, -1, &[0u8, 255, 3]),
            (1, i32::MIN, b"{\"k\":1}"),
        ];

        for (msg_type, correlation_id, payload) in cases {
            let frame = encode(msg_type, correlation_id, payload);
            let (t, c, p) = decode(&frame).expect("frame should decode");
            assert_eq!((t, c, p), (msg_type, correlation_id, payload));
        }
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        for len in 0..HEADER_LEN {
            let data = vec![0u8; len];
            match decode(&data) {
                Err(ServerError::MalformedEnvelope { expected, actual }) => {
                    assert_eq!(expected, HEADER_LEN);
                    assert_eq!(actual, len);
                }
                other => panic!("expected MalformedEnvelope, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_header_only_frame_has_empty_payload() {
        let envelope = Envelope::decode(&encode(9, 3, &[])).unwrap();
        assert_eq!(envelope, Envelope::new(9, 3, Vec::new()));
        assert!(envelope.expects_response());
        assert!(!Envelope::new(9, NO_CORRELATION, Vec::new()).expects_response());
    }
}
