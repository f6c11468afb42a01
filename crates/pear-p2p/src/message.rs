//! RPC frames carried inside length-delimited transport frames.
//!
//! Every frame starts with a one byte kind and a `u64` correlation id.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{P2pError, Result};

/// Maximum transport frame size.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Frame kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// A method call.
    Request = 1,
    /// A successful reply.
    Response = 2,
    /// A failed reply carrying a message.
    Error = 3,
}

impl MessageType {
    /// Parse a frame kind from a byte.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(MessageType::Request),
            2 => Ok(MessageType::Response),
            3 => Ok(MessageType::Error),
            _ => Err(P2pError::InvalidMessage(format!(
                "unknown message type: {}",
                b
            ))),
        }
    }
}

/// A decoded RPC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Call `method` with an opaque payload.
    Request {
        /// Correlation id chosen by the caller.
        id: u64,
        /// Method name.
        method: String,
        /// Method payload.
        payload: Bytes,
    },
    /// Successful reply to request `id`.
    Response {
        /// Correlation id of the request.
        id: u64,
        /// Reply payload.
        payload: Bytes,
    },
    /// Failed reply to request `id`.
    Error {
        /// Correlation id of the request.
        id: u64,
        /// Human readable failure.
        message: String,
    },
}

impl Frame {
    /// Correlation id of the frame.
    pub fn id(&self) -> u64 {
        match self {
            Frame::Request { id, .. } | Frame::Response { id, .. } | Frame::Error { id, .. } => *id,
        }
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        match self {
            Frame::Request { id, method, payload } => {
                let method_bytes = method.as_bytes();
                let method_len = u16::try_from(method_bytes.len())
                    .map_err(|_| P2pError::InvalidMessage("method name too long".into()))?;
                buf.reserve(11 + method_bytes.len() + payload.len());
                buf.put_u8(MessageType::Request as u8);
                buf.put_u64(*id);
                buf.put_u16(method_len);
                buf.put_slice(method_bytes);
                buf.put_slice(payload);
            }
            Frame::Response { id, payload } => {
                buf.reserve(9 + payload.len());
                buf.put_u8(MessageType::Response as u8);
                buf.put_u64(*id);
                buf.put_slice(payload);
            }
            Frame::Error { id, message } => {
                buf.put_u8(MessageType::Error as u8);
                buf.put_u64(*id);
                buf.put_slice(message.as_bytes());
            }
        }
        if buf.len() > MAX_FRAME_LEN {
            return Err(P2pError::InvalidMessage(format!(
                "frame of {} bytes exceeds limit",
                buf.len()
            )));
        }
        Ok(buf.freeze())
    }

    /// Decode a frame from bytes.
    pub fn decode(mut buf: Bytes) -> Result<Self> {
        if buf.remaining() < 9 {
            return Err(P2pError::InvalidMessage("truncated frame header".into()));
        }
        let kind = MessageType::from_byte(buf.get_u8())?;
        let id = buf.get_u64();

        match kind {
            MessageType::Request => {
                if buf.remaining() < 2 {
                    return Err(P2pError::InvalidMessage("truncated method length".into()));
                }
                let method_len = buf.get_u16() as usize;
                if buf.remaining() < method_len {
                    return Err(P2pError::InvalidMessage("truncated method".into()));
                }
                let method = String::from_utf8(buf.split_to(method_len).to_vec())
                    .map_err(|e| P2pError::InvalidMessage(format!("invalid method: {}", e)))?;
                Ok(Frame::Request { id, method, payload: buf })
            }
            MessageType::Response => Ok(Frame::Response { id, payload: buf }),
            MessageType::Error => {
                let message = String::from_utf8(buf.to_vec())
                    .map_err(|e| P2pError::InvalidMessage(format!("invalid error text: {}", e)))?;
                Ok(Frame::Error { id, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let frame = Frame::Request {
            id: 7,
            method: "get-refs".into(),
            payload: Bytes::from_static(b"{}"),
        };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..9], &7u64.to_be_bytes());
        assert_eq!(&bytes[9..11], &8u16.to_be_bytes());
        assert_eq!(&bytes[11..19], b"get-refs");
        assert_eq!(Frame::decode(bytes).unwrap(), frame);
    }

    #[test]
    fn test_error_frame() {
        let frame = Frame::Error { id: 3, message: "not allowed".into() };
        let decoded = Frame::decode(frame.encode().unwrap()).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.id(), 3);
    }

    #[test]
    fn test_empty_response_payload() {
        let frame = Frame::Response { id: u64::MAX, payload: Bytes::new() };
        assert_eq!(Frame::decode(frame.encode().unwrap()).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Frame::decode(Bytes::from_static(&[1, 0, 0])).is_err());
        assert!(Frame::decode(Bytes::from_static(&[9, 0, 0, 0, 0, 0, 0, 0, 0])).is_err());
        // method length longer than the remaining bytes
        assert!(Frame::decode(Bytes::from_static(&[1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 5, b'a'])).is_err());
        assert!(Frame::decode(Bytes::from_static(&[3, 0, 0, 0, 0, 0, 0, 0, 1, 0xff])).is_err());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = Frame::Response {
            id: 1,
            payload: Bytes::from(vec![0u8; MAX_FRAME_LEN]),
        };
        assert!(frame.encode().is_err());
    }

    proptest::proptest! {
        #[test]
        fn decode_never_panics(data in proptest::collection::vec(proptest::num::u8::ANY, 0..64)) {
            let _ = Frame::decode(Bytes::from(data));
        }
    }
}
