use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};

/// Wire prefix: payload length as a little-endian u16.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Maximum payload size describable by the length prefix.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// One decoded unit from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete payload.
    Payload(Bytes),
    /// A zero-length frame: the peer is disconnecting gracefully.
    Disconnect,
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────────┐
/// │ Length (2B)  │ Payload          │
/// │ u16 LE       │ (Length bytes)   │
/// └──────────────┴──────────────────┘
/// ```
///
/// Empty payloads are rejected: a zero length is the disconnect signal.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
    dst.put_u16_le(payload.len() as u16);
    dst.put_slice(payload);
    Ok(())
}

/// Encode the zero-length disconnect frame.
pub fn encode_disconnect(dst: &mut BytesMut) {
    dst.put_u16_le(0);
}

/// Decode one frame from a buffer.
///
/// Returns `None` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut) -> Option<Frame> {
    if src.len() < LENGTH_PREFIX_SIZE {
        return None; // Need more data
    }

    let length = u16::from_le_bytes([src[0], src[1]]) as usize;
    if length == 0 {
        src.advance(LENGTH_PREFIX_SIZE);
        return Some(Frame::Disconnect);
    }

    if src.len() < LENGTH_PREFIX_SIZE + length {
        return None; // Need more data
    }

    src.advance(LENGTH_PREFIX_SIZE);
    let payload = src.split_to(length).freeze();
    Some(Frame::Payload(payload))
}

/// `tokio_util` codec over the wire format, for use with `FramedRead`.
///
/// Partial reads are accumulated by the framing layer; `decode` only yields
/// once a complete frame is buffered.
#[derive(Debug, Default, Clone)]
pub struct FrameCodec {
    _private: (),
}

impl FrameCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        Ok(decode_frame(src))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
        encode_frame(payload, dst)
    }
}
