//! Length-prefixed message framing for stream sockets.
//!
//! Every message on the wire is framed as:
//! - A 2-byte little-endian payload length
//! - The payload itself (`length` bytes)
//!
//! A length of zero carries no payload and signals a graceful disconnect.
//! No partial reads, no buffer management in user code.

pub mod codec;
pub mod error;
pub mod payload;

pub use codec::{
    decode_frame, encode_disconnect, encode_frame, Frame, FrameCodec, LENGTH_PREFIX_SIZE,
    MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use payload::IntoPayload;
