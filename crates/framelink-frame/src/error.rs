/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload is empty; a zero-length frame is reserved as the
    /// disconnect signal and cannot carry data.
    #[error("payload is empty (zero length is the disconnect signal)")]
    EmptyPayload,

    /// The payload exceeds what a 2-byte length prefix can describe.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
