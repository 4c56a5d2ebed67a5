/// Errors that can occur in connection and listener operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The listener is already running.
    #[error("listener is already running")]
    AlreadyRunning,

    /// Port zero is not a valid listening port.
    #[error("invalid port: 0")]
    InvalidPort,

    /// Connecting to the remote host did not complete in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    /// The connection was disposed or the peer is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// An action code was registered twice.
    #[error("action code {0} is already registered")]
    DuplicateAction(u32),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] framelink_frame::FrameError),

    /// I/O error on the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
