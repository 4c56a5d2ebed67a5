use bytes::Bytes;
use framelink_frame::IntoPayload;

use crate::connection::Connection;
use crate::error::Result;

/// One fully-received payload plus the connection it arrived on.
///
/// Cheap to clone: the payload is a reference-counted `Bytes` view and the
/// connection is a shared handle.
#[derive(Clone)]
pub struct Message {
    payload: Bytes,
    connection: Connection,
}

impl Message {
    pub(crate) fn new(payload: Bytes, connection: Connection) -> Self {
        Self {
            payload,
            connection,
        }
    }

    /// The message payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message and return the payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// The connection this message arrived on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// True if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Send a payload back on the originating connection.
    pub async fn reply(&self, payload: impl IntoPayload) -> Result<()> {
        self.connection.send(payload).await
    }

    /// Re-frame this message with part of its payload stripped.
    pub(crate) fn with_payload(&self, payload: Bytes) -> Self {
        Self {
            payload,
            connection: self.connection.clone(),
        }
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("len", &self.payload.len())
            .field("connection", &self.connection.id())
            .finish()
    }
}
