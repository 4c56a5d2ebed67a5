//! One-shot request/reply correlation on top of the event stream.
//!
//! A request arms the connection's redirect slot so the next inbound message
//! is captured instead of reaching the router or `on_data` observers. The
//! timeout and the reply race for the slot; exactly one wins, and a reply
//! that loses is delivered to the restored default consumer.

use std::time::Duration;

use framelink_frame::IntoPayload;
use tokio::sync::oneshot;
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;
use crate::message::Message;

/// Timeout applied by [`Connection::request`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

impl Connection {
    /// Send a payload and await the next message as its reply, with the
    /// default timeout.
    ///
    /// Returns `Ok(None)` when no reply arrives in time; the connection's
    /// default receive behavior is restored either way.
    ///
    /// At most one request may be outstanding per connection; a second
    /// concurrent call steals the first call's capture. Never call this from
    /// inside an `on_data` observer of the same connection: the observer runs
    /// on the receive loop, so the reply could not be processed until after
    /// the wait has already timed out.
    pub async fn request(&self, payload: impl IntoPayload) -> Result<Option<Message>> {
        self.request_timeout(payload, DEFAULT_REQUEST_TIMEOUT).await
    }

    /// Send a payload and await the next message as its reply.
    pub async fn request_timeout(
        &self,
        payload: impl IntoPayload,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        let (sender, receiver) = oneshot::channel();
        self.arm_reply(sender);

        if let Err(err) = self.send(payload).await {
            self.disarm_reply();
            return Err(err);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(message)) => Ok(Some(message)),
            // Capture dropped: the connection was disposed while waiting (or
            // another request replaced this one, a documented usage error).
            Ok(Err(_)) => {
                self.disarm_reply();
                Ok(None)
            }
            Err(_) => {
                trace!(id = self.id(), ?timeout, "request timed out");
                self.disarm_reply();
                Ok(None)
            }
        }
    }
}
