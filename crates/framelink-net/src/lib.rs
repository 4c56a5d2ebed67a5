//! Connection lifecycle, reply correlation and action routing over framed
//! TCP.
//!
//! This is the "just works" layer. A [`Listener`] accepts connections and
//! tracks the live set; each [`Connection`] turns the byte stream into
//! discrete [`Message`]s delivered to observer callbacks. On top of that,
//! [`Connection::request`] bridges a one-shot request/reply onto the event
//! stream, and an [`ActionRouter`] dispatches messages to handlers by an
//! embedded code.

pub mod actions;
pub mod connection;
pub mod error;
pub mod events;
pub mod listener;
pub mod message;
pub mod reply;

pub use actions::{
    ActionHandler, ActionRegistration, ActionRouter, Interceptor, ACTION_CODE_SIZE,
};
pub use connection::Connection;
pub use error::{NetError, Result};
pub use events::ErrorPolicy;
pub use listener::Listener;
pub use message::Message;
pub use reply::DEFAULT_REQUEST_TIMEOUT;

pub use framelink_frame::IntoPayload;
