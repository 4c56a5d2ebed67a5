//! Action routing: dispatch an incoming message to a handler selected by an
//! integer code embedded at the front of the payload.
//!
//! Wire contract: the first [`ACTION_CODE_SIZE`] payload bytes are the action
//! code, a little-endian `u32`; the rest is the action body. Client and
//! server must agree on this constant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use framelink_frame::IntoPayload;
use tracing::trace;

use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::events::Observers;
use crate::message::Message;

/// Width of the action-code tag on the wire.
pub const ACTION_CODE_SIZE: usize = 4;

/// A registered action: receives the originating connection and the message
/// body with the code stripped.
pub type ActionHandler = Arc<dyn Fn(&Connection, Message) + Send + Sync>;

/// Gate evaluated before a handler runs; `false` discards the message.
pub type Interceptor = Arc<dyn Fn(u32, &Message) -> bool + Send + Sync>;

/// One entry for bulk registration, with an optional group tag usable as a
/// registration-time filter.
pub struct ActionRegistration {
    pub code: u32,
    pub group: Option<&'static str>,
    pub handler: ActionHandler,
}

impl ActionRegistration {
    /// Ungrouped registration.
    pub fn new(code: u32, handler: impl Fn(&Connection, Message) + Send + Sync + 'static) -> Self {
        Self {
            code,
            group: None,
            handler: Arc::new(handler),
        }
    }

    /// Registration carrying a group tag.
    pub fn grouped(
        code: u32,
        group: &'static str,
        handler: impl Fn(&Connection, Message) + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            group: Some(group),
            handler: Arc::new(handler),
        }
    }
}

/// Table mapping action codes to handlers.
///
/// Built mutably, then attached to connections behind an `Arc` via
/// [`Connection::set_action_router`]; entries are never removed.
#[derive(Default)]
pub struct ActionRouter {
    actions: HashMap<u32, ActionHandler>,
    interceptor: Option<Interceptor>,
    on_unknown_action: Observers<dyn Fn(Message) + Send + Sync>,
}

impl ActionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `code`.
    ///
    /// Fails with [`NetError::DuplicateAction`] if the code is taken; the
    /// existing registration stays intact.
    pub fn register(
        &mut self,
        code: u32,
        handler: impl Fn(&Connection, Message) + Send + Sync + 'static,
    ) -> Result<()> {
        if self.actions.contains_key(&code) {
            return Err(NetError::DuplicateAction(code));
        }
        self.actions.insert(code, Arc::new(handler));
        Ok(())
    }

    /// Register a batch, optionally keeping only one group.
    ///
    /// With `group` set, registrations tagged differently (or untagged) are
    /// skipped; the tag is purely a registration filter and never appears on
    /// the wire.
    pub fn register_all(
        &mut self,
        registrations: impl IntoIterator<Item = ActionRegistration>,
        group: Option<&str>,
    ) -> Result<()> {
        for registration in registrations {
            if let Some(group) = group {
                if registration.group != Some(group) {
                    continue;
                }
            }
            if self.actions.contains_key(&registration.code) {
                return Err(NetError::DuplicateAction(registration.code));
            }
            self.actions.insert(registration.code, registration.handler);
        }
        Ok(())
    }

    /// Gate every dispatch; returning `false` discards the message silently.
    pub fn set_interceptor(
        &mut self,
        interceptor: impl Fn(u32, &Message) -> bool + Send + Sync + 'static,
    ) {
        self.interceptor = Some(Arc::new(interceptor));
    }

    /// Observe messages whose code has no registered handler; the observer
    /// receives the full message, code bytes included.
    pub fn on_unknown_action(&mut self, observer: impl Fn(Message) + Send + Sync + 'static) {
        self.on_unknown_action.register(Arc::new(observer));
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// True if no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Route one message. Runs synchronously within the delivery of that
    /// message, so a slow handler delays the next message on the same
    /// connection only.
    pub fn dispatch(&self, message: Message) {
        if message.len() < ACTION_CODE_SIZE {
            // Too short to carry a code; surface it rather than crash.
            self.fire_unknown(message);
            return;
        }

        let payload = message.payload();
        let code = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let body = message.with_payload(payload.slice(ACTION_CODE_SIZE..));

        if let Some(interceptor) = &self.interceptor {
            if !interceptor(code, &body) {
                trace!(code, "action discarded by interceptor");
                return;
            }
        }

        match self.actions.get(&code) {
            Some(handler) => {
                let connection = body.connection().clone();
                handler(&connection, body);
            }
            None => self.fire_unknown(message),
        }
    }

    fn fire_unknown(&self, message: Message) {
        for observer in self.on_unknown_action.snapshot() {
            observer(message.clone());
        }
    }
}

impl Connection {
    /// Send a payload tagged with an action code.
    pub async fn send_action(&self, code: u32, payload: impl IntoPayload) -> Result<()> {
        self.send(tag_action(code, payload)).await
    }

    /// Send an action-tagged payload and await the reply.
    pub async fn request_action(
        &self,
        code: u32,
        payload: impl IntoPayload,
    ) -> Result<Option<Message>> {
        self.request(tag_action(code, payload)).await
    }

    /// Send an action-tagged payload and await the reply with an explicit
    /// timeout.
    pub async fn request_action_timeout(
        &self,
        code: u32,
        payload: impl IntoPayload,
        timeout: Duration,
    ) -> Result<Option<Message>> {
        self.request_timeout(tag_action(code, payload), timeout)
            .await
    }
}

fn tag_action(code: u32, payload: impl IntoPayload) -> Bytes {
    let payload = payload.into_payload();
    let mut tagged = BytesMut::with_capacity(ACTION_CODE_SIZE + payload.len());
    tagged.put_u32_le(code);
    tagged.put_slice(&payload);
    tagged.freeze()
}
