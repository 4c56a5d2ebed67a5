use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::BytesMut;
use framelink_frame::{encode_disconnect, encode_frame, Frame, FrameCodec, FrameError, IntoPayload};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::actions::ActionRouter;
use crate::error::{NetError, Result};
use crate::events::{lock, read_lock, write_lock, ErrorPolicy, Observers};
use crate::message::Message;

/// Process-wide connection id source; ids only need to be unique keys.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// The single-owner decision of who receives the next completed message.
///
/// Swapped under the mutex as a whole so the race between a correlator
/// timeout and a reply arrival has exactly one winner.
pub(crate) enum ReceiveTarget {
    /// Route to the attached action router, or failing that the `on_data`
    /// observers.
    Default,
    /// The next message is captured by a pending `request` call.
    AwaitingReply(oneshot::Sender<Message>),
}

struct ConnectionInner {
    id: u64,
    peer_addr: SocketAddr,
    /// Write half behind an async mutex: a frame is written as one buffer,
    /// so concurrent senders never interleave mid-frame. `None` once closed.
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    redirect: Mutex<ReceiveTarget>,
    router: RwLock<Option<Arc<ActionRouter>>>,
    on_data: Observers<dyn Fn(Message) + Send + Sync>,
    on_disconnect: Observers<dyn Fn(&Connection) + Send + Sync>,
    on_error: Observers<dyn Fn(&NetError) + Send + Sync>,
    error_policy: RwLock<ErrorPolicy>,
    open: AtomicBool,
    token: CancellationToken,
}

/// One live socket plus its framing state.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Connect to a remote listener.
    ///
    /// The receive loop starts immediately; register observers before the
    /// peer is expected to send.
    pub async fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| NetError::ConnectTimeout(timeout))??;
        let (connection, read) = Self::from_stream(stream)?;
        debug!(id = connection.id(), peer = %connection.peer_addr(), "connected");
        connection.begin_receive(read);
        Ok(connection)
    }

    /// Wrap an established stream. The receive loop is not started yet, so
    /// the caller can wire observers first.
    pub(crate) fn from_stream(stream: TcpStream) -> Result<(Self, OwnedReadHalf)> {
        let peer_addr = stream.peer_addr()?;
        let (read, write) = stream.into_split();
        let inner = ConnectionInner {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            writer: tokio::sync::Mutex::new(Some(write)),
            redirect: Mutex::new(ReceiveTarget::Default),
            router: RwLock::new(None),
            on_data: Observers::new(),
            on_disconnect: Observers::new(),
            on_error: Observers::new(),
            error_policy: RwLock::new(ErrorPolicy::default()),
            open: AtomicBool::new(true),
            token: CancellationToken::new(),
        };
        Ok((
            Self {
                inner: Arc::new(inner),
            },
            read,
        ))
    }

    /// Spawn the sequential receive loop for this connection.
    pub(crate) fn begin_receive(&self, read: OwnedReadHalf) {
        let connection = self.clone();
        tokio::spawn(async move {
            connection.receive_loop(read).await;
        });
    }

    /// Unique id of this connection.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer_addr
    }

    /// True until the connection is disposed or the peer disconnects.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Register an observer for received messages.
    ///
    /// Observers run synchronously, in registration order, on the receive
    /// loop; they are skipped while a `request` is pending or an action
    /// router is attached.
    pub fn on_data(&self, observer: impl Fn(Message) + Send + Sync + 'static) {
        self.inner.on_data.register(Arc::new(observer));
    }

    /// Register an observer fired exactly once when the connection ends.
    pub fn on_disconnect(&self, observer: impl Fn(&Connection) + Send + Sync + 'static) {
        self.inner.on_disconnect.register(Arc::new(observer));
    }

    /// Register an observer for I/O errors on this connection.
    pub fn on_error(&self, observer: impl Fn(&NetError) + Send + Sync + 'static) {
        self.inner.on_error.register(Arc::new(observer));
    }

    /// Route incoming messages through an action router instead of the
    /// `on_data` observers.
    pub fn set_action_router(&self, router: Arc<ActionRouter>) {
        *write_lock(&self.inner.router) = Some(router);
    }

    /// What happens to errors nobody observes.
    pub fn set_error_policy(&self, policy: ErrorPolicy) {
        *write_lock(&self.inner.error_policy) = policy;
    }

    /// Send one framed payload.
    ///
    /// The length prefix and payload go out as a single buffered write under
    /// the writer lock, so frames from concurrent callers never interleave.
    pub async fn send(&self, payload: impl IntoPayload) -> Result<()> {
        let payload = payload.into_payload();
        let mut buf = BytesMut::with_capacity(framelink_frame::LENGTH_PREFIX_SIZE + payload.len());
        encode_frame(&payload, &mut buf)?;

        let mut writer = self.inner.writer.lock().await;
        let writer = writer.as_mut().ok_or(NetError::ConnectionClosed)?;
        writer.write_all(&buf).await?;
        trace!(id = self.id(), len = payload.len(), "sent frame");
        Ok(())
    }

    /// Close the connection. Idempotent and safe from any task.
    ///
    /// Sends a best-effort zero-length frame so the peer sees an orderly
    /// disconnect, shuts the socket down, stops the receive loop, and fires
    /// the disconnect observers exactly once.
    pub async fn dispose(&self) {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.token.cancel();

        {
            let mut writer = self.inner.writer.lock().await;
            if let Some(mut write) = writer.take() {
                let mut buf = BytesMut::new();
                encode_disconnect(&mut buf);
                let _ = write.write_all(&buf).await;
                let _ = write.shutdown().await;
            }
        }

        // Drop any armed reply capture so a pending request resolves now
        // instead of waiting out its timeout.
        *lock(&self.inner.redirect) = ReceiveTarget::Default;

        debug!(id = self.id(), peer = %self.peer_addr(), "disconnected");
        for observer in self.inner.on_disconnect.snapshot() {
            observer(self);
        }
    }

    /// Replace the redirect target with a one-shot reply capture.
    pub(crate) fn arm_reply(&self, sender: oneshot::Sender<Message>) {
        *lock(&self.inner.redirect) = ReceiveTarget::AwaitingReply(sender);
    }

    /// Restore the default redirect target if a capture is still armed.
    pub(crate) fn disarm_reply(&self) {
        let mut slot = lock(&self.inner.redirect);
        if matches!(*slot, ReceiveTarget::AwaitingReply(_)) {
            *slot = ReceiveTarget::Default;
        }
    }

    /// Hand one completed message to its single consumer.
    fn deliver(&self, message: Message) {
        let armed = {
            let mut slot = lock(&self.inner.redirect);
            match std::mem::replace(&mut *slot, ReceiveTarget::Default) {
                ReceiveTarget::AwaitingReply(sender) => Some(sender),
                ReceiveTarget::Default => None,
            }
        };

        let message = match armed {
            // The capture's receiver is gone when its timeout won the race;
            // the message then belongs to the restored default consumer.
            Some(sender) => match sender.send(message) {
                Ok(()) => return,
                Err(message) => message,
            },
            None => message,
        };

        let router = read_lock(&self.inner.router).clone();
        if let Some(router) = router {
            router.dispatch(message);
            return;
        }

        for observer in self.inner.on_data.snapshot() {
            observer(message.clone());
        }
    }

    /// Report an error through the observers, or apply the policy.
    pub(crate) fn fire_error(&self, err: &NetError) {
        let observers = self.inner.on_error.snapshot();
        if observers.is_empty() {
            let policy = *read_lock(&self.inner.error_policy);
            match policy {
                ErrorPolicy::Log => error!(id = self.id(), %err, "unobserved connection error"),
                ErrorPolicy::Panic => panic!("unobserved connection error: {err}"),
            }
            return;
        }
        for observer in observers {
            observer(err);
        }
    }

    /// Strictly sequential receive loop: the next frame is decoded only
    /// after the current message's consumer has run.
    async fn receive_loop(self, read: OwnedReadHalf) {
        let mut frames = FramedRead::new(read, FrameCodec::new());
        loop {
            let next = tokio::select! {
                _ = self.inner.token.cancelled() => break,
                next = frames.next() => next,
            };
            match next {
                Some(Ok(Frame::Payload(payload))) => {
                    trace!(id = self.id(), len = payload.len(), "received frame");
                    self.deliver(Message::new(payload, self.clone()));
                }
                // Zero-length frame and EOF are the same orderly disconnect.
                Some(Ok(Frame::Disconnect)) | None => break,
                Some(Err(err)) if is_disconnect_error(&err) => break,
                Some(Err(err)) => {
                    self.fire_error(&err.into());
                    break;
                }
            }
        }
        self.dispose().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer_addr", &self.peer_addr())
            .field("open", &self.is_open())
            .finish()
    }
}

/// A reset mid-read is an orderly disconnect, not an error (spec: treated
/// identically to the zero-length frame).
fn is_disconnect_error(err: &FrameError) -> bool {
    matches!(
        err,
        FrameError::Io(io) if matches!(
            io.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::BrokenPipe
                | ErrorKind::UnexpectedEof
        )
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;

    /// A connected (client, server) pair with both receive loops running.
    async fn connected_pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });

        let client = Connection::connect(addr, Duration::from_secs(1))
            .await
            .unwrap();
        let (server, read) = Connection::from_stream(accept.await.unwrap()).unwrap();
        server.begin_receive(read);
        (client, server)
    }

    #[tokio::test]
    async fn payload_round_trip_in_order() {
        let (client, server) = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.on_data(move |message| {
            tx.send(message.into_payload()).unwrap();
        });

        for i in 0..100u32 {
            client.send(i).await.unwrap();
        }

        for i in 0..100u32 {
            let payload = rx.recv().await.unwrap();
            assert_eq!(payload.as_ref(), i.to_le_bytes());
        }
    }

    #[tokio::test]
    async fn dispose_notifies_peer_once() {
        let (client, server) = connected_pair().await;
        let disconnects = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&disconnects);
        server.on_disconnect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });

        client.dispose().await;
        client.dispose().await; // second disposal is a no-op

        rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(disconnects.load(Ordering::SeqCst), 1);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn send_after_dispose_fails() {
        let (client, _server) = connected_pair().await;
        client.dispose().await;
        let err = client.send(b"late").await.unwrap_err();
        assert!(matches!(err, NetError::ConnectionClosed));
    }

    #[tokio::test]
    async fn empty_payload_rejected_at_send() {
        let (client, _server) = connected_pair().await;
        let err = client.send(b"").await.unwrap_err();
        assert!(matches!(err, NetError::Frame(FrameError::EmptyPayload)));
    }

    #[tokio::test]
    async fn concurrent_senders_never_interleave_frames() {
        let (client, server) = connected_pair().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.on_data(move |message| {
            tx.send(message.into_payload()).unwrap();
        });

        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move {
                // Distinct fill byte per sender so torn frames are visible.
                let payload = vec![i; 1000 + i as usize];
                for _ in 0..20 {
                    client.send(payload.clone()).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        for _ in 0..(16 * 20) {
            let payload = rx.recv().await.unwrap();
            let fill = payload[0];
            assert_eq!(payload.len(), 1000 + fill as usize);
            assert!(payload.iter().all(|byte| *byte == fill));
        }
    }

    #[tokio::test]
    async fn raw_zero_length_frame_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut raw = TcpStream::connect(addr).await.unwrap();

        let (server, read) = Connection::from_stream(accept.await.unwrap()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.on_disconnect(move |connection| {
            tx.send(connection.id()).unwrap();
        });
        server.begin_receive(read);

        raw.write_all(&[0x00, 0x00]).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), server.id());
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn truncated_frame_at_eof_fires_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut raw = TcpStream::connect(addr).await.unwrap();

        let (server, read) = Connection::from_stream(accept.await.unwrap()).unwrap();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();
        server.on_error(move |err| {
            err_tx.send(err.to_string()).unwrap();
        });
        server.begin_receive(read);

        // Announce 5 bytes, deliver 1, then close.
        raw.write_all(&[0x05, 0x00, 0x61]).await.unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        err_rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn panic_policy_panics_the_receive_task_on_unobserved_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut raw = TcpStream::connect(addr).await.unwrap();

        let (server, read) = Connection::from_stream(accept.await.unwrap()).unwrap();
        server.set_error_policy(ErrorPolicy::Panic);
        let receive = tokio::spawn(server.clone().receive_loop(read));

        // Truncated frame with no on_error observer registered.
        raw.write_all(&[0x05, 0x00, 0x61]).await.unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        let joined = receive.await;
        assert!(joined.unwrap_err().is_panic());
    }

    #[tokio::test]
    async fn log_policy_survives_unobserved_error_and_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let mut raw = TcpStream::connect(addr).await.unwrap();

        let (server, read) = Connection::from_stream(accept.await.unwrap()).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.on_disconnect(move |_| {
            tx.send(()).unwrap();
        });
        // Default policy is Log; the error is written to the log and the
        // connection still winds down in order.
        server.begin_receive(read);

        raw.write_all(&[0x05, 0x00, 0x61]).await.unwrap();
        raw.shutdown().await.unwrap();
        drop(raw);

        rx.recv().await.unwrap();
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_fails() {
        // RFC 5737 TEST-NET-1: no host answers; depending on the network the
        // SYN either times out or is rejected outright.
        let addr: SocketAddr = "192.0.2.1:9".parse().unwrap();
        let err = Connection::connect(addr, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NetError::ConnectTimeout(_) | NetError::Io(_)
        ));
    }
}
