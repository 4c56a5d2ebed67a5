use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::connection::Connection;
use crate::error::{NetError, Result};
use crate::events::{lock, read_lock, write_lock, ErrorPolicy, Observers};
use crate::message::Message;

struct ListenerInner {
    running: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Live server-side connections. Add on accept and remove on disconnect
    /// happen under this lock; teardown drains it in one critical section.
    registry: Mutex<HashMap<u64, Connection>>,
    on_connect: Observers<dyn Fn(&Connection) + Send + Sync>,
    on_disconnect: Observers<dyn Fn(&Connection) + Send + Sync>,
    on_data: Observers<dyn Fn(Message) + Send + Sync>,
    on_error: Observers<dyn Fn(&NetError) + Send + Sync>,
    error_policy: RwLock<ErrorPolicy>,
    token: Mutex<CancellationToken>,
}

/// Accepts connections and tracks the live set.
///
/// State machine: `Stopped → Running → Stopped`; `start` after `dispose` is
/// allowed.
pub struct Listener {
    inner: Arc<ListenerInner>,
}

impl Listener {
    /// Create a stopped listener. Register observers, then `start`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                running: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                registry: Mutex::new(HashMap::new()),
                on_connect: Observers::new(),
                on_disconnect: Observers::new(),
                on_data: Observers::new(),
                on_error: Observers::new(),
                error_policy: RwLock::new(ErrorPolicy::default()),
                token: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    /// Bind and begin accepting.
    ///
    /// Fails with [`NetError::AlreadyRunning`] while running and
    /// [`NetError::InvalidPort`] for port zero; for an OS-assigned port use
    /// [`Listener::start_ephemeral`].
    pub async fn start(&self, address: IpAddr, port: u16) -> Result<SocketAddr> {
        if port == 0 {
            return Err(NetError::InvalidPort);
        }
        self.start_on(SocketAddr::new(address, port)).await
    }

    /// Bind to an OS-assigned port on `address`; returns the bound address.
    pub async fn start_ephemeral(&self, address: IpAddr) -> Result<SocketAddr> {
        self.start_on(SocketAddr::new(address, 0)).await
    }

    async fn start_on(&self, addr: SocketAddr) -> Result<SocketAddr> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NetError::AlreadyRunning);
        }

        let socket = match TcpListener::bind(addr).await {
            Ok(socket) => socket,
            Err(err) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(err.into());
            }
        };
        let local_addr = socket.local_addr()?;
        *lock(&self.inner.local_addr) = Some(local_addr);

        let token = CancellationToken::new();
        *lock(&self.inner.token) = token.clone();

        debug!(%local_addr, "listener started");
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            accept_loop(inner, socket, token).await;
        });
        Ok(local_addr)
    }

    /// True between a successful `start` and `dispose`.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Address bound by the most recent `start`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    /// Number of currently connected peers.
    pub fn connected_count(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Snapshot of the currently connected peers.
    pub fn connections(&self) -> Vec<Connection> {
        lock(&self.inner.registry).values().cloned().collect()
    }

    /// Fired for every accepted connection, before its receive loop starts.
    /// `dispose` is async, so to dismiss a peer from the observer clone the
    /// connection and spawn its disposal.
    pub fn on_connect(&self, observer: impl Fn(&Connection) + Send + Sync + 'static) {
        self.inner.on_connect.register(Arc::new(observer));
    }

    /// Fired exactly once per connection after it has left the registry.
    pub fn on_disconnect(&self, observer: impl Fn(&Connection) + Send + Sync + 'static) {
        self.inner.on_disconnect.register(Arc::new(observer));
    }

    /// Fired for every message that reaches a connection's default consumer.
    pub fn on_data(&self, observer: impl Fn(Message) + Send + Sync + 'static) {
        self.inner.on_data.register(Arc::new(observer));
    }

    /// Fired for accept failures and per-connection I/O errors.
    pub fn on_error(&self, observer: impl Fn(&NetError) + Send + Sync + 'static) {
        self.inner.on_error.register(Arc::new(observer));
    }

    /// What happens to errors nobody observes.
    pub fn set_error_policy(&self, policy: ErrorPolicy) {
        *write_lock(&self.inner.error_policy) = policy;
    }

    /// Stop accepting and dispose every live connection.
    ///
    /// The registry is drained under its lock and the connections are
    /// disposed outside it, so a connection's own disconnect-driven removal
    /// cannot deadlock against this teardown; it simply finds no entry.
    pub async fn dispose(&self) {
        // Snapshot the accept loop's token before giving up Running: a
        // `start` racing this teardown can only install a fresh token after
        // the swap, so the fresh loop is never the one cancelled here.
        let token = lock(&self.inner.token).clone();
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        token.cancel();

        let drained: Vec<Connection> = {
            let mut registry = lock(&self.inner.registry);
            registry.drain().map(|(_, connection)| connection).collect()
        };
        for connection in drained {
            connection.dispose().await;
        }
        debug!("listener stopped");
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self::new()
    }
}

/// Continuous, self-re-arming accept loop.
async fn accept_loop(inner: Arc<ListenerInner>, socket: TcpListener, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = socket.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(err) = register_accepted(&inner, stream) {
                    warn!(%peer, %err, "accepted connection failed during setup");
                    fire_listener_error(&inner, &err);
                }
            }
            Err(err) => {
                if !inner.running.load(Ordering::SeqCst) {
                    break;
                }
                // Transient accept failure; keep the loop alive.
                fire_listener_error(&inner, &err.into());
            }
        }
    }
}

/// Wrap an accepted socket, wire it to the listener, start receiving.
///
/// Runs under the registry lock with `running` re-checked there. `dispose`
/// clears `running` before draining the registry under the same lock, so an
/// accept that resolves mid-teardown cannot insert a connection the drain
/// will not see; such a late arrival is dismissed instead.
fn register_accepted(inner: &Arc<ListenerInner>, stream: tokio::net::TcpStream) -> Result<()> {
    let mut registry = lock(&inner.registry);
    let (connection, read) = Connection::from_stream(stream)?;
    let id = connection.id();

    if !inner.running.load(Ordering::SeqCst) {
        drop(registry);
        debug!(id, peer = %connection.peer_addr(), "accepted mid-teardown, dismissing");
        tokio::spawn(async move {
            connection.dispose().await;
        });
        return Ok(());
    }

    // Removal runs first among the disconnect observers, so the registry
    // never counts a peer whose disconnect has already been announced.
    let weak = Arc::downgrade(inner);
    connection.on_disconnect(move |connection| {
        if let Some(inner) = weak.upgrade() {
            let removed = lock(&inner.registry).remove(&connection.id()).is_some();
            if !removed {
                // Already drained by a concurrent listener teardown.
                debug!(id = connection.id(), "disconnect after registry drain");
            }
            for observer in inner.on_disconnect.snapshot() {
                observer(connection);
            }
        }
    });

    let weak = Arc::downgrade(inner);
    connection.on_data(move |message| {
        if let Some(inner) = weak.upgrade() {
            for observer in inner.on_data.snapshot() {
                observer(message.clone());
            }
        }
    });

    let weak = Arc::downgrade(inner);
    connection.on_error(move |err| {
        if let Some(inner) = weak.upgrade() {
            fire_listener_error(&inner, err);
        }
    });

    registry.insert(id, connection.clone());
    drop(registry);
    debug!(id, peer = %connection.peer_addr(), "peer connected");
    for observer in inner.on_connect.snapshot() {
        observer(&connection);
    }
    connection.begin_receive(read);
    Ok(())
}

fn fire_listener_error(inner: &Arc<ListenerInner>, err: &NetError) {
    let observers = inner.on_error.snapshot();
    if observers.is_empty() {
        let policy = *read_lock(&inner.error_policy);
        match policy {
            ErrorPolicy::Log => error!(%err, "unobserved listener error"),
            ErrorPolicy::Panic => panic!("unobserved listener error: {err}"),
        }
        return;
    }
    for observer in observers {
        observer(err);
    }
}
