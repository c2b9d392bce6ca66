use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::P2pConfig;
use crate::error::P2pError;
use crate::frame;
use crate::message::WireMessage;
use crate::peer::{PeerAddr, SessionState};

/// Upper bound on one frame write; a peer that stops draining its socket
/// costs at most this long per broadcast.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Receives every decoded frame, on the reading connection's own task.
/// Dispatch is inline: one peer's slow frame never delays another peer's
/// reader or the accept loop.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    async fn on_frame(&self, conn: &Arc<Connection>, msg: WireMessage);
}

// ── Connection ───────────────────────────────────────────────────────────────

/// One live peer session. Owned by its reader task; the write half is behind
/// a per-connection mutex so broadcast and direct replies never interleave
/// frames.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    remote: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Mutex<SessionState>,
    advertised: Mutex<Option<PeerAddr>>,
    awaiting_public_key: AtomicBool,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn remote_host(&self) -> String {
        self.remote.ip().to_string()
    }

    /// The peer's dialable address, when known: the dial target for outbound
    /// sessions, the `INCOME_PORT` registration for inbound ones.
    pub fn peer_addr(&self) -> Option<PeerAddr> {
        locked(&self.advertised).clone()
    }

    pub fn state(&self) -> SessionState {
        *locked(&self.state)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = locked(&self.state);
        if *state != next {
            debug!(conn = self.id, from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }

    /// Flag that the next raw frame on this connection answers our
    /// `REQUEST_PUBLIC_KEY`.
    pub fn expect_public_key(&self) {
        self.awaiting_public_key.store(true, Ordering::Relaxed);
    }

    pub fn take_awaiting_public_key(&self) -> bool {
        self.awaiting_public_key.swap(false, Ordering::Relaxed)
    }

    pub async fn send(&self, msg: &WireMessage) -> Result<(), P2pError> {
        self.send_payload(&msg.encode()).await
    }

    async fn send_payload(&self, payload: &[u8]) -> Result<(), P2pError> {
        let mut writer = self.writer.lock().await;
        tokio::time::timeout(WRITE_TIMEOUT, frame::write_frame(&mut *writer, payload))
            .await
            .map_err(|_| P2pError::Timeout(self.remote.to_string()))?
    }
}

// ── PeerSocket ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct ConnectionTable {
    by_id: HashMap<u64, Arc<Connection>>,
    by_addr: HashMap<PeerAddr, u64>,
}

/// The TCP endpoint of the node: accepts and dials sessions up to the
/// configured cap, runs one reader task per session, and fans frames out.
///
/// Table lookups, inserts and removals are serialized by one mutex; no I/O
/// happens while it is held — broadcast snapshots the table, then writes.
pub struct PeerSocket {
    config: P2pConfig,
    local_addr: SocketAddr,
    table: Mutex<ConnectionTable>,
    next_id: AtomicU64,
    handler: OnceLock<Weak<dyn FrameHandler>>,
    shutdown: watch::Receiver<bool>,
}

impl PeerSocket {
    /// Bind the listener and start the accept loop. A bind failure is fatal
    /// to the node and propagates.
    pub async fn bind(
        config: P2pConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<Self>, P2pError> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "peer socket listening");

        let socket = Arc::new(Self {
            config,
            local_addr,
            table: Mutex::new(ConnectionTable::default()),
            next_id: AtomicU64::new(1),
            handler: OnceLock::new(),
            shutdown,
        });
        tokio::spawn(Self::accept_loop(Arc::clone(&socket), listener));
        Ok(socket)
    }

    /// Wire in the frame handler. Frames arriving before this are dropped.
    pub fn set_handler(&self, handler: Weak<dyn FrameHandler>) {
        let _ = self.handler.set(handler);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port peers should dial back, announced via `INCOME_PORT`.
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn connection_count(&self) -> usize {
        locked(&self.table).by_id.len()
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        locked(&self.table).by_id.values().cloned().collect()
    }

    pub fn connection_to(&self, peer: &PeerAddr) -> Option<Arc<Connection>> {
        let table = locked(&self.table);
        table
            .by_addr
            .get(peer)
            .and_then(|id| table.by_id.get(id))
            .cloned()
    }

    /// Dial a peer, enforcing the connection cap and the one-session-per-
    /// address rule.
    pub async fn connect(self: &Arc<Self>, peer: &PeerAddr) -> Result<Arc<Connection>, P2pError> {
        {
            let table = locked(&self.table);
            if table.by_addr.contains_key(peer) {
                return Err(P2pError::AlreadyConnected(peer.clone()));
            }
            if table.by_id.len() >= self.config.max_connections {
                return Err(P2pError::ConnectionLimit(self.config.max_connections));
            }
        }
        let stream = TcpStream::connect((peer.host.as_str(), peer.port)).await?;
        let remote = stream.peer_addr()?;
        let conn = self.adopt(stream, remote, Some(peer.clone()))?;
        info!(peer = %peer, conn = conn.id, "connected to peer");
        Ok(conn)
    }

    /// Send to every live connection except `except` (the gossip source).
    /// The payload is encoded once; write failures are logged and leave the
    /// failing connection to its reader task to tear down.
    pub async fn broadcast(&self, msg: &WireMessage, except: Option<u64>) {
        let targets: Vec<Arc<Connection>> = {
            let table = locked(&self.table);
            table
                .by_id
                .values()
                .filter(|conn| Some(conn.id) != except)
                .cloned()
                .collect()
        };
        let payload = msg.encode();
        for conn in targets {
            if let Err(e) = conn.send_payload(&payload).await {
                warn!(conn = conn.id, error = %e, "broadcast write failed");
            }
        }
    }

    /// `INCOME_PORT` arrived: record the symmetric dial-back address for an
    /// accepted session.
    pub fn register_symmetric(&self, conn: &Arc<Connection>, port: u16) -> PeerAddr {
        let addr = PeerAddr::new(conn.remote_host(), port);
        {
            let mut table = locked(&self.table);
            table.by_addr.entry(addr.clone()).or_insert(conn.id);
        }
        *locked(&conn.advertised) = Some(addr.clone());
        conn.set_state(SessionState::Registered);
        info!(conn = conn.id, peer = %addr, "peer announced its listening port");
        addr
    }

    // ── internals ────────────────────────────────────────────────────────────

    async fn accept_loop(socket: Arc<Self>, listener: TcpListener) {
        let mut shutdown = socket.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        match socket.adopt(stream, remote, None) {
                            Ok(conn) => info!(%remote, conn = conn.id, "connection accepted"),
                            // Dropping the stream closes it: the refusal IS the reply.
                            Err(e) => warn!(%remote, error = %e, "inbound connection refused"),
                        }
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
        debug!("accept loop stopped");
    }

    /// Register a new session (either direction) and spawn its reader.
    fn adopt(
        self: &Arc<Self>,
        stream: TcpStream,
        remote: SocketAddr,
        advertised: Option<PeerAddr>,
    ) -> Result<Arc<Connection>, P2pError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        let conn = Arc::new(Connection {
            id,
            remote,
            writer: tokio::sync::Mutex::new(write_half),
            state: Mutex::new(SessionState::Open),
            advertised: Mutex::new(advertised.clone()),
            awaiting_public_key: AtomicBool::new(false),
        });
        {
            let mut table = locked(&self.table);
            if table.by_id.len() >= self.config.max_connections {
                return Err(P2pError::ConnectionLimit(self.config.max_connections));
            }
            if let Some(addr) = &advertised {
                if table.by_addr.contains_key(addr) {
                    return Err(P2pError::AlreadyConnected(addr.clone()));
                }
                table.by_addr.insert(addr.clone(), id);
            }
            table.by_id.insert(id, Arc::clone(&conn));
        }
        tokio::spawn(Self::connection_loop(
            Arc::clone(self),
            Arc::clone(&conn),
            read_half,
        ));
        Ok(conn)
    }

    async fn connection_loop(socket: Arc<Self>, conn: Arc<Connection>, mut reader: OwnedReadHalf) {
        let mut shutdown = socket.shutdown.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                read = frame::read_frame(&mut reader) => match read {
                    Ok(Some(payload)) => match WireMessage::decode(&payload) {
                        Ok(msg) => {
                            if conn.state() == SessionState::Open {
                                conn.set_state(SessionState::Active);
                            }
                            match socket.handler.get().and_then(Weak::upgrade) {
                                Some(handler) => handler.on_frame(&conn, msg).await,
                                None => debug!(conn = conn.id, "frame before handler wired, dropped"),
                            }
                        }
                        // Malformed input: frame dropped, peer kept.
                        Err(e) => warn!(conn = conn.id, error = %e, "malformed frame dropped"),
                    },
                    Ok(None) => {
                        debug!(conn = conn.id, "peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!(conn = conn.id, error = %e, "read failed");
                        break;
                    }
                }
            }
        }
        socket.remove(&conn);
    }

    fn remove(&self, conn: &Arc<Connection>) {
        conn.set_state(SessionState::Closed);
        let mut table = locked(&self.table);
        table.by_id.remove(&conn.id);
        if let Some(addr) = conn.peer_addr() {
            if table.by_addr.get(&addr) == Some(&conn.id) {
                table.by_addr.remove(&addr);
            }
        }
        info!(conn = conn.id, remote = %conn.remote, "connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;

    /// Test handler: forwards every frame into a channel and handles
    /// `INCOME_PORT` registration the way the node does.
    struct Collector {
        socket: OnceLock<Weak<PeerSocket>>,
        frames: mpsc::UnboundedSender<(u64, WireMessage)>,
    }

    #[async_trait]
    impl FrameHandler for Collector {
        async fn on_frame(&self, conn: &Arc<Connection>, msg: WireMessage) {
            if let WireMessage::IncomePort(port) = &msg {
                if let Some(socket) = self.socket.get().and_then(Weak::upgrade) {
                    socket.register_symmetric(conn, *port);
                }
            }
            let _ = self.frames.send((conn.id(), msg));
        }
    }

    async fn test_socket(
        max_connections: usize,
    ) -> (
        Arc<PeerSocket>,
        Arc<Collector>,
        mpsc::UnboundedReceiver<(u64, WireMessage)>,
        watch::Sender<bool>,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = P2pConfig {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections,
        };
        let socket = PeerSocket::bind(config, shutdown_rx).await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Collector {
            socket: OnceLock::new(),
            frames: tx,
        });
        let _ = handler.socket.set(Arc::downgrade(&socket));
        socket.set_handler(Arc::downgrade(
            &(Arc::clone(&handler) as Arc<dyn FrameHandler>),
        ));
        (socket, handler, rx, shutdown_tx)
    }

    fn addr_of(socket: &PeerSocket) -> PeerAddr {
        PeerAddr::new("127.0.0.1", socket.local_port())
    }

    #[tokio::test]
    async fn dial_send_receive() {
        let (a, _ha, mut frames_a, _sa) = test_socket(5).await;
        let (b, _hb, _frames_b, _sb) = test_socket(5).await;

        let conn = b.connect(&addr_of(&a)).await.unwrap();
        conn.send(&WireMessage::RequestChain).await.unwrap();

        let (_, msg) = frames_a.recv().await.unwrap();
        assert_eq!(msg, WireMessage::RequestChain);
        assert_eq!(a.connection_count(), 1);
        assert_eq!(b.connection_count(), 1);
    }

    #[tokio::test]
    async fn income_port_registers_the_symmetric_address() {
        let (a, _ha, mut frames_a, _sa) = test_socket(5).await;
        let (b, _hb, mut frames_b, _sb) = test_socket(5).await;

        let conn = b.connect(&addr_of(&a)).await.unwrap();
        conn.send(&WireMessage::IncomePort(b.local_port()))
            .await
            .unwrap();
        frames_a.recv().await.unwrap();

        // A can now gossip back to B over the registered address.
        let back = a.connection_to(&addr_of(&b)).expect("symmetric entry");
        assert_eq!(back.state(), SessionState::Registered);
        back.send(&WireMessage::RequestChainLength).await.unwrap();
        let (_, msg) = frames_b.recv().await.unwrap();
        assert_eq!(msg, WireMessage::RequestChainLength);
    }

    #[tokio::test]
    async fn duplicate_dial_is_refused() {
        let (a, _ha, _fa, _sa) = test_socket(5).await;
        let (b, _hb, _fb, _sb) = test_socket(5).await;

        b.connect(&addr_of(&a)).await.unwrap();
        let err = b.connect(&addr_of(&a)).await.unwrap_err();
        assert!(matches!(err, P2pError::AlreadyConnected(_)));
        assert_eq!(b.connection_count(), 1);
    }

    #[tokio::test]
    async fn outbound_cap_is_enforced() {
        let (a, _ha, _fa, _sa) = test_socket(5).await;
        let (b, _hb, _fb, _sb) = test_socket(5).await;
        let (c, _hc, _fc, _sc) = test_socket(2).await;

        c.connect(&addr_of(&a)).await.unwrap();
        c.connect(&addr_of(&b)).await.unwrap();

        let (d, _hd, _fd, _sd) = test_socket(5).await;
        let err = c.connect(&addr_of(&d)).await.unwrap_err();
        assert!(matches!(err, P2pError::ConnectionLimit(2)));
        assert_eq!(c.connection_count(), 2);
    }

    #[tokio::test]
    async fn inbound_cap_closes_the_excess_connection() {
        let (a, _ha, _fa, _sa) = test_socket(2).await;
        let target = a.local_addr();

        let _one = TcpStream::connect(target).await.unwrap();
        let _two = TcpStream::connect(target).await.unwrap();
        // Let the accept loop adopt both before the third arrives.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.connection_count(), 2);

        let mut three = TcpStream::connect(target).await.unwrap();
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), three.read(&mut buf))
            .await
            .expect("rejection should arrive promptly")
            .unwrap();
        assert_eq!(n, 0, "third connection should see immediate EOF");
        assert_eq!(a.connection_count(), 2);

        // The two earlier sessions are unaffected.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(a.connection_count(), 2);
    }

    #[tokio::test]
    async fn broadcast_reaches_all_but_the_excluded() {
        let (hub, _hh, mut hub_frames, _sh) = test_socket(5).await;
        let (x, _hx, mut fx, _sx) = test_socket(5).await;
        let (y, _hy, mut fy, _sy) = test_socket(5).await;

        let cx = x.connect(&addr_of(&hub)).await.unwrap();
        cx.send(&WireMessage::IncomePort(x.local_port())).await.unwrap();
        let cy = y.connect(&addr_of(&hub)).await.unwrap();
        cy.send(&WireMessage::IncomePort(y.local_port())).await.unwrap();
        // Arrival order across connections is not guaranteed.
        let (id1, m1) = hub_frames.recv().await.unwrap();
        let (id2, _m2) = hub_frames.recv().await.unwrap();
        let from_x = if m1 == WireMessage::IncomePort(x.local_port()) {
            id1
        } else {
            id2
        };

        let msg = WireMessage::Raw(b"whisper".to_vec());
        hub.broadcast(&msg, Some(from_x)).await;

        let (_, got) = fy.recv().await.unwrap();
        assert_eq!(got, msg);
        // X was the excluded source: nothing arrives there.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), fx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn peer_disappearing_removes_the_entry() {
        let (a, _ha, _fa, _sa) = test_socket(5).await;
        {
            let (b, _hb, _fb, shutdown_b) = test_socket(5).await;
            let conn = b.connect(&addr_of(&a)).await.unwrap();
            conn.send(&WireMessage::RequestChain).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(a.connection_count(), 1);
            let _ = shutdown_b.send(true);
            // Dropping B's socket tears its write half down → EOF at A.
            drop(conn);
            drop(b);
        }
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while a.connection_count() != 0 && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(a.connection_count(), 0);
    }
}
