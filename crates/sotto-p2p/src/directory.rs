//! Rendez-vous directory protocol: a trivial unframed TCP exchange used only
//! for bootstrap. `GET_PEERS` is answered with a JSON array of
//! `[host, port]` entries and a close; `NEW_PEER<port>` registers the caller
//! (host inferred from the source address); `INVALID_PEER<host>:<port>`
//! prunes a dead entry. The directory is not part of consensus — a node that
//! cannot reach it simply runs with the peers it already knows.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::P2pError;
use crate::peer::PeerAddr;

const TAG_GET_PEERS: &[u8] = b"GET_PEERS";
const TAG_NEW_PEER: &[u8] = b"NEW_PEER";
const TAG_INVALID_PEER: &[u8] = b"INVALID_PEER";

/// Every directory exchange is bounded by this.
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(5);

// ── Client ───────────────────────────────────────────────────────────────────

async fn with_timeout<T>(
    directory: &str,
    fut: impl std::future::Future<Output = Result<T, P2pError>>,
) -> Result<T, P2pError> {
    tokio::time::timeout(DIRECTORY_TIMEOUT, fut)
        .await
        .map_err(|_| P2pError::Timeout(directory.to_string()))?
}

/// `GET_PEERS`: fetch the directory's current peer list.
pub async fn fetch_peers(directory: &str) -> Result<Vec<PeerAddr>, P2pError> {
    with_timeout(directory, async {
        let mut stream = TcpStream::connect(directory).await?;
        stream.write_all(TAG_GET_PEERS).await?;
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        let entries: Vec<(String, u16)> =
            serde_json::from_slice(&reply).map_err(|_| P2pError::MalformedDirectoryReply)?;
        Ok(entries
            .into_iter()
            .map(|(host, port)| PeerAddr::new(host, port))
            .collect())
    })
    .await
}

/// `NEW_PEER`: register our listening port. The directory pairs it with the
/// source address it sees.
pub async fn register(directory: &str, port: u16) -> Result<(), P2pError> {
    with_timeout(directory, async {
        let mut stream = TcpStream::connect(directory).await?;
        stream
            .write_all(format!("NEW_PEER{port}").as_bytes())
            .await?;
        Ok(())
    })
    .await
}

/// `INVALID_PEER`: tell the directory a listed peer refused our dial.
pub async fn report_invalid(directory: &str, peer: &PeerAddr) -> Result<(), P2pError> {
    with_timeout(directory, async {
        let mut stream = TcpStream::connect(directory).await?;
        stream
            .write_all(format!("INVALID_PEER{}:{}", peer.host, peer.port).as_bytes())
            .await?;
        Ok(())
    })
    .await
}

// ── Server ───────────────────────────────────────────────────────────────────

/// The directory itself. Ships as the `sotto-directory` binary and backs the
/// integration tests; nodes only ever speak the client half above.
#[derive(Default)]
pub struct DirectoryServer {
    peers: Mutex<HashSet<(String, u16)>>,
}

impl DirectoryServer {
    /// Bind `addr`, start serving, and return the handle plus the bound
    /// address (useful with port 0).
    pub async fn serve(
        addr: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Arc<Self>, SocketAddr), P2pError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, "directory listening");
        let server = Arc::new(Self::default());
        tokio::spawn(Self::accept_loop(Arc::clone(&server), listener, shutdown));
        Ok((server, local))
    }

    pub fn peers(&self) -> Vec<PeerAddr> {
        let peers = self.peers.lock().unwrap_or_else(|p| p.into_inner());
        peers
            .iter()
            .map(|(host, port)| PeerAddr::new(host.clone(), *port))
            .collect()
    }

    async fn accept_loop(
        server: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        tokio::spawn(Self::handle_client(Arc::clone(&server), stream, remote));
                    }
                    Err(e) => warn!(error = %e, "directory accept failed"),
                }
            }
        }
        debug!("directory stopped");
    }

    async fn handle_client(server: Arc<Self>, mut stream: TcpStream, remote: SocketAddr) {
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(%remote, error = %e, "directory client read failed");
                    break;
                }
            };
            let message = &buf[..n];

            if message.starts_with(TAG_GET_PEERS) {
                let entries: Vec<(String, u16)> = {
                    let peers = server.peers.lock().unwrap_or_else(|p| p.into_inner());
                    peers.iter().cloned().collect()
                };
                let reply = serde_json::to_vec(&entries).unwrap_or_default();
                if let Err(e) = stream.write_all(&reply).await {
                    warn!(%remote, error = %e, "directory reply failed");
                }
                break; // reply, then close — the close delimits the reply
            } else if message.starts_with(TAG_NEW_PEER) {
                let port_text = String::from_utf8_lossy(&message[TAG_NEW_PEER.len()..]);
                match port_text.trim().parse::<u16>() {
                    Ok(port) => {
                        let host = remote.ip().to_string();
                        info!(host = %host, port, "directory: peer registered");
                        let mut peers =
                            server.peers.lock().unwrap_or_else(|p| p.into_inner());
                        peers.insert((host, port));
                    }
                    Err(_) => debug!(%remote, "directory: bad NEW_PEER port"),
                }
            } else if message.starts_with(TAG_INVALID_PEER) {
                let entry = String::from_utf8_lossy(&message[TAG_INVALID_PEER.len()..]);
                if let Some((host, port_text)) = entry.trim().rsplit_once(':') {
                    if let Ok(port) = port_text.parse::<u16>() {
                        info!(host, port, "directory: peer pruned");
                        let mut peers =
                            server.peers.lock().unwrap_or_else(|p| p.into_inner());
                        peers.remove(&(host.to_string(), port));
                    }
                }
            } else {
                debug!(%remote, "directory: unknown message ignored");
            }
        }
    }
}
