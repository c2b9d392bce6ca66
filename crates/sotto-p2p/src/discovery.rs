//! LAN peer discovery over UDP broadcast.
//!
//! Every node announces `{"host":…,"port":…}` to the broadcast address at a
//! fixed cadence and listens on the same port, feeding newly observed
//! `(source ip, announced port)` pairs to the node. The node's peer set does
//! the deduplication; its own announcements are ignored here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::peer::PeerAddr;

/// The datagram body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub host: String,
    pub port: u16,
}

/// Identity and cadence for both discovery tasks.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Host/port announced as our dialable address.
    pub host: String,
    pub port: u16,
    /// UDP port the whole LAN shares.
    pub broadcast_port: u16,
    pub interval: Duration,
}

/// Periodically shout our address at the broadcast address. Runs until
/// shutdown; socket setup failure disables announcing but not the node.
pub async fn announce_loop(config: DiscoveryConfig, mut shutdown: watch::Receiver<bool>) {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not open announce socket; discovery announcements disabled");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        error!(error = %e, "could not enable broadcast; discovery announcements disabled");
        return;
    }

    let announcement = Announcement {
        host: config.host.clone(),
        port: config.port,
    };
    let payload = match serde_json::to_vec(&announcement) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "could not encode announcement");
            return;
        }
    };
    let target = ("255.255.255.255", config.broadcast_port);

    loop {
        if let Err(e) = socket.send_to(&payload, target).await {
            warn!(error = %e, "announce send failed");
        } else {
            debug!(host = %announcement.host, port = announcement.port, "announced presence");
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
    debug!("announce loop stopped");
}

/// Bind the shared broadcast port and hand every foreign announcement to the
/// node as a `PeerAddr` built from the datagram's source IP and the
/// announced port.
pub async fn listen_loop(
    config: DiscoveryConfig,
    found: mpsc::Sender<PeerAddr>,
    shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind(("0.0.0.0", config.broadcast_port)).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "could not bind discovery listener; LAN discovery disabled");
            return;
        }
    };
    listen_on(socket, config, found, shutdown).await;
}

/// Listener body over an already-bound socket (separated so tests can bind
/// an ephemeral port).
pub async fn listen_on(
    socket: UdpSocket,
    config: DiscoveryConfig,
    found: mpsc::Sender<PeerAddr>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, src)) => {
                    let Ok(announcement) = serde_json::from_slice::<Announcement>(&buf[..n]) else {
                        debug!(%src, "undecodable discovery datagram ignored");
                        continue;
                    };
                    if announcement.host == config.host && announcement.port == config.port {
                        continue; // our own shout, looped back
                    }
                    let peer = PeerAddr::new(src.ip().to_string(), announcement.port);
                    debug!(peer = %peer, "discovered peer");
                    if found.send(peer).await.is_err() {
                        break; // node side gone
                    }
                }
                Err(e) => warn!(error = %e, "discovery receive failed"),
            }
        }
    }
    debug!("discovery listener stopped");
}
