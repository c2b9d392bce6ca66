use std::time::Duration;

use sotto_core::constants::{
    BROADCAST_PORT, DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_DIFFICULTY, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_PORT, DEFAULT_SYNC_INTERVAL_SECS,
};
use sotto_p2p::P2pConfig;

/// Everything a node needs to start. `port: 0` binds an ephemeral port
/// (tests lean on this).
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface to bind and the host announced to the LAN.
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Initial difficulty; the local policy adjusts it between mines.
    pub difficulty: u32,
    /// UDP discovery settings. Discovery can be disabled wholesale, e.g. for
    /// tests or machines without broadcast.
    pub broadcast_port: u16,
    pub broadcast_interval: Duration,
    pub enable_discovery: bool,
    /// Seconds between periodic chain syncs with known peers.
    pub sync_interval: Duration,
    /// Rendez-vous directory address (`host:port`), if any.
    pub directory: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            difficulty: DEFAULT_DIFFICULTY,
            broadcast_port: BROADCAST_PORT,
            broadcast_interval: Duration::from_secs(DEFAULT_BROADCAST_INTERVAL_SECS),
            enable_discovery: true,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            directory: None,
        }
    }
}

impl NodeConfig {
    pub(crate) fn p2p(&self) -> P2pConfig {
        P2pConfig {
            host: self.host.clone(),
            port: self.port,
            max_connections: self.max_connections,
        }
    }
}
