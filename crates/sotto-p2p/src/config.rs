use sotto_core::constants::{DEFAULT_MAX_CONNECTIONS, DEFAULT_PORT};

/// Transport configuration for the peer socket.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Interface the TCP listener binds to.
    pub host: String,
    /// TCP listen port, also the port announced to peers via `INCOME_PORT`.
    pub port: u16,
    /// Concurrent peer sessions; further accepts and dials are refused.
    pub max_connections: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}
