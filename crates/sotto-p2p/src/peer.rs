use std::fmt;

use serde::{Deserialize, Serialize};

/// Another node's dialable identity. Membership in the peer set is
/// best-effort and eventually consistent; an entry says nothing about
/// whether a connection is currently live.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddr({}:{})", self.host, self.port)
    }
}

/// Observable lifecycle of one peer session.
///
/// ```text
///       dial/accept            first frame
///  NEW ────────────▶ OPEN ────────────────▶ ACTIVE
///                     │                        │
///                     │ INCOME_PORT            │ EOF / I/O error
///                     ▼                        ▼
///                 REGISTERED                CLOSED
/// ```
///
/// REGISTERED is ACTIVE with a known symmetric address; any state moves to
/// CLOSED on error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Active,
    Registered,
    Closed,
}
