use thiserror::Error;

use crate::peer::PeerAddr;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("malformed {tag} payload: {reason}")]
    MalformedPayload { tag: &'static str, reason: String },

    #[error("connection limit of {0} reached")]
    ConnectionLimit(usize),

    #[error("already connected to {0}")]
    AlreadyConnected(PeerAddr),

    #[error("no live connection to {0}")]
    NotConnected(PeerAddr),

    #[error("malformed directory reply")]
    MalformedDirectoryReply,

    #[error("timed out talking to {0}")]
    Timeout(String),
}
