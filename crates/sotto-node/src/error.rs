use thiserror::Error;

use sotto_core::SottoError;
use sotto_p2p::P2pError;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Protocol(#[from] SottoError),

    #[error(transparent)]
    Transport(#[from] P2pError),

    #[error("refusing to connect to self")]
    SelfDial,
}
