//! sotto-p2p — transport for the peer wire protocol.
//!
//! Length-prefixed frames over TCP, tag-dispatched through a `FrameHandler`
//! seam; UDP presence announcements; and the unframed rendez-vous directory
//! protocol. This crate moves bytes and tracks connections — what a frame
//! *means* is decided one layer up, in the node.

pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod message;
pub mod peer;
pub mod socket;

pub use config::P2pConfig;
pub use error::P2pError;
pub use message::WireMessage;
pub use peer::{PeerAddr, SessionState};
pub use socket::{Connection, FrameHandler, PeerSocket};
