//! sotto-node — the node itself.
//!
//! Wires the peer socket, discovery, the sync manager and the miner around
//! one shared state (chain + mempool + peer set) and exposes the command
//! surface the REPL drives. The `sotto-node` binary adds the CLI and the
//! interactive loop; the `sotto-directory` binary runs the rendez-vous
//! directory.

pub mod config;
pub mod error;
pub mod node;
pub mod sync;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{MineOutcome, Node};
pub use sync::SyncManager;
