//! sotto-core — protocol data model for the sotto whisper ledger.
//!
//! Transactions, blocks, the chain, the mempool, and the canonical
//! serialization every hash in the protocol is computed over. Network and
//! crypto concerns live in `sotto-p2p` and `sotto-crypto`; everything in this
//! crate is plain data plus invariant-preserving mutation.

pub mod block;
pub mod canonical;
pub mod chain;
pub mod constants;
pub mod error;
pub mod mempool;
pub mod transaction;
pub mod types;

pub use block::{hash_meets_difficulty, Block};
pub use chain::Blockchain;
pub use error::SottoError;
pub use mempool::Mempool;
pub use transaction::Transaction;
pub use types::{Address, Amount, Signature, SignerPublicKey, Timestamp};
