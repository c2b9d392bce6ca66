//! sotto-crypto — concrete primitives behind the protocol's crypto contracts.
//!
//! The core treats these as opaque collaborators: a signer (Dilithium2), a
//! key-agreement party (X25519 + HKDF-SHA256), a symmetric cipher
//! (ChaCha20-Poly1305 with a random 96-bit nonce), SHA-256 hashing with the
//! address rule, and the proof-of-work search.

pub mod cipher;
pub mod dilithium;
pub mod exchange;
pub mod hash;
pub mod keypair;
pub mod pem;
pub mod pow;

pub use cipher::MessageCipher;
pub use dilithium::verify_signature;
pub use exchange::ExchangeKeyPair;
pub use hash::{address_from_public_key, sha256, sha256_hex};
pub use keypair::KeyPair;
pub use pow::mine_block;
