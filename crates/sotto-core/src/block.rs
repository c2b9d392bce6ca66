use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::canonical;
use crate::constants::{GENESIS_PREVIOUS_HASH, GENESIS_TIMESTAMP};
use crate::error::SottoError;
use crate::transaction::Transaction;
use crate::types::Timestamp;

/// True when `hash` starts with `difficulty` leading `'0'` hex characters.
pub fn hash_meets_difficulty(hash: &str, difficulty: u32) -> bool {
    let difficulty = difficulty as usize;
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// One element of the chain. `hash` is stored alongside the fields it covers;
/// validation recomputes it from the canonical preimage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub previous_hash: String,
    pub timestamp: Timestamp,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
    pub hash: String,
}

impl Block {
    /// Build a block with nonce 0 and its hash already computed. Mining
    /// advances the nonce until the hash meets the difficulty.
    pub fn new(
        index: u64,
        previous_hash: String,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
    ) -> Self {
        let mut block = Self {
            index,
            previous_hash,
            timestamp,
            transactions,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// The fixed first block every chain starts from. Exempt from the
    /// difficulty rule.
    pub fn genesis() -> Self {
        Self::new(
            0,
            GENESIS_PREVIOUS_HASH.to_string(),
            GENESIS_TIMESTAMP,
            Vec::new(),
        )
    }

    /// SHA-256 over the canonical block preimage, lowercase hex.
    pub fn compute_hash(&self) -> String {
        let preimage = canonical::block_preimage(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.transactions,
            self.nonce,
        );
        hex::encode(Sha256::digest(preimage.as_bytes()))
    }

    /// Stored hash matches the fields and carries the required difficulty.
    pub fn is_well_formed(&self, difficulty: u32) -> bool {
        self.hash == self.compute_hash() && hash_meets_difficulty(&self.hash, difficulty)
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, SottoError> {
        serde_json::from_slice(bytes).map_err(|e| SottoError::MalformedBlock(e.to_string()))
    }
}
