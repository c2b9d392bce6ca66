use sotto_core::block::{hash_meets_difficulty, Block};
use sotto_core::chain::block_spends_feasible;
use sotto_core::constants::MINING_REWARD;
use sotto_core::error::SottoError;
use sotto_core::transaction::Transaction;
use sotto_crypto::{address_from_public_key, verify_signature};

/// Validate a transaction in isolation.
///
/// A coinbase (no sender) must carry exactly the mining reward. Anything
/// else must carry a signer key whose derived address matches the sender and
/// a signature verifying over the transaction hash. Balance feasibility is a
/// chain-level question and is checked where the chain is available.
pub fn validate_transaction(tx: &Transaction) -> Result<(), SottoError> {
    let Some(sender) = tx.sender.as_ref() else {
        if tx.amount != MINING_REWARD {
            return Err(SottoError::InvalidCoinbase);
        }
        return Ok(());
    };
    let Some(public_key) = tx.signer_public_key.as_ref() else {
        return Err(SottoError::MissingSignature);
    };
    let Some(signature) = tx.signature.as_ref() else {
        return Err(SottoError::MissingSignature);
    };
    if address_from_public_key(public_key) != *sender {
        return Err(SottoError::AddressMismatch);
    }
    if !verify_signature(public_key, tx.hash().as_bytes(), signature) {
        return Err(SottoError::BadSignature);
    }
    Ok(())
}

/// Validate `block` as the successor of `prev` at the given difficulty:
/// stored-hash integrity, proof-of-work, linkage, strictly increasing
/// timestamp, and every transaction valid in isolation.
pub fn validate_block(block: &Block, prev: &Block, difficulty: u32) -> Result<(), SottoError> {
    if block.hash != block.compute_hash() {
        return Err(SottoError::HashMismatch { index: block.index });
    }
    if !hash_meets_difficulty(&block.hash, difficulty) {
        return Err(SottoError::DifficultyNotMet {
            index: block.index,
            difficulty,
        });
    }
    if block.previous_hash != prev.hash || block.index != prev.index + 1 {
        return Err(SottoError::BrokenLinkage { index: block.index });
    }
    if block.timestamp <= prev.timestamp {
        return Err(SottoError::NonMonotonicTimestamp { index: block.index });
    }
    for tx in &block.transactions {
        validate_transaction(tx)?;
    }
    Ok(())
}

/// Validate an entire chain from genesis forward: the fixed genesis shape,
/// then per-block validation plus the incremental balance non-negativity
/// fold. This is what a received chain must pass before it can replace the
/// local one.
pub fn validate_chain(blocks: &[Block], difficulty: u32) -> Result<(), SottoError> {
    let Some(first) = blocks.first() else {
        return Err(SottoError::BadGenesis);
    };
    if *first != Block::genesis() {
        return Err(SottoError::BadGenesis);
    }
    for i in 1..blocks.len() {
        validate_block(&blocks[i], &blocks[i - 1], difficulty)?;
        if !block_spends_feasible(&blocks[..i], &blocks[i]) {
            return Err(SottoError::Overdraw {
                index: blocks[i].index,
            });
        }
    }
    Ok(())
}
