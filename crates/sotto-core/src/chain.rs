use std::collections::HashMap;
use std::fmt;

use crate::block::{hash_meets_difficulty, Block};
use crate::constants::MINING_REWARD;
use crate::error::SottoError;
use crate::types::{Address, Amount};

/// Walk `block`'s transactions in order against balances accumulated over
/// `prior`, refusing any spend that would drive a sender negative. Credits
/// earlier in the same block fund later debits (first-wins ordering).
pub fn block_spends_feasible(prior: &[Block], block: &Block) -> bool {
    let mut balances: HashMap<Address, i128> = HashMap::new();
    for b in prior {
        for tx in &b.transactions {
            if let Some(sender) = tx.sender {
                *balances.entry(sender).or_default() -= tx.amount as i128;
            }
            *balances.entry(tx.recipient).or_default() += tx.amount as i128;
        }
    }
    for tx in &block.transactions {
        if let Some(sender) = tx.sender {
            let entry = balances.entry(sender).or_default();
            *entry -= tx.amount as i128;
            if *entry < 0 {
                return false;
            }
        }
        *balances.entry(tx.recipient).or_default() += tx.amount as i128;
    }
    true
}

/// The local chain: an ordered run of blocks rooted at the fixed genesis,
/// plus the difficulty parameter the tip must satisfy. Difficulty is a chain
/// property, not a block field.
#[derive(Clone, Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    difficulty: u32,
}

impl Blockchain {
    pub fn new(difficulty: u32) -> Self {
        Self {
            blocks: vec![Block::genesis()],
            difficulty,
        }
    }

    /// Wrap already-validated blocks (e.g. a merged remote chain).
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Self {
        Self { blocks, difficulty }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn set_difficulty(&mut self, difficulty: u32) {
        self.difficulty = difficulty;
    }

    pub fn tip(&self) -> &Block {
        // Invariant: the genesis block is never removed.
        self.blocks.last().expect("chain always holds genesis")
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        // A chain always carries at least the genesis block.
        false
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn contains(&self, block_hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == block_hash)
    }

    pub fn contains_transaction(&self, tx_hash: &str) -> bool {
        self.blocks
            .iter()
            .flat_map(|b| &b.transactions)
            .any(|tx| tx.hash() == tx_hash)
    }

    /// Append after asserting structural validity against the current tip:
    /// linkage, index, stored-hash integrity, difficulty, strictly increasing
    /// timestamp, coinbase amounts, and balance feasibility. Signature
    /// validity is the validator's concern and must be checked by the caller
    /// before appending.
    pub fn append(&mut self, block: Block) -> Result<(), SottoError> {
        let tip = self.tip();
        if block.previous_hash != tip.hash || block.index != tip.index + 1 {
            return Err(SottoError::BrokenLinkage { index: block.index });
        }
        if block.timestamp <= tip.timestamp {
            return Err(SottoError::NonMonotonicTimestamp { index: block.index });
        }
        if block.hash != block.compute_hash() {
            return Err(SottoError::HashMismatch { index: block.index });
        }
        if !hash_meets_difficulty(&block.hash, self.difficulty) {
            return Err(SottoError::DifficultyNotMet {
                index: block.index,
                difficulty: self.difficulty,
            });
        }
        if block
            .transactions
            .iter()
            .any(|tx| tx.is_coinbase() && tx.amount != MINING_REWARD)
        {
            return Err(SottoError::InvalidCoinbase);
        }
        if !block_spends_feasible(&self.blocks, &block) {
            return Err(SottoError::Overdraw { index: block.index });
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Swap in a replacement chain. The caller has already validated it and
    /// checked it is strictly longer.
    pub fn replace(&mut self, blocks: Vec<Block>) {
        self.blocks = blocks;
    }

    /// Net balance of `addr` over the committed chain: credits received minus
    /// amounts sent. Non-negative on any valid chain.
    pub fn balance_of(&self, addr: &Address) -> Amount {
        let mut balance: i128 = 0;
        for block in &self.blocks {
            for tx in &block.transactions {
                if tx.sender.as_ref() == Some(addr) {
                    balance -= tx.amount as i128;
                }
                if tx.recipient == *addr {
                    balance += tx.amount as i128;
                }
            }
        }
        balance.max(0) as Amount
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for block in &self.blocks {
            let short = if block.hash.len() > 12 {
                &block.hash[..12]
            } else {
                &block.hash
            };
            writeln!(
                f,
                "#{:<4} {}…  txs={:<3} nonce={}",
                block.index,
                short,
                block.transactions.len(),
                block.nonce
            )?;
        }
        write!(f, "length {} difficulty {}", self.len(), self.difficulty)
    }
}
