use std::collections::HashSet;

use crate::chain::Blockchain;
use crate::transaction::Transaction;

/// Pending transactions awaiting inclusion: hash-deduplicated, insertion
/// order preserved. The miner takes transactions in arrival order, so
/// conflicting spends resolve first-wins at block assembly.
///
/// Validity and balance feasibility are checked by the caller before
/// insertion; the pool itself only guards uniqueness.
#[derive(Debug, Default)]
pub struct Mempool {
    order: Vec<Transaction>,
    seen: HashSet<String>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless a transaction with the same hash is already pending.
    /// Returns whether the transaction was added.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if !self.seen.insert(tx.hash()) {
            return false;
        }
        self.order.push(tx);
        true
    }

    pub fn contains(&self, tx_hash: &str) -> bool {
        self.seen.contains(tx_hash)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pending transactions in arrival order.
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.order.clone()
    }

    /// Drop every entry that is now committed somewhere in `chain`. Keeps the
    /// invariant that no pending transaction is also in a committed block.
    pub fn purge_committed(&mut self, chain: &Blockchain) {
        self.order.retain(|tx| {
            let hash = tx.hash();
            if chain.contains_transaction(&hash) {
                self.seen.remove(&hash);
                false
            } else {
                true
            }
        });
    }
}
