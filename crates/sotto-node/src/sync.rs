use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use sotto_consensus::{validate_block, validate_chain, validate_transaction};
use sotto_core::{Block, SottoError, Transaction};
use sotto_p2p::socket::Connection;
use sotto_p2p::{directory, FrameHandler, P2pError, WireMessage};

use crate::error::NodeError;
use crate::node::Node;

/// Keeps the local chain converged with the peers: validates and applies
/// everything the socket hands it, forwards what it accepts, and
/// periodically pulls chains from the peer set.
///
/// Holds nothing of its own beyond the reference back to the node — the
/// chain and mempool live under the node lock.
pub struct SyncManager {
    node: Arc<Node>,
}

#[async_trait]
impl FrameHandler for SyncManager {
    async fn on_frame(&self, conn: &Arc<Connection>, msg: WireMessage) {
        match msg {
            WireMessage::NewBlock(block) => {
                if let Err(e) = self.handle_new_block(block, Some(conn.id())).await {
                    // Protocol violation: frame dropped, peer kept.
                    warn!(conn = conn.id(), error = %e, "gossiped block rejected");
                }
            }
            WireMessage::NewTransaction(tx) => {
                if let Err(e) = self.handle_new_transaction(tx, Some(conn.id())).await {
                    warn!(conn = conn.id(), error = %e, "gossiped transaction rejected");
                }
            }
            WireMessage::RequestChain => self.handle_request_chain(conn).await,
            WireMessage::RequestChainLength => self.handle_request_chain_length(conn).await,
            WireMessage::Blockchain(blocks) => match self.merge_chain(blocks) {
                Ok(()) => {}
                Err(SottoError::ChainNotLonger) => {
                    debug!(conn = conn.id(), "received chain is not longer; kept ours")
                }
                Err(e) => warn!(conn = conn.id(), error = %e, "received chain rejected"),
            },
            WireMessage::IncomePort(port) => self.node.handle_income_port(conn, port),
            WireMessage::RequestPublicKey => self.node.handle_request_public_key(conn).await,
            WireMessage::Raw(bytes) => self.node.handle_raw(conn, bytes).await,
        }
    }
}

impl SyncManager {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    // ── Inbound ──────────────────────────────────────────────────────────────

    /// A gossiped block: drop silently when already known (gossip echoes are
    /// normal), validate against the tip, append, then forward to everyone
    /// but the source. Forwarding happens only after the append — peers
    /// never see a block from us that we have not accepted.
    pub async fn handle_new_block(
        &self,
        block: Block,
        from: Option<u64>,
    ) -> Result<(), SottoError> {
        {
            let mut shared = self.node.lock_shared();
            let shared = &mut *shared;
            if shared.chain.contains(&block.hash) {
                debug!(index = block.index, "duplicate block dropped");
                return Ok(());
            }
            validate_block(&block, shared.chain.tip(), shared.chain.difficulty())?;
            shared.chain.append(block.clone())?;
            shared.mempool.purge_committed(&shared.chain);
        }
        // Whatever the miner was extending, this supersedes it.
        self.node.cancel_mining();
        info!(index = block.index, hash = %block.hash, "accepted block from network");
        self.broadcast_block(&block, from).await;
        Ok(())
    }

    /// A gossiped transaction: deduplicate by hash against both the pool and
    /// the committed chain, validate in isolation, check the sender can
    /// afford it on the committed chain, admit, forward.
    pub async fn handle_new_transaction(
        &self,
        tx: Transaction,
        from: Option<u64>,
    ) -> Result<(), SottoError> {
        let hash = tx.hash();
        {
            let mut shared = self.node.lock_shared();
            if shared.mempool.contains(&hash) || shared.chain.contains_transaction(&hash) {
                debug!(tx = %hash, "duplicate transaction dropped");
                return Ok(());
            }
            validate_transaction(&tx)?;
            if let Some(sender) = tx.sender {
                let have = shared.chain.balance_of(&sender);
                if have < tx.amount {
                    return Err(SottoError::InsufficientBalance {
                        need: tx.amount,
                        have,
                    });
                }
            }
            shared.mempool.insert(tx.clone());
        }
        info!(tx = %hash, "transaction admitted to mempool");
        self.broadcast_transaction(&tx, from).await;
        Ok(())
    }

    /// `REQUEST_CHAIN`: answer with the full serialized chain.
    pub async fn handle_request_chain(&self, conn: &Arc<Connection>) {
        let blocks = self.node.lock_shared().chain.blocks().to_vec();
        if let Err(e) = conn.send(&WireMessage::Blockchain(blocks)).await {
            warn!(conn = conn.id(), error = %e, "chain reply failed");
        }
    }

    /// `REQUEST_CHAIN_LENGTH`: answer with the length as decimal ASCII.
    pub async fn handle_request_chain_length(&self, conn: &Arc<Connection>) {
        let len = self.node.lock_shared().chain.len();
        let reply = WireMessage::Raw(len.to_string().into_bytes());
        if let Err(e) = conn.send(&reply).await {
            warn!(conn = conn.id(), error = %e, "chain length reply failed");
        }
    }

    /// Longest-valid-chain rule. The received chain is validated in full —
    /// outside the node lock, it is pure CPU over foreign data — and adopted
    /// only if still strictly longer at swap time. Mempool entries the new
    /// chain already includes are purged, and any in-flight mining attempt
    /// is now stale.
    pub fn merge_chain(&self, blocks: Vec<Block>) -> Result<(), SottoError> {
        let difficulty = {
            let shared = self.node.lock_shared();
            if blocks.len() <= shared.chain.len() {
                return Err(SottoError::ChainNotLonger);
            }
            shared.chain.difficulty()
        };

        validate_chain(&blocks, difficulty)?;

        {
            let mut shared = self.node.lock_shared();
            let shared = &mut *shared;
            // Re-check: the local chain may have grown during validation.
            if blocks.len() <= shared.chain.len() {
                return Err(SottoError::ChainNotLonger);
            }
            let new_len = blocks.len();
            shared.chain.replace(blocks);
            shared.mempool.purge_committed(&shared.chain);
            info!(length = new_len, "adopted longer chain");
        }
        self.node.cancel_mining();
        Ok(())
    }

    // ── Outbound ─────────────────────────────────────────────────────────────

    pub async fn broadcast_block(&self, block: &Block, except: Option<u64>) {
        self.node
            .socket()
            .broadcast(&WireMessage::NewBlock(block.clone()), except)
            .await;
    }

    pub async fn broadcast_transaction(&self, tx: &Transaction, except: Option<u64>) {
        self.node
            .socket()
            .broadcast(&WireMessage::NewTransaction(tx.clone()), except)
            .await;
    }

    /// One periodic pass over the peer set: request the chain over live
    /// connections, dial the rest, and report dead listings to the
    /// directory.
    async fn sync_round(&self) {
        for peer in self.node.peers() {
            if let Some(conn) = self.node.socket().connection_to(&peer) {
                if let Err(e) = conn.send(&WireMessage::RequestChain).await {
                    warn!(peer = %peer, error = %e, "chain request failed");
                }
                continue;
            }
            match self.node.establish(&peer).await {
                Ok(conn) => {
                    if let Err(e) = conn.send(&WireMessage::RequestChain).await {
                        warn!(peer = %peer, error = %e, "chain request failed");
                    }
                }
                Err(NodeError::Transport(P2pError::AlreadyConnected(_))) => {}
                Err(NodeError::Transport(P2pError::ConnectionLimit(_))) => {
                    debug!(peer = %peer, "connection cap reached; dial skipped");
                }
                Err(e) => {
                    warn!(peer = %peer, error = %e, "dial failed");
                    if let Some(dir) = self.node.directory() {
                        if let Err(e) = directory::report_invalid(dir, &peer).await {
                            debug!(error = %e, "could not report invalid peer");
                        }
                    }
                }
            }
        }
    }

    /// The periodic sync task. Exits on shutdown.
    pub(crate) async fn sync_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.node.sync_interval();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            self.sync_round().await;
        }
        debug!("sync loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use sotto_core::block::hash_meets_difficulty;
    use sotto_core::types::Address;
    use sotto_crypto::KeyPair;

    use crate::config::NodeConfig;

    async fn quiet_node(difficulty: u32) -> Arc<Node> {
        let config = NodeConfig {
            host: "127.0.0.1".into(),
            port: 0,
            difficulty,
            enable_discovery: false,
            sync_interval: Duration::from_secs(3600),
            ..Default::default()
        };
        Node::start(config).await.unwrap()
    }

    fn mined(prev: &Block, txs: Vec<Transaction>, difficulty: u32) -> Block {
        let mut block = Block::new(prev.index + 1, prev.hash.clone(), prev.timestamp + 1, txs);
        while !hash_meets_difficulty(&block.hash, difficulty) {
            block.nonce += 1;
            block.hash = block.compute_hash();
        }
        block
    }

    fn extend(blocks: &mut Vec<Block>, count: usize, difficulty: u32) {
        for _ in 0..count {
            let prev = blocks.last().expect("chain never empty").clone();
            blocks.push(mined(
                &prev,
                vec![Transaction::coinbase(Address::from_bytes([5; 16]))],
                difficulty,
            ));
        }
    }

    #[tokio::test]
    async fn longer_valid_chain_replaces_the_local_one() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();

        let mut longer = vec![Block::genesis()];
        extend(&mut longer, 4, 1);
        sync.merge_chain(longer.clone()).unwrap();
        assert_eq!(node.chain_len(), 5);
        assert_eq!(node.tip_hash(), longer.last().unwrap().hash);

        // A shorter frame arriving later must not roll us back.
        let mut shorter = vec![Block::genesis()];
        extend(&mut shorter, 2, 1);
        assert!(matches!(
            sync.merge_chain(shorter),
            Err(SottoError::ChainNotLonger)
        ));
        assert_eq!(node.chain_len(), 5);
    }

    #[tokio::test]
    async fn equal_length_chain_is_not_adopted() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let mut local = vec![Block::genesis()];
        extend(&mut local, 2, 1);
        sync.merge_chain(local).unwrap();

        let mut rival = vec![Block::genesis()];
        extend(&mut rival, 2, 1);
        let before = node.tip_hash();
        assert!(sync.merge_chain(rival).is_err());
        assert_eq!(node.tip_hash(), before);
    }

    #[tokio::test]
    async fn invalid_received_chain_is_rejected() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();

        let mut forged = vec![Block::genesis()];
        extend(&mut forged, 3, 1);
        // Inflate a committed balance after mining: hashes no longer match.
        forged[2].transactions[0].amount = 1;
        forged[2].transactions[0].recipient = Address::from_bytes([6; 16]);
        assert!(sync.merge_chain(forged).is_err());
        assert_eq!(node.chain_len(), 1);
    }

    #[tokio::test]
    async fn handle_new_block_is_idempotent() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let genesis = node.chain_blocks()[0].clone();
        let block = mined(&genesis, vec![Transaction::coinbase(Address::from_bytes([7; 16]))], 1);

        sync.handle_new_block(block.clone(), None).await.unwrap();
        assert_eq!(node.chain_len(), 2);
        sync.handle_new_block(block, None).await.unwrap();
        assert_eq!(node.chain_len(), 2);
    }

    #[tokio::test]
    async fn handle_new_block_rejects_a_non_linking_block() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let genesis = node.chain_blocks()[0].clone();
        let mut block = mined(&genesis, Vec::new(), 1);
        block.previous_hash = "feed".into();
        block.hash = block.compute_hash();
        assert!(sync.handle_new_block(block, None).await.is_err());
        assert_eq!(node.chain_len(), 1);
    }

    #[tokio::test]
    async fn handle_new_transaction_is_idempotent() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let kp = KeyPair::generate();
        let tx = kp.build_transaction(Address::from_bytes([8; 16]), 0, "hi".into());

        sync.handle_new_transaction(tx.clone(), None).await.unwrap();
        assert_eq!(node.mempool_len(), 1);
        sync.handle_new_transaction(tx, None).await.unwrap();
        assert_eq!(node.mempool_len(), 1);
    }

    #[tokio::test]
    async fn tampered_signature_leaves_the_mempool_unchanged() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let kp = KeyPair::generate();
        let mut tx = kp.build_transaction(Address::from_bytes([8; 16]), 0, "hi".into());
        if let Some(sig) = tx.signature.as_mut() {
            sig.0[0] ^= 1;
        }
        assert!(matches!(
            sync.handle_new_transaction(tx, None).await,
            Err(SottoError::BadSignature)
        ));
        assert_eq!(node.mempool_len(), 0);
    }

    #[tokio::test]
    async fn unfunded_spend_is_refused() {
        let node = quiet_node(1).await;
        let sync = node.sync_manager();
        let kp = KeyPair::generate();
        let tx = kp.build_transaction(Address::from_bytes([8; 16]), 5, String::new());
        assert!(matches!(
            sync.handle_new_transaction(tx, None).await,
            Err(SottoError::InsufficientBalance { need: 5, .. })
        ));
        assert_eq!(node.mempool_len(), 0);
    }
}
