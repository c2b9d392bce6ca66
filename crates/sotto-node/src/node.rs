use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use sotto_consensus::{validate_block, DifficultyPolicy};
use sotto_core::types::{Address, Amount, SignerPublicKey};
use sotto_core::{Block, Blockchain, Mempool, SottoError, Transaction};
use sotto_crypto::{address_from_public_key, mine_block, ExchangeKeyPair, KeyPair, MessageCipher};
use sotto_p2p::socket::Connection;
use sotto_p2p::{discovery, PeerAddr, PeerSocket, WireMessage};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::sync::SyncManager;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What a `mine` command produced.
#[derive(Debug)]
pub enum MineOutcome {
    Mined(Block),
    /// The search was cancelled — shutdown, or a network block superseded
    /// the tip this attempt was building on.
    Cancelled,
}

/// Membership state under the node lock. Every operation holding this is
/// short and free of I/O; network writes happen on snapshots taken after the
/// guard is dropped.
pub(crate) struct NodeShared {
    pub(crate) chain: Blockchain,
    pub(crate) mempool: Mempool,
    pub(crate) peers: HashSet<PeerAddr>,
    /// Signing keys learned over `REQUEST_PUBLIC_KEY`, keyed by the ledger
    /// address they derive to.
    pub(crate) peer_keys: HashMap<Address, Vec<u8>>,
}

/// The node façade: owns the chain, mempool, peer set and socket, and
/// exposes the command surface (`connect`, `message`, `send`, `mine`,
/// `balance`, `peers`, `chain`, shutdown).
pub struct Node {
    config: NodeConfig,
    keys: KeyPair,
    exchange: ExchangeKeyPair,
    policy: DifficultyPolicy,
    shared: Mutex<NodeShared>,
    socket: Arc<PeerSocket>,
    sync: OnceLock<Arc<SyncManager>>,
    miner_cancel: Mutex<Option<Arc<AtomicBool>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    /// Bind the listener, wire the sync manager, and start the long-lived
    /// tasks (accept loop, sync loop, discovery when enabled). A bind
    /// failure propagates — the caller exits non-zero on it.
    pub async fn start(config: NodeConfig) -> Result<Arc<Self>, NodeError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let socket = PeerSocket::bind(config.p2p(), shutdown_rx.clone()).await?;

        let keys = KeyPair::generate();
        info!(address = %keys.address, "node identity generated");

        let node = Arc::new(Self {
            shared: Mutex::new(NodeShared {
                chain: Blockchain::new(config.difficulty),
                mempool: Mempool::new(),
                peers: HashSet::new(),
                peer_keys: HashMap::new(),
            }),
            keys,
            exchange: ExchangeKeyPair::generate(),
            policy: DifficultyPolicy::default(),
            socket: Arc::clone(&socket),
            sync: OnceLock::new(),
            miner_cancel: Mutex::new(None),
            shutdown_tx,
            config,
        });

        let sync = Arc::new(SyncManager::new(Arc::clone(&node)));
        let _ = node.sync.set(Arc::clone(&sync));
        socket.set_handler(Arc::downgrade(
            &(Arc::clone(&sync) as Arc<dyn sotto_p2p::FrameHandler>),
        ));

        tokio::spawn(Arc::clone(&sync).sync_loop(shutdown_rx.clone()));

        if node.config.enable_discovery {
            node.spawn_discovery(shutdown_rx);
        }
        if node.config.directory.is_some() {
            node.spawn_directory_bootstrap();
        }

        Ok(node)
    }

    /// Fetch the directory's peer list and register our port. Best-effort:
    /// an unreachable directory leaves the node running with whatever peers
    /// it already knows.
    fn spawn_directory_bootstrap(self: &Arc<Self>) {
        let Some(dir) = self.config.directory.clone() else {
            return;
        };
        let port = self.socket.local_port();
        let weak: Weak<Node> = Arc::downgrade(self);
        tokio::spawn(async move {
            match sotto_p2p::directory::fetch_peers(&dir).await {
                Ok(peers) => {
                    info!(count = peers.len(), "directory peer list received");
                    if let Some(node) = weak.upgrade() {
                        for peer in peers {
                            node.add_peer(peer);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "directory unreachable; continuing without it"),
            }
            if let Err(e) = sotto_p2p::directory::register(&dir, port).await {
                warn!(error = %e, "directory registration failed");
            }
        });
    }

    fn spawn_discovery(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        let discovery_config = discovery::DiscoveryConfig {
            host: self.config.host.clone(),
            port: self.socket.local_port(),
            broadcast_port: self.config.broadcast_port,
            interval: self.config.broadcast_interval,
        };
        tokio::spawn(discovery::announce_loop(
            discovery_config.clone(),
            shutdown.clone(),
        ));

        let (found_tx, mut found_rx) = mpsc::channel::<PeerAddr>(64);
        tokio::spawn(discovery::listen_loop(discovery_config, found_tx, shutdown));

        // Feed discovered peers into the peer set for as long as the node
        // lives; a Weak keeps this task from pinning it.
        let weak: Weak<Node> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(peer) = found_rx.recv().await {
                let Some(node) = weak.upgrade() else { break };
                node.add_peer(peer);
            }
        });
    }

    pub(crate) fn lock_shared(&self) -> MutexGuard<'_, NodeShared> {
        locked(&self.shared)
    }

    pub(crate) fn socket(&self) -> &Arc<PeerSocket> {
        &self.socket
    }

    pub(crate) fn sync_manager(&self) -> &Arc<SyncManager> {
        self.sync.get().expect("sync manager is wired in start()")
    }

    pub(crate) fn directory(&self) -> Option<&str> {
        self.config.directory.as_deref()
    }

    pub(crate) fn sync_interval(&self) -> std::time::Duration {
        self.config.sync_interval
    }

    // ── Identity & introspection ─────────────────────────────────────────────

    pub fn address(&self) -> Address {
        self.keys.address
    }

    pub fn listen_port(&self) -> u16 {
        self.socket.local_port()
    }

    pub fn balance(&self) -> Amount {
        let shared = self.lock_shared();
        shared.chain.balance_of(&self.keys.address)
    }

    pub fn peers(&self) -> Vec<PeerAddr> {
        let mut peers: Vec<PeerAddr> = self.lock_shared().peers.iter().cloned().collect();
        peers.sort_by(|a, b| (&a.host, a.port).cmp(&(&b.host, b.port)));
        peers
    }

    pub fn chain_len(&self) -> usize {
        self.lock_shared().chain.len()
    }

    pub fn tip_hash(&self) -> String {
        self.lock_shared().chain.tip().hash.clone()
    }

    pub fn chain_display(&self) -> String {
        self.lock_shared().chain.to_string()
    }

    pub fn chain_blocks(&self) -> Vec<Block> {
        self.lock_shared().chain.blocks().to_vec()
    }

    pub fn mempool_len(&self) -> usize {
        self.lock_shared().mempool.len()
    }

    pub fn connection_count(&self) -> usize {
        self.socket.connection_count()
    }

    // ── Peer membership ──────────────────────────────────────────────────────

    fn is_self(&self, peer: &PeerAddr) -> bool {
        peer.port == self.socket.local_port()
            && (peer.host == self.config.host
                || peer.host == "127.0.0.1"
                || peer.host == "localhost")
    }

    /// Record a peer address. Duplicates and our own address are ignored.
    pub fn add_peer(&self, peer: PeerAddr) -> bool {
        if self.is_self(&peer) {
            return false;
        }
        let inserted = self.lock_shared().peers.insert(peer.clone());
        if inserted {
            info!(peer = %peer, "peer added");
        }
        inserted
    }

    /// Dial and announce our listening port so the peer can gossip back.
    pub(crate) async fn establish(&self, peer: &PeerAddr) -> Result<Arc<Connection>, NodeError> {
        let conn = self.socket.connect(peer).await?;
        conn.send(&WireMessage::IncomePort(self.socket.local_port()))
            .await?;
        Ok(conn)
    }

    /// The `connect` command: dial, register, and kick off the auxiliary
    /// public-key exchange.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), NodeError> {
        let peer = PeerAddr::new(host, port);
        if self.is_self(&peer) {
            return Err(NodeError::SelfDial);
        }
        let conn = self.establish(&peer).await?;
        self.add_peer(peer);
        conn.expect_public_key();
        if let Err(e) = conn.send(&WireMessage::RequestPublicKey).await {
            warn!(error = %e, "public key request failed");
        }
        Ok(())
    }

    // ── Inbound dispatch targets (called by the sync manager) ────────────────

    pub(crate) fn handle_income_port(&self, conn: &Arc<Connection>, port: u16) {
        let addr = self.socket.register_symmetric(conn, port);
        self.add_peer(addr);
    }

    pub(crate) async fn handle_request_public_key(&self, conn: &Arc<Connection>) {
        let pem = sotto_crypto::pem::encode_public_key(&self.keys.public_key.0);
        if let Err(e) = conn.send(&WireMessage::Raw(pem.into_bytes())).await {
            warn!(conn = conn.id(), error = %e, "public key reply failed");
        }
    }

    /// Raw frames are either the reply to our `REQUEST_PUBLIC_KEY` or plain
    /// broadcast chatter to forward.
    pub(crate) async fn handle_raw(&self, conn: &Arc<Connection>, bytes: Vec<u8>) {
        if conn.take_awaiting_public_key() {
            let decoded = std::str::from_utf8(&bytes)
                .ok()
                .and_then(sotto_crypto::pem::decode_public_key);
            match decoded {
                Some(key_bytes) => {
                    let key = SignerPublicKey(key_bytes);
                    let addr = address_from_public_key(&key);
                    info!(peer_address = %addr, "learned peer signing key");
                    self.lock_shared().peer_keys.insert(addr, key.0);
                }
                None => warn!(conn = conn.id(), "unparseable public key reply dropped"),
            }
            return;
        }
        info!(
            conn = conn.id(),
            text = %String::from_utf8_lossy(&bytes),
            "raw message relayed"
        );
        self.socket
            .broadcast(&WireMessage::Raw(bytes), Some(conn.id()))
            .await;
    }

    // ── Transactions ─────────────────────────────────────────────────────────

    /// Validate, admit to the mempool, and gossip. Shared by the command
    /// surface and the tests; network arrivals take the same path through
    /// the sync manager.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<(), SottoError> {
        self.sync_manager().handle_new_transaction(tx, None).await
    }

    /// The `send` command: a signed value transfer.
    pub async fn send_amount(
        &self,
        recipient: Address,
        amount: Amount,
    ) -> Result<String, NodeError> {
        let tx = self.keys.build_transaction(recipient, amount, String::new());
        let hash = tx.hash();
        self.submit_transaction(tx).await?;
        Ok(hash)
    }

    /// The `message` command: a zero-amount transaction whose content is
    /// sealed when we hold an exchange-capable key for the recipient, and
    /// plaintext otherwise (the key-exchange channel is auxiliary and may
    /// not have produced one).
    pub async fn send_message(
        &self,
        recipient: Address,
        content: &str,
    ) -> Result<String, NodeError> {
        let sealed = {
            let shared = self.lock_shared();
            shared.peer_keys.get(&recipient).and_then(|key| {
                let key32: [u8; 32] = key.as_slice().try_into().ok()?;
                let cipher = MessageCipher::new(&self.exchange.shared_key(&key32));
                cipher.seal(content.as_bytes())
            })
        };
        let body = match sealed {
            Some(bytes) => hex::encode(bytes),
            None => {
                debug!(recipient = %recipient, "no exchange key; sending plaintext content");
                content.to_string()
            }
        };
        let tx = self.keys.build_transaction(recipient, 0, body);
        let hash = tx.hash();
        self.submit_transaction(tx).await?;
        Ok(hash)
    }

    // ── Mining ───────────────────────────────────────────────────────────────

    /// The `mine` command: assemble a block from the mempool snapshot plus
    /// our coinbase, search for a nonce off the async runtime, and if the
    /// tip is still ours, append and gossip. The local difficulty policy is
    /// applied after a successful mine.
    pub async fn mine(&self) -> Result<MineOutcome, NodeError> {
        let (mut txs, prev_hash, next_index, prev_timestamp, difficulty) = {
            let shared = self.lock_shared();
            let tip = shared.chain.tip();
            (
                select_feasible(&shared.chain, shared.mempool.snapshot()),
                tip.hash.clone(),
                tip.index + 1,
                tip.timestamp,
                shared.chain.difficulty(),
            )
        };
        txs.push(Transaction::coinbase(self.keys.address));

        // Strict monotonicity even when blocks land within one second.
        let now = chrono::Utc::now().timestamp().max(0) as u64;
        let timestamp = now.max(prev_timestamp + 1);
        let candidate = Block::new(next_index, prev_hash.clone(), timestamp, txs);

        let cancel = Arc::new(AtomicBool::new(false));
        *locked(&self.miner_cancel) = Some(Arc::clone(&cancel));
        let started = Instant::now();
        info!(index = next_index, difficulty, "mining started");

        let worker_cancel = Arc::clone(&cancel);
        let mined = tokio::task::spawn_blocking(move || {
            mine_block(candidate, difficulty, &worker_cancel)
        })
        .await;
        *locked(&self.miner_cancel) = None;

        let block = match mined {
            Ok(Some(block)) => block,
            Ok(None) => {
                info!(index = next_index, "mining cancelled");
                return Ok(MineOutcome::Cancelled);
            }
            Err(e) => {
                warn!(error = %e, "mining task failed");
                return Ok(MineOutcome::Cancelled);
            }
        };
        let elapsed = started.elapsed();

        {
            let mut shared = self.lock_shared();
            let shared = &mut *shared;
            if shared.chain.tip().hash != prev_hash {
                // A network block or merge superseded the tip mid-search.
                return Err(NodeError::Protocol(SottoError::StaleTip));
            }
            // A failed validation discards the whole attempt.
            validate_block(&block, shared.chain.tip(), difficulty)?;
            shared.chain.append(block.clone())?;
            shared.mempool.purge_committed(&shared.chain);

            let next = self.policy.adjust(difficulty, elapsed);
            if next != difficulty {
                info!(from = difficulty, to = next, "difficulty adjusted");
                shared.chain.set_difficulty(next);
            }
        }
        info!(
            index = block.index,
            hash = %block.hash,
            elapsed_ms = elapsed.as_millis() as u64,
            "block mined"
        );

        self.sync_manager().broadcast_block(&block, None).await;
        Ok(MineOutcome::Mined(block))
    }

    /// Abort an in-flight mining attempt, if any. Called on shutdown and
    /// whenever the tip the miner builds on is superseded.
    pub(crate) fn cancel_mining(&self) {
        if let Some(flag) = locked(&self.miner_cancel).as_ref() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────────

    /// Signal every long-lived task to wind down and abort the miner.
    pub fn shutdown(&self) {
        info!("node shutting down");
        self.cancel_mining();
        let _ = self.shutdown_tx.send(true);
    }
}

/// First-wins conflict resolution at block assembly: walk the mempool
/// snapshot in arrival order, dropping spends the committed balances (plus
/// earlier selected transactions) can no longer cover.
fn select_feasible(chain: &Blockchain, candidates: Vec<Transaction>) -> Vec<Transaction> {
    let mut balances: HashMap<Address, i128> = HashMap::new();
    let mut selected = Vec::new();
    for tx in candidates {
        if let Some(sender) = tx.sender {
            let funds = balances
                .entry(sender)
                .or_insert_with(|| chain.balance_of(&sender) as i128);
            if *funds < tx.amount as i128 {
                warn!(tx = %tx.hash(), "pending spend no longer feasible, skipped");
                continue;
            }
            *funds -= tx.amount as i128;
        }
        let credit = balances
            .entry(tx.recipient)
            .or_insert_with(|| chain.balance_of(&tx.recipient) as i128);
        *credit += tx.amount as i128;
        selected.push(tx);
    }
    selected
}
