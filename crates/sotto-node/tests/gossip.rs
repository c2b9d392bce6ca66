//! Multi-node integration tests over loopback TCP.
//!
//! Each test builds real nodes on ephemeral ports with UDP discovery off,
//! drives them through the public command surface, and polls with a deadline
//! for convergence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use sotto_consensus::validate_chain;
use sotto_core::types::Address;
use sotto_core::Transaction;
use sotto_node::{MineOutcome, Node, NodeConfig};

async fn start_node(difficulty: u32, max_connections: usize, sync_interval: Duration) -> Arc<Node> {
    let config = NodeConfig {
        host: "127.0.0.1".into(),
        port: 0,
        max_connections,
        difficulty,
        enable_discovery: false,
        sync_interval,
        ..Default::default()
    };
    Node::start(config).await.expect("node starts on loopback")
}

/// Quiet sync loop: these tests drive gossip explicitly.
const NO_SYNC: Duration = Duration::from_secs(3600);

async fn wait_until(what: &str, timeout: Duration, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Scenario: mine one block ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn mine_one_block_pays_the_recipient() {
    let node = start_node(2, 5, NO_SYNC).await;
    let recipient = Address::from_bytes([0x52; 16]);

    node.submit_transaction(Transaction::coinbase(recipient))
        .await
        .expect("coinbase admits to the mempool");
    assert_eq!(node.mempool_len(), 1);

    let MineOutcome::Mined(block) = node.mine().await.expect("mining succeeds") else {
        panic!("mining was cancelled");
    };
    assert!(block.hash.starts_with("00"));
    assert_eq!(node.chain_len(), 2);
    assert_eq!(node.mempool_len(), 0, "mined transactions leave the pool");

    let blocks = node.chain_blocks();
    validate_chain(&blocks, 2).expect("mined chain validates");

    // The injected coinbase paid R; our own coinbase paid the miner.
    let chain = sotto_core::Blockchain::from_blocks(blocks, 2);
    assert_eq!(chain.balance_of(&recipient), 1);
    assert_eq!(node.balance(), 1);
}

// ── Scenario: gossip transitivity A–B–C ──────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn block_gossip_reaches_the_far_node() {
    let a = start_node(1, 5, NO_SYNC).await;
    let b = start_node(1, 5, NO_SYNC).await;
    let c = start_node(1, 5, NO_SYNC).await;

    // Topology A–B–C: no direct A–C link.
    b.connect("127.0.0.1", a.listen_port()).await.unwrap();
    c.connect("127.0.0.1", b.listen_port()).await.unwrap();

    let MineOutcome::Mined(block) = a.mine().await.unwrap() else {
        panic!("mining was cancelled");
    };

    let a_clone = Arc::clone(&a);
    let c_clone = Arc::clone(&c);
    wait_until("C to adopt A's tip", Duration::from_secs(10), move || {
        c_clone.tip_hash() == a_clone.tip_hash()
    })
    .await;
    assert_eq!(c.chain_len(), 2);
    assert_eq!(c.tip_hash(), block.hash);
    // The middle hop accepted it too (it forwarded only what it applied).
    assert_eq!(b.tip_hash(), block.hash);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_gossip_and_inclusion() {
    let a = start_node(1, 5, NO_SYNC).await;
    let b = start_node(1, 5, NO_SYNC).await;
    b.connect("127.0.0.1", a.listen_port()).await.unwrap();

    // A whispers to some address; B should hear about it.
    let recipient = Address::from_bytes([0x77; 16]);
    let tx_hash = a
        .send_message(recipient, "the owl flies at dusk")
        .await
        .unwrap();
    let b_clone = Arc::clone(&b);
    wait_until("B to pool the transaction", Duration::from_secs(10), move || {
        b_clone.mempool_len() == 1
    })
    .await;

    // B mines it; A learns the block and purges its own pool.
    let MineOutcome::Mined(block) = b.mine().await.unwrap() else {
        panic!("mining was cancelled");
    };
    assert!(block.transactions.iter().any(|tx| tx.hash() == tx_hash));

    let a_clone = Arc::clone(&a);
    wait_until("A to adopt B's block", Duration::from_secs(10), move || {
        a_clone.chain_len() == 2 && a_clone.mempool_len() == 0
    })
    .await;
    assert_eq!(a.tip_hash(), b.tip_hash());
}

// ── Scenario: longest chain wins over the wire ───────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn periodic_sync_adopts_the_longer_chain() {
    let a = start_node(1, 5, NO_SYNC).await;
    let b = start_node(1, 5, Duration::from_millis(200)).await;

    // A builds a lead before B ever hears of it.
    for _ in 0..2 {
        let MineOutcome::Mined(_) = a.mine().await.unwrap() else {
            panic!("mining was cancelled");
        };
    }
    assert_eq!(a.chain_len(), 3);
    assert_eq!(b.chain_len(), 1);

    // Knowing the peer is enough: B's sync loop dials and requests.
    b.add_peer(sotto_p2p::PeerAddr::new("127.0.0.1", a.listen_port()));

    let a_clone = Arc::clone(&a);
    let b_clone = Arc::clone(&b);
    wait_until("B to adopt A's chain", Duration::from_secs(10), move || {
        b_clone.chain_len() == 3 && b_clone.tip_hash() == a_clone.tip_hash()
    })
    .await;

    // The shorter side never wins: A keeps its chain afterwards.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(a.chain_len(), 3);
}

// ── Scenario: connection cap ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn connection_cap_refuses_the_third_peer() {
    let a = start_node(1, 2, NO_SYNC).await;
    let b = start_node(1, 5, NO_SYNC).await;
    let c = start_node(1, 5, NO_SYNC).await;
    let d = start_node(1, 5, NO_SYNC).await;

    b.connect("127.0.0.1", a.listen_port()).await.unwrap();
    c.connect("127.0.0.1", a.listen_port()).await.unwrap();
    let a_clone = Arc::clone(&a);
    wait_until("A to hold two sessions", Duration::from_secs(5), move || {
        a_clone.connection_count() == 2
    })
    .await;

    // The third dial either errors outright or is closed immediately by A.
    let attempt = d.connect("127.0.0.1", a.listen_port()).await;
    let d_clone = Arc::clone(&d);
    wait_until("D's session to die", Duration::from_secs(5), move || {
        d_clone.connection_count() == 0
    })
    .await;
    drop(attempt);

    // The two earlier sessions are unaffected.
    assert_eq!(a.connection_count(), 2);
    assert_eq!(b.connection_count(), 1);
    assert_eq!(c.connection_count(), 1);
}

// ── Self-dial guard ──────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn connecting_to_self_is_refused() {
    let a = start_node(1, 5, NO_SYNC).await;
    let port = a.listen_port();
    assert!(a.connect("127.0.0.1", port).await.is_err());
    assert_eq!(a.connection_count(), 0);
}
