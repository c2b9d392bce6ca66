//! sotto-node — the sotto full-node binary.
//!
//! Startup sequence:
//!   1. Bind the peer socket and start the accept loop
//!   2. Start the sync loop and (unless disabled) UDP discovery
//!   3. Bootstrap the peer set from the rendez-vous directory, if given
//!   4. Read commands from stdin until `exit` or EOF
//!
//! Exit codes: 0 on a normal exit, 1 when the listener cannot bind, 2 on an
//! unrecoverable I/O failure on the command stream.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use sotto_core::constants::{
    BROADCAST_PORT, DEFAULT_BROADCAST_INTERVAL_SECS, DEFAULT_DIFFICULTY, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_PORT, DEFAULT_SYNC_INTERVAL_SECS,
};
use sotto_core::types::Address;
use sotto_node::{MineOutcome, Node, NodeConfig};

#[derive(Parser, Debug)]
#[command(
    name = "sotto-node",
    version,
    about = "sotto node — a proof-of-work ledger that carries whispers"
)]
struct Args {
    /// Interface to bind and announce.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// TCP listen port for the peer protocol (0 picks an ephemeral port).
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Maximum concurrent peer connections.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: usize,

    /// Initial proof-of-work difficulty (leading zero hex chars).
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY)]
    difficulty: u32,

    /// UDP port for LAN peer discovery.
    #[arg(long, default_value_t = BROADCAST_PORT)]
    broadcast_port: u16,

    /// Seconds between presence announcements.
    #[arg(long, default_value_t = DEFAULT_BROADCAST_INTERVAL_SECS)]
    broadcast_interval: u64,

    /// Seconds between chain sync rounds.
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    sync_interval: u64,

    /// Rendez-vous directory address (host:port).
    #[arg(long)]
    directory: Option<String>,

    /// Disable UDP discovery entirely.
    #[arg(long, default_value_t = false)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sotto_node=debug,sotto_p2p=debug".parse().expect("static filter parses")),
        )
        .init();

    let args = Args::parse();
    let config = NodeConfig {
        host: args.host.clone(),
        port: args.port,
        max_connections: args.max_connections,
        difficulty: args.difficulty,
        broadcast_port: args.broadcast_port,
        broadcast_interval: Duration::from_secs(args.broadcast_interval),
        enable_discovery: !args.no_discovery,
        sync_interval: Duration::from_secs(args.sync_interval),
        directory: args.directory.clone(),
    };

    let node = Node::start(config).await.context("starting node")?;

    println!("address:   {}", node.address());
    println!("listening: {}:{}", args.host, node.listen_port());
    println!("commands:  connect | message | send | mine | balance | peers | chain | exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !dispatch(&node, line.trim()).await {
                    break;
                }
            }
            Ok(None) => break, // EOF behaves like `exit`
            Err(e) => {
                error!(error = %e, "command stream failed");
                node.shutdown();
                std::process::exit(2);
            }
        }
    }
    node.shutdown();
    Ok(())
}

/// Run one REPL command. Returns `false` when the node should exit.
async fn dispatch(node: &Arc<Node>, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return true;
    };
    match command {
        "connect" => match (words.next(), words.next().and_then(|p| p.parse().ok())) {
            (Some(host), Some(port)) => match node.connect(host, port).await {
                Ok(()) => println!("connected to {host}:{port}"),
                Err(e) => println!("connect failed: {e}"),
            },
            _ => println!("usage: connect <host> <port>"),
        },
        "message" => {
            let Some(recipient) = words.next().map(str::to_string) else {
                println!("usage: message <recipient> <content>");
                return true;
            };
            let content = words.collect::<Vec<_>>().join(" ");
            match Address::from_hex(&recipient) {
                Ok(addr) => match node.send_message(addr, &content).await {
                    Ok(hash) => println!("message queued: {hash}"),
                    Err(e) => println!("message failed: {e}"),
                },
                Err(e) => println!("bad recipient: {e}"),
            }
        }
        "send" => {
            match (
                words.next().map(Address::from_hex),
                words.next().and_then(|a| a.parse::<u64>().ok()),
            ) {
                (Some(Ok(addr)), Some(amount)) => match node.send_amount(addr, amount).await {
                    Ok(hash) => println!("transfer queued: {hash}"),
                    Err(e) => println!("send failed: {e}"),
                },
                (Some(Err(e)), _) => println!("bad recipient: {e}"),
                _ => println!("usage: send <recipient> <amount>"),
            }
        }
        "mine" => match node.mine().await {
            Ok(MineOutcome::Mined(block)) => {
                println!("mined block #{} {}", block.index, block.hash)
            }
            Ok(MineOutcome::Cancelled) => println!("mining cancelled"),
            Err(e) => println!("mine failed: {e}"),
        },
        "balance" => println!("balance: {}", node.balance()),
        "peers" => {
            let peers = node.peers();
            if peers.is_empty() {
                println!("no known peers");
            }
            for peer in peers {
                println!("{peer}");
            }
        }
        "chain" => println!("{}", node.chain_display()),
        "exit" => return false,
        other => println!("unknown command: {other}"),
    }
    true
}
