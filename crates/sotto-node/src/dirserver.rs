//! sotto-directory — the rendez-vous directory.
//!
//! A peer-list echo: nodes register with `NEW_PEER`, fetch the list with
//! `GET_PEERS`, and prune dead entries with `INVALID_PEER`. Not part of
//! consensus; run one anywhere nodes can reach.

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use sotto_p2p::directory::DirectoryServer;

#[derive(Parser, Debug)]
#[command(
    name = "sotto-directory",
    version,
    about = "sotto rendez-vous directory — hands out peer addresses"
)]
struct Args {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(long, default_value_t = 5050)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().expect("static filter parses")),
        )
        .init();

    let args = Args::parse();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let addr = format!("{}:{}", args.host, args.port);
    let (_server, _) = DirectoryServer::serve(&addr, shutdown_rx)
        .await
        .context("starting directory")?;

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupt received; stopping");
    }
    let _ = shutdown_tx.send(true);
    Ok(())
}
