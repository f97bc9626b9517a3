mod api;
mod constants;
mod signature;

use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_LISTEN};
use crate::signature::Ed25519Verifier;
use api::AppState;
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, Level};
use txledger_core::{
    constants::{CHAIN_STORAGE_KEY, DEFAULT_DIFFICULTY, HASH_HEX_SIZE},
    CancelFlag, Chain, ChainConfig, SyncService,
};
use txledger_storage::SledStore;

#[derive(Parser, Debug)]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: String,

    /// Data directory for sled
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Leading zero hex characters required of a mined block hash (0-64)
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY, value_parser = parse_difficulty)]
    difficulty: usize,

    /// Give up on a block after this many nonce attempts
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Key the chain is persisted under
    #[arg(long, default_value = CHAIN_STORAGE_KEY)]
    storage_key: String,
}

fn parse_difficulty(s: &str) -> Result<usize, String> {
    let difficulty: usize = s.parse().map_err(|e| format!("{e}"))?;
    if difficulty > HASH_HEX_SIZE {
        return Err(format!(
            "difficulty {difficulty} can never be met by a {HASH_HEX_SIZE}-character hash"
        ));
    }
    Ok(difficulty)
}

impl Args {
    fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            difficulty: self.difficulty,
            storage_key: self.storage_key.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let store = Arc::new(SledStore::open(&args.data_dir)?);
    let chain = Arc::new(Chain::load(store.clone(), args.chain_config()));
    info!(
        "chain ready with {} blocks at difficulty {}",
        chain.len(),
        args.difficulty
    );

    let transactions = Arc::new(store.transactions()?);
    let service = Arc::new(SyncService::new(chain, transactions, Arc::new(Ed25519Verifier)));
    let cancel = service.cancel_flag().clone();
    let app = api::router(AppState { service });

    let addr: SocketAddr = args.listen.parse()?;
    info!("txledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown(cancel))
        .await?;
    store.close()?;
    Ok(())
}

async fn shutdown(cancel: CancelFlag) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down, cancelling in-flight mining");
    cancel.cancel();
}
