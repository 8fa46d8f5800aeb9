//! Passkey smart-wallet service.
//!
//! # Architecture Overview
//!
//! ```text
//!     Browser (WebAuthn)                ┌───────────────────────────────────────────────┐
//!     ─────────────────────────────────▶│ http: account / operations / ceremonies       │
//!                                       └──────────────────────┬────────────────────────┘
//!                                                              ▼
//!                                       ┌───────────────────────────────────────────────┐
//!                                       │ pipeline (account lock)                       │
//!                                       │   chain state → builder → sponsor → sign      │
//!                                       └───────┬──────────────┬──────────────┬─────────┘
//!                                               ▼              ▼              ▼
//!                                          chain RPC      paymaster       bundler
//!                                          (alloy)        (JSON-RPC)      (JSON-RPC)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::Parser;
use tokio::net::TcpListener;

use passkey_wallet::account::InMemoryDirectory;
use passkey_wallet::chain::ChainClient;
use passkey_wallet::config::loader::load_config;
use passkey_wallet::config::watcher::ConfigWatcher;
use passkey_wallet::http::{load_tls_config, ApiServer, AppState};
use passkey_wallet::lifecycle::shutdown::shutdown_on_ctrl_c;
use passkey_wallet::observability::{logging, metrics};
use passkey_wallet::pipeline::{follow_config, ChainRegistry, TransactionPipeline};
use passkey_wallet::Shutdown;

#[derive(Parser)]
#[command(name = "passkey-wallet")]
#[command(about = "Passkey smart-wallet service", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "wallet.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "passkey-wallet starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    for chain in &config.chains {
        let client = ChainClient::connect(chain)?;
        if let Err(e) = client.verify_chain_id().await {
            tracing::warn!(chain_id = chain.chain_id, error = %e, "Chain RPC check failed");
        }
    }

    let directory = Arc::new(match &config.directory.snapshot_path {
        Some(path) => InMemoryDirectory::load_from_file(path)?,
        None => InMemoryDirectory::new(None),
    });

    let registry = Arc::new(ArcSwap::from_pointee(ChainRegistry::from_config(&config, None)?));
    let pipeline = Arc::new(TransactionPipeline::new(directory.clone(), registry.clone()));
    let state = AppState::new(pipeline);

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_ctrl_c(shutdown.clone()));
    tokio::spawn(
        state
            .ceremonies
            .clone()
            .run_sweeper(Duration::from_secs(1), shutdown.clone()),
    );

    let (watcher, updates) = ConfigWatcher::new(&args.config, config.clone());
    let _watcher = match watcher.run() {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(error = %e, "Config hot reload disabled");
            None
        }
    };
    tokio::spawn(follow_config(registry, updates, shutdown.clone()));

    tracing::info!(
        bind_address = %config.server.bind_address,
        chains = config.chains.len(),
        tls = config.server.tls.is_some(),
        "Configuration loaded"
    );

    let server = ApiServer::new(state, config.server.clone());
    match &config.server.tls {
        Some(tls) => {
            let tls = load_tls_config(tls).await?;
            server.run_tls(tls, shutdown).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.server.bind_address).await?;
            server.run(listener, shutdown).await?;
        }
    }

    directory.save_to_file()?;
    tracing::info!("Shutdown complete");
    Ok(())
}
