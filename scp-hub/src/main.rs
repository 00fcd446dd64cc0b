//! State-channel payment hub HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p scp-hub --release
//!
//! # Run with custom config path
//! CONFIG=/path/to/config.toml cargo run -p scp-hub
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p scp-hub
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override bind address (default: `127.0.0.1`)
//! - `PORT` - Override port (default: `4021`)
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use tokio::time::MissedTickBehavior;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use scp::UnixTimestamp;
use scp::store::{Store, StoreBackend};
use scp_hub::util::SigDown;
use scp_hub::{HubConfig, HubService, hub_router};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Hub failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = HubConfig::load()?;
    let signer = scp_evm::signing::parse_signer(&config.signer_private_key)
        .map_err(|e| format!("Invalid signer_private_key: {e}"))?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        hub_name = %config.hub_name,
        chain_id = config.chain_id,
        address = %signer.address(),
        "Loaded configuration"
    );
    if config.uses_dev_key() {
        tracing::warn!("Using the public development signer key; set signer_private_key");
    }

    let store = StoreBackend::open(config.store_path.as_deref()).await?;
    match &config.store_path {
        Some(path) => tracing::info!(path = %path.display(), "Using JSON file store"),
        None => tracing::info!("Using in-memory store"),
    }

    let hub = HubService::new(config.clone(), signer.clone(), store);
    #[cfg(feature = "chain-eip155")]
    let hub = with_chain(hub, &config, signer)?;
    #[cfg(not(feature = "chain-eip155"))]
    drop(signer);
    let hub = Arc::new(hub);

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();

    let reconcile = {
        let hub = Arc::clone(&hub);
        let cancel = cancel.clone();
        let period = Duration::from_secs(config.reconcile_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let report = hub.reconcile(UnixTimestamp::now()).await;
                        tracing::debug!(
                            payees = report.payees.len(),
                            flagged = report.flagged().count(),
                            "Reconciled payee collateral"
                        );
                    }
                }
            }
        })
    };

    let app = hub_router(Arc::clone(&hub))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Hub listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    reconcile.await?;
    hub.store().close().await?;
    tracing::info!("Hub shut down gracefully");
    Ok(())
}

#[cfg(feature = "chain-eip155")]
fn with_chain(
    hub: HubService<StoreBackend>,
    config: &HubConfig,
    signer: alloy_signer_local::PrivateKeySigner,
) -> Result<HubService<StoreBackend>, Box<dyn std::error::Error>> {
    use scp_evm::chain::{Eip155ChannelContract, Eip155Payout, connect_http};

    let Some(rpc_url) = config.rpc_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        tracing::warn!("No rpc_url configured; settlement and payee channels are disabled");
        return Ok(hub);
    };
    let rpc_url: url::Url = rpc_url
        .parse()
        .map_err(|e| format!("Invalid rpc_url: {e}"))?;
    let caller = signer.address();
    let provider = connect_http(rpc_url, signer);

    let mut hub = hub.with_payout(Arc::new(Eip155Payout::new(provider.clone())));
    match scp_evm::networks::resolve_contract(config.chain_id, config.contract_address) {
        Some(address) => {
            tracing::info!(contract = %address, "Using settlement contract");
            hub = hub.with_contract(Arc::new(Eip155ChannelContract::new(
                address, provider, caller,
            )));
        }
        None => tracing::warn!(
            chain_id = config.chain_id,
            "No settlement contract for this chain; payee channels cannot be opened"
        ),
    }
    Ok(hub)
}
