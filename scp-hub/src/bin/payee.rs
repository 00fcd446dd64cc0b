//! Demo payee server: a paid resource behind a `402` offer.
//!
//! # Usage
//!
//! ```bash
//! PAYEE_PRIVATE_KEY=0x... HUB_URL=http://127.0.0.1:4021 cargo run -p scp-hub --bin scp-payee
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use alloy_primitives::Address;
use clap::Parser;
use scp::proto::{FeeModel, TokenAmount};
use scp_http::constants::DEFAULT_HUB_URL;
use scp_http::server::{PayeeConfig, PayeeState, payee_router};
use scp_hub::util::SigDown;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Well-known development payee key. Never fund it.
const DEV_PAYEE_KEY: &str = "0x8b3a350cf5c34c9194ca85829a2df0ec3153be0318b5e2d3348e872092edffba";

/// Payee server options.
#[derive(Parser, Debug)]
#[command(name = "scp-payee", version, about = "Serve a resource paid through SCP")]
struct Args {
    /// Bind address.
    #[arg(long, env = "PAYEE_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    host: IpAddr,

    /// Bind port.
    #[arg(long, env = "PAYEE_PORT", default_value_t = 4042)]
    port: u16,

    /// Hub base URL.
    #[arg(long, env = "HUB_URL", default_value = DEFAULT_HUB_URL)]
    hub_url: String,

    /// Network name (`base`, `sepolia`, ...) or CAIP-2 id.
    #[arg(long, env = "NETWORK", default_value = "eip155:8453")]
    network: String,

    /// Payment asset address.
    #[arg(long, env = "DEFAULT_ASSET", default_value_t = scp_evm::networks::USDC_BASE)]
    asset: Address,

    /// Price per request in base units.
    #[arg(long, env = "PRICE", default_value = "1000000")]
    price: TokenAmount,

    /// Hub name advertised as `payTo`.
    #[arg(long, env = "HUB_NAME", default_value = "pay.eth")]
    hub_name: String,

    /// Path of the protected resource.
    #[arg(long, env = "RESOURCE_PATH", default_value = "/v1/data")]
    resource_path: String,

    /// Payee key; only its address is used.
    #[arg(long, env = "PAYEE_PRIVATE_KEY", default_value = DEV_PAYEE_KEY, hide_default_value = true)]
    private_key: String,

    /// Skip the hub payment-status check.
    #[arg(long, env = "PERF_MODE")]
    perf_mode: bool,
}

fn network_id(raw: &str) -> Result<String, scp_evm::networks::NetworkError> {
    if scp_evm::networks::parse_caip2(raw).is_some() {
        return Ok(raw.to_owned());
    }
    scp_evm::networks::resolve_network(raw).map(|n| scp_evm::networks::caip2(n.chain_id))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("Payee failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let payee = scp_evm::signing::parse_signer(&args.private_key)
        .map_err(|e| format!("Invalid PAYEE_PRIVATE_KEY: {e}"))?
        .address();
    if args.private_key == DEV_PAYEE_KEY {
        tracing::warn!("Using the public development payee key; set PAYEE_PRIVATE_KEY");
    }

    let config = PayeeConfig {
        host: args.host.to_string(),
        port: args.port,
        hub_url: args.hub_url,
        network: network_id(&args.network)?,
        asset: args.asset,
        price: args.price,
        hub_name: args.hub_name,
        resource_path: args.resource_path,
        perf_mode: args.perf_mode,
        fee_model: FeeModel {
            base: TokenAmount::from(10u64),
            bps: 30,
        },
    };
    tracing::info!(
        payee = %payee,
        hub_url = %config.hub_url,
        network = %config.network,
        price = %config.price,
        perf_mode = config.perf_mode,
        "Loaded configuration"
    );
    let resource_url = config.resource_url();
    let state = Arc::new(PayeeState::new(config, payee)?);

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();

    let app = payee_router(state).layer(TraceLayer::new_for_http());
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Payee serving {resource_url}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Payee shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_accepts_names_and_caip2() {
        assert_eq!(network_id("eip155:84532").unwrap(), "eip155:84532");
        assert_eq!(network_id("sepolia").unwrap(), "eip155:11155111");
        assert!(network_id("solana").is_err());
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["scp-payee", "--port", "5000"]).unwrap();
        assert_eq!(args.port, 5000);
        assert_eq!(args.price, TokenAmount::from(1_000_000u64));
        assert_eq!(args.resource_path, "/v1/data");
    }
}
