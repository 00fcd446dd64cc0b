//! Command-line payer agent.
//!
//! # Usage
//!
//! ```bash
//! # Pay for a resource, hub route first
//! scp-agent pay http://127.0.0.1:4042/v1/data
//!
//! # Force the direct route
//! scp-agent pay http://127.0.0.1:4042/v1/data direct
//!
//! # Open and fund a channel with a hub (needs RPC_URL)
//! scp-agent open 0xHubAddress base usdc 20
//! scp-agent fund 0xChannelId 5000000
//! ```
//!
//! # Environment Variables
//!
//! - `AGENT_PRIVATE_KEY` - Payer key; dev mode with virtual channels when unset
//! - `RPC_URL` / `CONTRACT_ADDRESS` / `CHAIN_ID` - Settlement contract access
//! - `AGENT_STATE_DIR` - Directory of `agent-state.json` (default: `./data/agent`)
//! - `MAX_FEE` / `MAX_AMOUNT` - Payment ceilings in base units
//! - `NETWORK_ALLOWLIST` - Comma-separated CAIP-2 networks
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::collections::BTreeMap;
use std::path::PathBuf;

use alloy_primitives::{Address, B256};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use scp::proto::{Scheme, TokenAmount};
use scp_agent::{AddressPayment, AgentOptions, OpenOptions, PayOptions, ScpAgent};
use scp_evm::networks;

/// Agent options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(name = "scp-agent", version, about = "Pay for x402 resources over state channels")]
struct Cli {
    /// Payer key.
    #[arg(long, env = "AGENT_PRIVATE_KEY", hide_env_values = true, global = true)]
    private_key: Option<String>,

    /// HTTP RPC endpoint for on-chain operations.
    #[arg(long, env = "RPC_URL", global = true)]
    rpc_url: Option<url::Url>,

    /// Settlement contract; known networks fall back to their deployment.
    #[arg(long, env = "CONTRACT_ADDRESS", global = true)]
    contract_address: Option<Address>,

    /// Chain id of the settlement contract.
    #[arg(long, env = "CHAIN_ID", default_value_t = networks::BASE_MAINNET, global = true)]
    chain_id: u64,

    /// Directory holding the state file.
    #[arg(long, env = "AGENT_STATE_DIR", default_value = "./data/agent", global = true)]
    state_dir: PathBuf,

    /// Fee ceiling per payment, in base units.
    #[arg(long, env = "MAX_FEE", global = true)]
    max_fee: Option<TokenAmount>,

    /// Amount ceiling per payment, in base units.
    #[arg(long, env = "MAX_AMOUNT", global = true)]
    max_amount: Option<TokenAmount>,

    /// Networks the agent pays on.
    #[arg(
        long,
        env = "NETWORK_ALLOWLIST",
        value_delimiter = ',',
        default_value = "eip155:8453",
        global = true
    )]
    network_allowlist: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pay for a resource.
    Pay {
        /// Resource URL.
        url: String,
        /// Route to take; hub first when omitted.
        route: Option<Route>,
    },
    /// Transfer to an address through a hub.
    PayAddress {
        /// Recipient.
        payee: Address,
        /// Amount in base units.
        amount: TokenAmount,
        /// Hub base URL.
        #[arg(long, default_value = scp_http::constants::DEFAULT_HUB_URL)]
        hub: String,
        /// Asset; Base USDC when omitted.
        #[arg(long)]
        asset: Option<Address>,
    },
    /// List local channels.
    Channels,
    /// List recorded payments.
    Payments,
    /// Open a channel on-chain.
    Open {
        /// Counterparty, a hub or a payee.
        participant_b: Address,
        /// Network name, e.g. `base` or `sepolia`.
        network: String,
        /// Asset symbol or token address.
        asset: String,
        /// Deposit; human units for a symbol, base units for an address.
        amount: String,
    },
    /// Deposit into an open channel.
    Fund {
        /// Channel id.
        channel_id: B256,
        /// Amount in base units.
        amount: TokenAmount,
    },
    /// Close a channel with the latest countersigned state.
    Close {
        /// Channel id.
        channel_id: B256,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Route {
    Hub,
    Direct,
}

impl From<Route> for Scheme {
    fn from(route: Route) -> Self {
        match route {
            Route::Hub => Self::Hub,
            Route::Direct => Self::Direct,
        }
    }
}

impl Cli {
    fn agent_options(&self) -> AgentOptions {
        let defaults = AgentOptions::with_private_key(self.private_key.clone());
        AgentOptions {
            network_allowlist: self.network_allowlist.clone(),
            max_fee_default: self.max_fee.unwrap_or(defaults.max_fee_default),
            max_amount_default: self.max_amount.unwrap_or(defaults.max_amount_default),
            state_dir: self.state_dir.clone(),
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let options = cli.agent_options();
    if options.dev_mode {
        tracing::warn!("No AGENT_PRIVATE_KEY set; using the development key and virtual channels");
    }
    let agent = with_chain(ScpAgent::open(options).await?, &cli)?;

    match cli.command {
        Command::Pay { url, route } => {
            let opts = PayOptions {
                route: route.map(Scheme::from),
                ..PayOptions::default()
            };
            print_json(&agent.pay_resource(&url, &opts).await?)
        }
        Command::PayAddress {
            payee,
            amount,
            hub,
            asset,
        } => {
            let params = AddressPayment {
                hub_endpoint: hub,
                asset: asset.unwrap_or(networks::USDC_BASE),
                ..AddressPayment::default()
            };
            print_json(&agent.pay_address(payee, amount, &params).await?)
        }
        Command::Channels => {
            let channels: BTreeMap<_, _> = agent.list_channels().await.into_iter().collect();
            print_json(&channels)
        }
        Command::Payments => print_json(&agent.payments().await),
        Command::Open {
            participant_b,
            network,
            asset,
            amount,
        } => {
            let (asset, amount) = open_amount(&network, &asset, &amount)?;
            let opts = OpenOptions {
                asset,
                amount,
                ..OpenOptions::default()
            };
            print_json(&agent.open_channel(participant_b, opts).await?)
        }
        Command::Fund { channel_id, amount } => {
            print_json(&agent.fund_channel(channel_id, amount).await?)
        }
        Command::Close { channel_id } => print_json(&agent.close_channel(channel_id).await?),
    }
}

/// Resolves the asset and base-unit deposit of `open`.
fn open_amount(
    network: &str,
    asset: &str,
    amount: &str,
) -> Result<(Address, TokenAmount), Box<dyn std::error::Error>> {
    if let Ok(address) = asset.parse::<Address>() {
        return Ok((address, amount.parse()?));
    }
    let network = networks::resolve_network(network)?;
    let info = networks::resolve_asset(network.chain_id, asset)?;
    Ok((info.address, networks::parse_amount(amount, info.decimals)?))
}

#[cfg(feature = "chain-eip155")]
fn with_chain(agent: ScpAgent, cli: &Cli) -> Result<ScpAgent, Box<dyn std::error::Error>> {
    use scp_evm::chain::{Eip155ChannelContract, connect_http};
    use std::sync::Arc;

    let Some(rpc_url) = cli.rpc_url.clone() else {
        return Ok(agent);
    };
    let Some(contract_address) = networks::resolve_contract(cli.chain_id, cli.contract_address)
    else {
        tracing::warn!(
            chain_id = cli.chain_id,
            "No settlement contract for this chain; on-chain commands are disabled"
        );
        return Ok(agent);
    };
    let signer = scp_evm::signing::parse_signer(
        cli.private_key
            .as_deref()
            .unwrap_or(scp_agent::options::DEV_PRIVATE_KEY),
    )?;
    let caller = signer.address();
    let provider = connect_http(rpc_url, signer);
    tracing::info!(contract = %contract_address, "Using settlement contract");
    Ok(agent.with_contract(Arc::new(Eip155ChannelContract::new(
        contract_address,
        provider,
        caller,
    ))))
}

#[cfg(not(feature = "chain-eip155"))]
#[allow(clippy::unnecessary_wraps)]
fn with_chain(agent: ScpAgent, cli: &Cli) -> Result<ScpAgent, Box<dyn std::error::Error>> {
    if cli.rpc_url.is_some() {
        tracing::warn!("Built without chain-eip155; ignoring RPC_URL");
    }
    Ok(agent)
}

#[allow(clippy::print_stdout)]
fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
