//! Dispute watcher: challenges stale unilateral closes with the newest
//! countersigned state held by the hub store or the agent state file.
//!
//! # Usage
//!
//! ```bash
//! ROLE=hub RPC_URL=https://rpc.sepolia.org CHANNEL_ID=0x... \
//!   WATCHER_PRIVATE_KEY=0x... cargo run -p scp-hub --bin scp-watch
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, B256};
use clap::Parser;
use scp_evm::watch::{DEFAULT_SAFETY_BUFFER_SECS, FileProofSource, Role, WatcherConfig, run_all};
use scp_hub::util::SigDown;
use tracing_subscriber::EnvFilter;

/// Watcher options.
#[derive(Parser, Debug)]
#[command(name = "scp-watch", version, about = "Defend SCP channels against stale closes")]
struct Args {
    /// Whose proofs to use: `agent` or `hub`.
    #[arg(long, env = "ROLE", default_value = "agent")]
    role: Role,

    /// HTTP RPC endpoint.
    #[arg(long, env = "RPC_URL")]
    rpc_url: url::Url,

    /// Settlement contract; known networks fall back to their deployment.
    #[arg(long, env = "CONTRACT_ADDRESS")]
    contract_address: Option<Address>,

    /// Chain id used to look up a known contract deployment.
    #[arg(long, env = "CHAIN_ID", default_value_t = scp_evm::networks::SEPOLIA)]
    chain_id: u64,

    /// Channels to watch, comma separated.
    #[arg(long = "channel-id", env = "CHANNEL_ID", value_delimiter = ',', required = true)]
    channel_ids: Vec<B256>,

    /// Poll interval in milliseconds.
    #[arg(long, env = "POLL_MS", default_value_t = 5000)]
    poll_ms: u64,

    /// Seconds of margin required before the close deadline.
    #[arg(long, env = "SAFETY_BUFFER_SEC", default_value_t = DEFAULT_SAFETY_BUFFER_SECS)]
    safety_buffer_sec: u64,

    /// Hub store file, read when `role` is `hub`.
    #[arg(long, env = "HUB_STORE_PATH", default_value = "./data/store.json")]
    hub_store_path: PathBuf,

    /// Agent state file, read when `role` is `agent`.
    #[arg(long, env = "AGENT_STATE_PATH", default_value = "./data/agent-state.json")]
    agent_state_path: PathBuf,

    /// Key that sends challenge transactions.
    #[arg(long, env = "WATCHER_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
}

impl Args {
    fn proof_path(&self) -> &PathBuf {
        match self.role {
            Role::Hub => &self.hub_store_path,
            Role::Agent => &self.agent_state_path,
        }
    }

    fn watchers(&self) -> Vec<WatcherConfig> {
        self.channel_ids
            .iter()
            .map(|&channel_id| WatcherConfig {
                poll_interval: Duration::from_millis(self.poll_ms.max(1)),
                safety_buffer_secs: self.safety_buffer_sec,
                ..WatcherConfig::new(self.role, channel_id)
            })
            .collect()
    }
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
        tracing::error!("Watcher failed: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "chain-eip155")]
async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    use scp_evm::chain::{Eip155ChannelContract, connect_http};

    let signer = scp_evm::signing::parse_signer(&args.private_key)
        .map_err(|e| format!("Invalid WATCHER_PRIVATE_KEY: {e}"))?;
    let contract_address = scp_evm::networks::resolve_contract(args.chain_id, args.contract_address)
        .ok_or("CONTRACT_ADDRESS required for this chain")?;
    let caller = signer.address();
    let provider = connect_http(args.rpc_url.clone(), signer);
    let contract = Arc::new(Eip155ChannelContract::new(contract_address, provider, caller));
    let proofs = Arc::new(FileProofSource::new(args.role, args.proof_path().clone()));

    let watchers = args.watchers();
    tracing::info!(
        role = %args.role,
        contract = %contract_address,
        watcher = %caller,
        channels = watchers.len(),
        poll_ms = args.poll_ms,
        proofs = %args.proof_path().display(),
        "Watching channels"
    );

    let sig_down = SigDown::try_new()?;
    run_all(contract, proofs, watchers, sig_down.cancellation_token()).await;
    sig_down.recv().await;
    tracing::info!("Watcher stopped");
    Ok(())
}

#[cfg(not(feature = "chain-eip155"))]
async fn run(_args: Args) -> Result<(), Box<dyn std::error::Error>> {
    Err("scp-watch needs the chain-eip155 feature".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_channels_and_role_paths() {
        let a = B256::repeat_byte(0x01);
        let b = B256::repeat_byte(0x02);
        let args = Args::try_parse_from([
            "scp-watch",
            "--role",
            "hub",
            "--rpc-url",
            "http://127.0.0.1:8545",
            "--channel-id",
            &format!("{a},{b}"),
            "--poll-ms",
            "250",
            "--private-key",
            "0x01",
        ])
        .unwrap();
        assert_eq!(args.role, Role::Hub);
        assert_eq!(args.proof_path(), &PathBuf::from("./data/store.json"));
        let watchers = args.watchers();
        assert_eq!(watchers.len(), 2);
        assert_eq!(watchers[1].channel_id, b);
        assert_eq!(watchers[0].poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let result = Args::try_parse_from([
            "scp-watch",
            "--role",
            "payee",
            "--rpc-url",
            "http://127.0.0.1:8545",
            "--channel-id",
            &format!("{}", B256::ZERO),
            "--private-key",
            "0x01",
        ]);
        assert!(result.is_err());
    }
}
