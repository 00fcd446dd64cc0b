//! Agent settings and per-call overrides.

use alloy_primitives::{Address, B256};
use std::path::PathBuf;
use std::time::Duration;

use scp::UnixTimestamp;
use scp::proto::{Scheme, TokenAmount};

/// Publicly known development key used when no key is configured. Never fund it.
pub const DEV_PRIVATE_KEY: &str =
    "0x6c875bfb4f247fcbcd37fd56f564fca0cfaf6458cd5e8878e9ef32ed5004f999";

/// Challenge window of channels opened by the agent.
pub const DEFAULT_CHALLENGE_PERIOD_SECS: u64 = 86_400;

/// Lifetime of channels opened by the agent.
pub const DEFAULT_CHANNEL_TTL_SECS: u64 = 86_400 * 30;

/// Long-lived agent settings.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// Payer key; [`DEV_PRIVATE_KEY`] when unset.
    pub private_key: Option<String>,
    /// CAIP-2 networks the agent pays on.
    pub network_allowlist: Vec<String>,
    /// Assets the agent pays in; empty allows any.
    pub asset_allowlist: Vec<Address>,
    /// Fee ceiling sent with every quote.
    pub max_fee_default: TokenAmount,
    /// Largest amount paid without an explicit override.
    pub max_amount_default: TokenAmount,
    /// Create virtual channels on demand instead of failing.
    pub dev_mode: bool,
    /// Write the state file after every change.
    pub persist: bool,
    /// Directory holding `agent-state.json`.
    pub state_dir: PathBuf,
    /// Timeout of every outbound HTTP request.
    pub timeout: Duration,
    /// Idle connections kept per host.
    pub max_sockets: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            private_key: None,
            network_allowlist: vec!["eip155:8453".to_owned()],
            asset_allowlist: Vec::new(),
            max_fee_default: TokenAmount::from(5_000u64),
            max_amount_default: TokenAmount::from(5_000_000u64),
            dev_mode: true,
            persist: true,
            state_dir: PathBuf::from("./data/agent"),
            timeout: scp_http::constants::DEFAULT_TIMEOUT,
            max_sockets: scp_http::constants::DEFAULT_MAX_IDLE_PER_HOST,
        }
    }
}

impl AgentOptions {
    /// Options for `private_key`; dev mode is on only without a key.
    #[must_use]
    pub fn with_private_key(private_key: Option<String>) -> Self {
        Self {
            dev_mode: private_key.is_none(),
            private_key,
            ..Self::default()
        }
    }

    /// Whether an offer on `network` in `asset` passes the allowlists.
    #[must_use]
    pub fn allows(&self, network: &str, asset: Address) -> bool {
        self.network_allowlist.iter().any(|n| n == network)
            && (self.asset_allowlist.is_empty() || self.asset_allowlist.contains(&asset))
    }
}

/// Overrides for one resource payment.
#[derive(Debug, Clone, Default)]
pub struct PayOptions {
    /// Route to take; hub first, then direct, when unset.
    pub route: Option<Scheme>,
    /// Payment id; random when unset.
    pub payment_id: Option<String>,
    /// Fee ceiling; [`AgentOptions::max_fee_default`] when unset.
    pub max_fee: Option<TokenAmount>,
    /// Amount ceiling; [`AgentOptions::max_amount_default`] when unset.
    pub max_amount: Option<TokenAmount>,
    /// Only consider offers on this network.
    pub network: Option<String>,
    /// Only consider offers in this asset.
    pub asset: Option<Address>,
}

/// Parameters of a hub transfer to an address.
#[derive(Debug, Clone)]
pub struct AddressPayment {
    /// Hub base URL.
    pub hub_endpoint: String,
    /// Asset to pay in.
    pub asset: Address,
    /// Invoice id; random when unset.
    pub invoice_id: Option<String>,
    /// Payment id; random when unset.
    pub payment_id: Option<String>,
    /// Fee ceiling; [`AgentOptions::max_fee_default`] when unset.
    pub max_fee: Option<TokenAmount>,
}

impl Default for AddressPayment {
    fn default() -> Self {
        Self {
            hub_endpoint: scp_http::constants::DEFAULT_HUB_URL.to_owned(),
            asset: scp_evm::networks::USDC_BASE,
            invoice_id: None,
            payment_id: None,
            max_fee: None,
        }
    }
}

/// Parameters of `openChannel`.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Asset; zero for the native coin.
    pub asset: Address,
    /// Initial deposit.
    pub amount: TokenAmount,
    /// Challenge window; [`DEFAULT_CHALLENGE_PERIOD_SECS`] when unset.
    pub challenge_period_sec: Option<u64>,
    /// Expiry; [`DEFAULT_CHANNEL_TTL_SECS`] from now when unset.
    pub channel_expiry: Option<UnixTimestamp>,
    /// Salt; derived from the time and counterparty when unset.
    pub salt: Option<B256>,
}
