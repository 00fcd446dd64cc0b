//! Hub server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 4021
//! hub_name = "pay.eth"
//! chain_id = 11155111
//! signer_private_key = "$HUB_PRIVATE_KEY"
//! rpc_url = "https://rpc.sepolia.org"
//! store_path = "./data/store.json"
//! fee_base = 10
//! fee_bps = 30
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - Any variable referenced by `$VAR` in the config file

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use scp::fee::FeePolicy;
use scp::proto::TokenAmount;

/// Well-known development key. Never fund it.
pub const DEV_PRIVATE_KEY: &str =
    "0x59c6995e998f97a5a0044976f5d81f39bcb8c4f7f2d1b6c2c9f6f2c7d4b6f001";

/// Top-level hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Server bind address (default: `127.0.0.1`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `4021`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Name published in discovery and offers.
    #[serde(default = "default_hub_name")]
    pub hub_name: String,

    /// EIP-155 chain id bound into every policy hash.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Hub signer key (hex, with or without `0x`).
    #[serde(default = "default_signer_private_key")]
    pub signer_private_key: String,

    /// First asset listed in `supportedAssets`.
    #[serde(default = "default_asset")]
    pub default_asset: Address,

    /// Flat fee per payment, in base units.
    #[serde(default = "default_fee_base")]
    pub fee_base: u64,

    /// Variable fee in basis points.
    #[serde(default = "default_fee_bps")]
    pub fee_bps: u32,

    /// Flat gas surcharge per payment, in base units.
    #[serde(default)]
    pub gas_surcharge: u64,

    /// HTTP RPC endpoint. Payouts and payee channels need it.
    #[serde(default)]
    pub rpc_url: Option<String>,

    /// Settlement contract. Known networks fall back to their deployment.
    #[serde(default)]
    pub contract_address: Option<Address>,

    /// JSON store file; in-memory when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Seconds between collateral reconciliation passes.
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    4021
}

fn default_hub_name() -> String {
    "pay.eth".to_owned()
}

fn default_chain_id() -> u64 {
    scp_evm::networks::BASE_MAINNET
}

fn default_signer_private_key() -> String {
    DEV_PRIVATE_KEY.to_owned()
}

fn default_asset() -> Address {
    scp_evm::networks::USDC_BASE
}

fn default_fee_base() -> u64 {
    10
}

fn default_fee_bps() -> u32 {
    30
}

fn default_reconcile_interval_secs() -> u64 {
    60
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            hub_name: default_hub_name(),
            chain_id: default_chain_id(),
            signer_private_key: default_signer_private_key(),
            default_asset: default_asset(),
            fee_base: default_fee_base(),
            fee_bps: default_fee_bps(),
            gas_surcharge: 0,
            rpc_url: None,
            contract_address: None,
            store_path: None,
            reconcile_interval_secs: default_reconcile_interval_secs(),
        }
    }
}

impl HubConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `config.toml` in the current directory.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| "config.toml".to_owned());
        Self::load_from(&path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            String::new()
        };

        let mut config = Self::parse(&expand_env_vars(&content))?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }

    /// Parses an already expanded TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid hub configuration.
    pub fn parse(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Fee policy described by `fee_base`, `fee_bps` and `gas_surcharge`.
    #[must_use]
    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy {
            base: TokenAmount::from(self.fee_base),
            bps: self.fee_bps,
            gas_surcharge: TokenAmount::from(self.gas_surcharge),
        }
    }

    /// Whether the signer is the public development key.
    #[must_use]
    pub fn uses_dev_key(&self) -> bool {
        self.signer_private_key.trim().trim_start_matches("0x")
            == DEV_PRIVATE_KEY.trim_start_matches("0x")
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Some(val) = lookup(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HUB_KEY" => Some("0xabc".to_owned()),
            "STORE" => Some("/var/lib/scp".to_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_expand_both_syntaxes() {
        assert_eq!(expand_with("key = \"$HUB_KEY\"", env), "key = \"0xabc\"");
        assert_eq!(expand_with("${STORE}/store.json", env), "/var/lib/scp/store.json");
    }

    #[test]
    fn test_unresolved_variables_are_kept() {
        assert_eq!(expand_with("$MISSING and ${ALSO}", env), "$MISSING and ${ALSO}");
        assert_eq!(expand_with("cost: $ 5", env), "cost: $ 5");
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = HubConfig::parse("").unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.port, 4021);
        assert!(config.uses_dev_key());
        assert!(config.store_path.is_none());
    }

    #[test]
    fn test_parses_overrides() {
        let config = HubConfig::parse(
            r#"
            port = 5000
            chain_id = 11155111
            fee_base = 0
            fee_bps = 100
            gas_surcharge = 7
            contract_address = "0x6F858C7120290431B606bBa343E3A8737B3dfCB4"
            store_path = "/tmp/store.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.chain_id, 11_155_111);
        assert!(config.contract_address.is_some());
        let fees = config.fee_policy();
        assert_eq!(fees.bps, 100);
        assert_eq!(fees.gas_surcharge, TokenAmount::from(7u64));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = HubConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.hub_name, "pay.eth");
        assert_eq!(config.reconcile_interval_secs, 60);
    }
}
