//! Known EVM networks, token deployments and the settlement contract address.

use alloy_primitives::{Address, U256, address};
use rust_decimal::Decimal;
use std::str::FromStr;

use scp::proto::TokenAmount;

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Sepolia (testnet) chain ID.
pub const SEPOLIA: u64 = 11_155_111;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84532;

/// USDC contract address on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// Settlement contract deployed on Sepolia.
pub const SEPOLIA_CHANNEL_CONTRACT: Address =
    address!("6F858C7120290431B606bBa343E3A8737B3dfCB4");

/// A named network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkInfo {
    /// EIP-155 chain id.
    pub chain_id: u64,
    /// Public RPC endpoint.
    pub rpc_url: &'static str,
    /// Display name.
    pub name: &'static str,
}

/// A token on a specific chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetInfo {
    /// Token address; zero for the native coin.
    pub address: Address,
    /// Token decimals.
    pub decimals: u8,
    /// Ticker.
    pub symbol: &'static str,
}

const NETWORKS: &[(&str, NetworkInfo)] = &[
    ("mainnet", ETHEREUM),
    ("ethereum", ETHEREUM),
    ("eth", ETHEREUM),
    (
        "base",
        NetworkInfo {
            chain_id: BASE_MAINNET,
            rpc_url: "https://mainnet.base.org",
            name: "Base",
        },
    ),
    (
        "sepolia",
        NetworkInfo {
            chain_id: SEPOLIA,
            rpc_url: "https://rpc.sepolia.org",
            name: "Sepolia",
        },
    ),
    (
        "base-sepolia",
        NetworkInfo {
            chain_id: BASE_SEPOLIA,
            rpc_url: "https://sepolia.base.org",
            name: "Base Sepolia",
        },
    ),
];

const ETHEREUM: NetworkInfo = NetworkInfo {
    chain_id: ETHEREUM_MAINNET,
    rpc_url: "https://eth.llamarpc.com",
    name: "Ethereum",
};

const fn usdc(address: Address) -> AssetInfo {
    AssetInfo {
        address,
        decimals: 6,
        symbol: "USDC",
    }
}

const ETH: AssetInfo = AssetInfo {
    address: Address::ZERO,
    decimals: 18,
    symbol: "ETH",
};

const ASSETS: &[(u64, &str, AssetInfo)] = &[
    (
        ETHEREUM_MAINNET,
        "usdc",
        usdc(address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
    ),
    (
        ETHEREUM_MAINNET,
        "usdt",
        AssetInfo {
            address: address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
            decimals: 6,
            symbol: "USDT",
        },
    ),
    (ETHEREUM_MAINNET, "eth", ETH),
    (BASE_MAINNET, "usdc", usdc(USDC_BASE)),
    (
        BASE_MAINNET,
        "usdt",
        AssetInfo {
            address: address!("fde4C96c8593536E31F229EA8f37b2ADa2699bb2"),
            decimals: 6,
            symbol: "USDT",
        },
    ),
    (BASE_MAINNET, "eth", ETH),
    (
        SEPOLIA,
        "usdc",
        usdc(address!("1c7D4B196Cb0C7B01d743Fbc6116a902379C7238")),
    ),
    (SEPOLIA, "eth", ETH),
    (
        BASE_SEPOLIA,
        "usdc",
        usdc(address!("036CbD53842c5426634e7929541eC2318f3dCF7e")),
    ),
    (BASE_SEPOLIA, "eth", ETH),
];

/// Lookup or amount-conversion failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    /// No network by that name.
    #[error("Unknown network: {name}. Known: {known}")]
    UnknownNetwork {
        /// Requested name.
        name: String,
        /// Comma-separated known names.
        known: String,
    },
    /// No such asset on the chain.
    #[error("Unknown asset: {symbol} on chain {chain_id}. Available: {available}")]
    UnknownAsset {
        /// Requested symbol.
        symbol: String,
        /// Chain searched.
        chain_id: u64,
        /// Comma-separated symbols on that chain.
        available: String,
    },
    /// The human amount cannot be represented in base units.
    #[error("invalid amount {amount:?} for {decimals} decimals")]
    InvalidAmount {
        /// Input.
        amount: String,
        /// Token decimals.
        decimals: u8,
    },
}

/// Resolves a network by name (`base`, `Base Sepolia`, `eth`, …).
///
/// # Errors
///
/// Returns [`NetworkError::UnknownNetwork`] listing the known names.
pub fn resolve_network(name: &str) -> Result<NetworkInfo, NetworkError> {
    let key = name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-");
    NETWORKS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, n)| *n)
        .ok_or_else(|| {
            let mut known: Vec<String> = NETWORKS.iter().map(|(_, n)| n.name.to_lowercase()).collect();
            known.dedup();
            NetworkError::UnknownNetwork {
                name: name.to_owned(),
                known: known.join(", "),
            }
        })
}

/// Resolves an asset by symbol on `chain_id`. An empty symbol means `eth`.
///
/// # Errors
///
/// Returns [`NetworkError::UnknownAsset`] listing the chain's symbols.
pub fn resolve_asset(chain_id: u64, symbol: &str) -> Result<AssetInfo, NetworkError> {
    let wanted = if symbol.trim().is_empty() {
        "eth".to_owned()
    } else {
        symbol.trim().to_lowercase()
    };
    ASSETS
        .iter()
        .find(|(c, s, _)| *c == chain_id && *s == wanted)
        .map(|(_, _, a)| *a)
        .ok_or_else(|| NetworkError::UnknownAsset {
            symbol: symbol.to_owned(),
            chain_id,
            available: ASSETS
                .iter()
                .filter(|(c, _, _)| *c == chain_id)
                .map(|(_, s, _)| *s)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Settlement contract: `configured` when set, else the known deployment on
/// `chain_id`.
#[must_use]
pub fn resolve_contract(chain_id: u64, configured: Option<Address>) -> Option<Address> {
    configured.or_else(|| (chain_id == SEPOLIA).then_some(SEPOLIA_CHANNEL_CONTRACT))
}

/// CAIP-2 identifier, e.g. `eip155:8453`.
#[must_use]
pub fn caip2(chain_id: u64) -> String {
    format!("eip155:{chain_id}")
}

/// Chain id of a CAIP-2 `eip155:<id>` identifier.
#[must_use]
pub fn parse_caip2(network: &str) -> Option<u64> {
    network.strip_prefix("eip155:")?.parse().ok()
}

/// Converts a human decimal amount (`"1.5"`) to base units.
///
/// # Errors
///
/// Returns [`NetworkError::InvalidAmount`] for negative values, too many
/// fractional digits, or unparsable input.
pub fn parse_amount(human: &str, decimals: u8) -> Result<TokenAmount, NetworkError> {
    let invalid = || NetworkError::InvalidAmount {
        amount: human.to_owned(),
        decimals,
    };
    let value = Decimal::from_str(human.trim()).map_err(|_| invalid())?.normalize();
    if value.is_sign_negative() || value.scale() > u32::from(decimals) {
        return Err(invalid());
    }
    let mantissa = u128::try_from(value.mantissa()).map_err(|_| invalid())?;
    let shift = U256::from(10u64).pow(U256::from(u32::from(decimals) - value.scale()));
    U256::from(mantissa)
        .checked_mul(shift)
        .map(TokenAmount::new)
        .ok_or_else(invalid)
}

/// Formats base units as a human decimal (`1000000`, 6 → `"1.0"`).
#[must_use]
pub fn format_amount(raw: TokenAmount, decimals: u8) -> String {
    let digits = raw.to_string();
    let decimals = usize::from(decimals);
    let padded = format!("{digits:0>width$}", width = decimals + 1);
    let (int, frac) = padded.split_at(padded.len() - decimals);
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{int}.0")
    } else {
        format!("{int}.{frac}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_network_aliases() {
        assert_eq!(resolve_network("eth").unwrap().chain_id, 1);
        assert_eq!(resolve_network("Base Sepolia").unwrap().chain_id, BASE_SEPOLIA);
        let err = resolve_network("solana").unwrap_err().to_string();
        assert!(err.starts_with("Unknown network: solana. Known: ethereum, base"));
    }

    #[test]
    fn test_resolve_asset() {
        assert_eq!(resolve_asset(BASE_MAINNET, "USDC").unwrap().address, USDC_BASE);
        assert_eq!(resolve_asset(SEPOLIA, "").unwrap().decimals, 18);
        let err = resolve_asset(SEPOLIA, "usdt").unwrap_err().to_string();
        assert_eq!(err, "Unknown asset: usdt on chain 11155111. Available: usdc, eth");
    }

    #[test]
    fn test_contract_lookup() {
        assert_eq!(resolve_contract(SEPOLIA, None), Some(SEPOLIA_CHANNEL_CONTRACT));
        assert_eq!(resolve_contract(BASE_MAINNET, None), None);
        assert_eq!(
            resolve_contract(SEPOLIA, Some(Address::repeat_byte(0x01))),
            Some(Address::repeat_byte(0x01))
        );
    }

    #[test]
    fn test_amount_conversion() {
        assert_eq!(parse_amount("1.5", 6).unwrap(), TokenAmount::from(1_500_000u64));
        assert_eq!(parse_amount("2", 0).unwrap(), TokenAmount::from(2u64));
        assert!(parse_amount("0.0000001", 6).is_err());
        assert!(parse_amount("-1", 6).is_err());
        assert_eq!(format_amount(TokenAmount::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_amount(TokenAmount::from(1_000_000u64), 6), "1.0");
        assert_eq!(format_amount(TokenAmount::from(5u64), 6), "0.000005");
    }

    #[test]
    fn test_caip2() {
        assert_eq!(caip2(BASE_MAINNET), "eip155:8453");
        assert_eq!(parse_caip2("eip155:84532"), Some(BASE_SEPOLIA));
        assert_eq!(parse_caip2("solana:mainnet"), None);
    }
}
