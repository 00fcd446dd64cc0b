use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use serde_with::{VecSkipError, serde_as};

use super::{DIRECT_SCHEME, HUB_SCHEME, TokenAmount};
use crate::timestamp::UnixTimestamp;

/// Payment scheme advertised in an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scheme {
    /// Hub-mediated ticket payment.
    #[serde(rename = "statechannel-hub-v1")]
    Hub,
    /// Direct channel payment to the payee.
    #[serde(rename = "statechannel-direct-v1")]
    Direct,
}

impl Scheme {
    /// Wire identifier of the scheme.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hub => HUB_SCHEME,
            Self::Direct => DIRECT_SCHEME,
        }
    }

    /// Short route name (`hub` or `direct`).
    #[must_use]
    pub const fn route(&self) -> &'static str {
        match self {
            Self::Hub => "hub",
            Self::Direct => "direct",
        }
    }
}

/// Fee model a payee advertises for its hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeModel {
    /// Flat fee.
    pub base: TokenAmount,
    /// Variable rate in basis points.
    pub bps: u32,
}

/// Extension payload of a hub-mediated offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubExtension {
    /// Human name of the hub (e.g. `pay.eth`).
    pub hub_name: String,
    /// Base URL of the hub HTTP API.
    pub hub_endpoint: String,
    /// Hub mode, `proxy_hold`.
    pub mode: String,
    /// Advertised fee model.
    pub fee_model: FeeModel,
    /// Offer expiry.
    pub quote_expiry: UnixTimestamp,
    /// Invoice minted for this offer.
    pub invoice_id: String,
    /// Address the hub should credit.
    pub payee_address: Address,
}

/// Extension payload of a direct offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectExtension {
    /// Always `direct`.
    pub mode: String,
    /// Offer expiry.
    pub quote_expiry: UnixTimestamp,
    /// Invoice minted for this offer.
    pub invoice_id: String,
    /// Payee address, participant B of the direct channel.
    pub payee_address: Address,
}

/// Scheme-keyed offer extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferExtensions {
    /// Present on hub offers.
    #[serde(
        rename = "statechannel-hub-v1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hub: Option<HubExtension>,
    /// Present on direct offers.
    #[serde(
        rename = "statechannel-direct-v1",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub direct: Option<DirectExtension>,
}

/// One entry of a `402` offer's `accepts` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    /// Payment scheme.
    pub scheme: Scheme,
    /// CAIP-2 network, e.g. `eip155:8453`.
    pub network: String,
    /// Payment asset.
    pub asset: Address,
    /// Price in base units.
    pub max_amount_required: TokenAmount,
    /// Hub name for hub offers, payee address for direct offers.
    pub pay_to: String,
    /// Absolute URL of the protected resource.
    pub resource: String,
    /// Scheme-specific data.
    #[serde(default)]
    pub extensions: OfferExtensions,
}

/// Body of a `402 Payment Required` response.
///
/// Offers this crate cannot parse (other schemes, non-EVM assets) are
/// skipped rather than failing the whole body.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequired {
    /// Acceptable payment offers, in the payee's preference order.
    #[serde_as(as = "VecSkipError<_>")]
    pub accepts: Vec<Offer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_schemes_are_skipped() {
        let body = serde_json::json!({
            "accepts": [
                {
                    "scheme": "exact",
                    "network": "eip155:8453",
                    "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                    "maxAmountRequired": "1000000",
                    "payTo": "0x0000000000000000000000000000000000000001",
                    "resource": "http://127.0.0.1:4042/v1/data"
                },
                {
                    "scheme": "statechannel-direct-v1",
                    "network": "eip155:8453",
                    "asset": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                    "maxAmountRequired": "1000000",
                    "payTo": "0x0000000000000000000000000000000000000002",
                    "resource": "http://127.0.0.1:4042/v1/data",
                    "extensions": {
                        "statechannel-direct-v1": {
                            "mode": "direct",
                            "quoteExpiry": 1_700_000_120u64,
                            "invoiceId": "inv_01",
                            "payeeAddress": "0x0000000000000000000000000000000000000002"
                        }
                    }
                }
            ]
        });
        let required: PaymentRequired = serde_json::from_value(body).unwrap();
        assert_eq!(required.accepts.len(), 1);
        let offer = &required.accepts[0];
        assert_eq!(offer.scheme, Scheme::Direct);
        assert_eq!(
            offer.extensions.direct.as_ref().unwrap().invoice_id,
            "inv_01"
        );
    }
}
