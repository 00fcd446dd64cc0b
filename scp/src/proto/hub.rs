use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use super::{ChannelState, HubChannel, LedgerEntry, TokenAmount};
use crate::timestamp::UnixTimestamp;

/// Signature metadata published by a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    /// Always `eth_sign` (EIP-191 personal message).
    pub format: String,
    /// Key identifier.
    pub key_id: String,
    /// Signer address.
    pub public_key: Address,
}

/// Fee policy as published by a hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeePolicyInfo {
    /// Flat fee.
    pub base: TokenAmount,
    /// Variable rate in basis points.
    pub bps: u32,
    /// Flat gas surcharge.
    pub gas_surcharge: TokenAmount,
}

/// `GET /.well-known/x402` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubInfo {
    /// Human name (e.g. `pay.eth`).
    pub hub_name: String,
    /// Hub signer address; tickets must recover to it.
    pub address: Address,
    /// EIP-155 chain id bound into every policy hash.
    pub chain_id: u64,
    /// Supported schemes.
    pub schemes: Vec<String>,
    /// Assets the hub will quote.
    pub supported_assets: Vec<Address>,
    /// Supported hub modes.
    pub modes: Vec<String>,
    /// Signature metadata.
    pub signature: SignatureInfo,
    /// Fee policy.
    pub fee_policy: FeePolicyInfo,
}

/// `GET /v1/payee/inbox` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxPage {
    /// Lower-case payee address.
    pub payee: String,
    /// Exclusive lower bound that was requested.
    pub since: u64,
    /// Number of items returned.
    pub count: usize,
    /// Last returned `seq`, or `since` when nothing is new.
    pub next_cursor: u64,
    /// Ledger entries with `seq > since`.
    pub items: Vec<LedgerEntry>,
}

/// `GET /v1/payee/balance` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeBalance {
    /// Lower-case payee address.
    pub payee: String,
    /// Sum of all ledger amounts.
    pub earned: TokenAmount,
    /// Sum of settled ledger amounts.
    pub settled: TokenAmount,
    /// `earned - settled`.
    pub unsettled: TokenAmount,
    /// Number of ledger entries.
    pub payments: usize,
}

/// One payment in an agent summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryItem {
    /// Payment id.
    pub payment_id: String,
    /// Amount paid to the payee.
    pub amount: TokenAmount,
    /// Fee charged.
    pub fee: TokenAmount,
    /// Payee.
    pub payee: Address,
    /// Ticket id.
    pub ticket_id: Option<String>,
}

/// `GET /v1/agent/summary` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// Payer channel.
    pub channel_id: B256,
    /// Highest countersigned nonce.
    pub latest_nonce: u64,
    /// Number of issued payments.
    pub payments: usize,
    /// Sum of amounts.
    pub total_spent: TokenAmount,
    /// Sum of fees.
    pub total_fees: TokenAmount,
    /// `totalSpent + totalFees`.
    pub total_debit: TokenAmount,
    /// Per-payment detail.
    pub items: Vec<SummaryItem>,
}

/// `POST /v1/refunds` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Ticket to refund.
    pub ticket_id: String,
    /// Requested amount, informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<TokenAmount>,
    /// Free-form reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `POST /v1/refunds` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    /// Refunded ticket.
    pub ticket_id: String,
    /// Settlement nonce assigned to the refund.
    pub state_nonce: u64,
    /// Receipt id (`rfd_…`).
    pub receipt_id: String,
}

/// `POST /v1/hub/open-payee-channel` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayeeChannelRequest {
    /// Payee, participant B.
    pub payee: Address,
    /// Asset; defaults to the native coin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Address>,
    /// Hub deposit; defaults to zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit: Option<TokenAmount>,
    /// Challenge period; defaults to 300 s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_period_sec: Option<u64>,
    /// Channel expiry; defaults to one day ahead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_expiry: Option<UnixTimestamp>,
}

/// `POST /v1/hub/register-payee-channel` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayeeChannelRequest {
    /// Payee, participant B.
    pub payee: Address,
    /// Channel opened elsewhere.
    pub channel_id: B256,
    /// Asset; defaults to the native coin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Address>,
    /// Hub deposit backing the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deposit: Option<TokenAmount>,
}

/// Response of the open and register endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeChannelResponse {
    /// Set when the channel already existed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The shadow channel.
    #[serde(flatten)]
    pub channel: HubChannel,
}

/// `GET /v1/payee/channel-state` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeChannelState {
    /// Shadow channel id.
    pub channel_id: B256,
    /// Payee.
    pub payee: Address,
    /// Asset.
    pub asset: Address,
    /// Hub deposit.
    pub total_deposit: TokenAmount,
    /// Hub remaining collateral.
    pub bal_a: TokenAmount,
    /// Payee credited earnings.
    pub bal_b: TokenAmount,
    /// Shadow nonce.
    pub nonce: u64,
    /// Last hub-signed state.
    pub latest_state: Option<ChannelState>,
    /// Hub signature over `latest_state`.
    pub sig_a: Option<alloy_primitives::Bytes>,
}

impl From<HubChannel> for PayeeChannelState {
    fn from(hc: HubChannel) -> Self {
        Self {
            channel_id: hc.channel_id,
            payee: hc.payee,
            asset: hc.asset,
            total_deposit: hc.total_deposit,
            bal_a: hc.bal_a,
            bal_b: hc.bal_b,
            nonce: hc.nonce,
            latest_state: hc.latest_state,
            sig_a: hc.sig_a,
        }
    }
}

/// `POST /v1/payee/settle` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Payee to pay out.
    pub payee: Address,
    /// Asset; defaults to the native coin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Address>,
}

/// `POST /v1/payee/settle` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleReceipt {
    /// Lower-case payee address.
    pub payee: String,
    /// Amount paid out, `"0"` when nothing was due.
    pub amount: TokenAmount,
    /// Asset paid out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Address>,
    /// Payout transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    /// Entries flipped to settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_count: Option<usize>,
    /// `nothing to settle` when the batch was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
