use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use super::{ChannelAck, ChannelState, HubChannelAck, TokenAmount};
use crate::timestamp::UnixTimestamp;

/// Every field of a ticket except the hub signature.
///
/// Built once from a quote and never edited; the field order here is the
/// order in which the draft is ABI-encoded for signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketDraft {
    /// Hub-assigned identifier (`tkt_…`).
    pub ticket_id: String,
    /// Hub signer address.
    pub hub: Address,
    /// Payee credited by the ticket.
    pub payee: Address,
    /// Invoice the payment answers.
    pub invoice_id: String,
    /// Globally unique payment id.
    pub payment_id: String,
    /// Payment asset; zero for the native coin.
    pub asset: Address,
    /// Amount credited to the payee.
    pub amount: TokenAmount,
    /// Hub fee.
    pub fee_charged: TokenAmount,
    /// `amount + feeCharged`, debited from the payer channel.
    pub total_debit: TokenAmount,
    /// Ticket expiry.
    pub expiry: UnixTimestamp,
    /// Binds the ticket to `(channelId, chainId, memo)`.
    pub policy_hash: B256,
}

/// A hub-signed ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// The signed fields.
    #[serde(flatten)]
    pub draft: TicketDraft,
    /// Hub signature over the draft digest.
    pub sig: Bytes,
}

/// Split of a hub fee into its components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeBreakdown {
    /// Flat fee.
    pub base: TokenAmount,
    /// Variable rate in basis points.
    pub bps: u32,
    /// `floor(amount * bps / 10000)`.
    pub variable: TokenAmount,
    /// Flat gas surcharge.
    pub gas_surcharge: TokenAmount,
}

/// A hub quote. Consumed exactly once by issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    /// Invoice the quote answers.
    pub invoice_id: String,
    /// Payment id the quote reserves.
    pub payment_id: String,
    /// The unsigned ticket issue will sign.
    pub ticket_draft: TicketDraft,
    /// Total fee.
    pub fee: TokenAmount,
    /// `amount + fee`.
    pub total_debit: TokenAmount,
    /// Effective expiry, never more than 120 s ahead of the quote time.
    pub expiry: UnixTimestamp,
    /// How the fee was computed.
    pub fee_breakdown: FeeBreakdown,
}

impl Quote {
    /// Store key of a quote: `invoiceId:paymentId`.
    #[must_use]
    pub fn key(&self) -> String {
        quote_key(&self.invoice_id, &self.payment_id)
    }
}

/// Builds the store key of a quote.
#[must_use]
pub fn quote_key(invoice_id: &str, payment_id: &str) -> String {
    format!("{invoice_id}:{payment_id}")
}

/// `POST /v1/tickets/quote` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    /// Payee invoice.
    pub invoice_id: String,
    /// Caller-chosen unique payment id.
    pub payment_id: String,
    /// Payer channel that will be debited.
    pub channel_id: B256,
    /// Payee to credit.
    pub payee: Address,
    /// Payment asset.
    pub asset: Address,
    /// Amount to credit.
    pub amount: TokenAmount,
    /// Highest acceptable fee.
    pub max_fee: TokenAmount,
    /// Requested quote expiry; must be in the future.
    pub quote_expiry: UnixTimestamp,
    /// Request binding carried into the channel state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_hash: Option<B256>,
    /// Free-form memo folded into the policy hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_memo: Option<String>,
}

/// `POST /v1/tickets/issue` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueRequest {
    /// The quote being redeemed. Only its key is trusted.
    pub quote: Quote,
    /// The payer's new channel state.
    pub channel_state: ChannelState,
    /// Payer signature over `channel_state`.
    pub sig_a: Bytes,
}

/// `POST /v1/tickets/issue` response: the ticket plus acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueResponse {
    /// The signed ticket, flattened into the response object.
    #[serde(flatten)]
    pub ticket: Ticket,
    /// Hub countersignature of the payer state.
    pub channel_ack: ChannelAck,
    /// Present when the payee's shadow channel advanced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_channel_ack: Option<HubChannelAck>,
}
