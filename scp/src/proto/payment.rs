use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use super::{ChannelState, DIRECT_SCHEME, HUB_SCHEME, Ticket, TokenAmount};
use crate::timestamp::UnixTimestamp;

/// Proof of the payer state a hub ticket was issued against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelProof {
    /// Payer channel.
    pub channel_id: B256,
    /// Nonce of the signed state.
    pub state_nonce: u64,
    /// Digest of the signed state.
    pub state_hash: B256,
    /// Payer signature.
    pub sig_a: Bytes,
}

/// Hub-mediated payment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubPayment {
    /// Payment id, must match the ticket.
    pub payment_id: String,
    /// Invoice id, must match the ticket.
    pub invoice_id: String,
    /// Hub-signed ticket.
    pub ticket: Ticket,
    /// Optional proof of the underlying payer state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_proof: Option<ChannelProof>,
}

/// Body of a direct payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPaymentBody {
    /// Claimed payer, participant A.
    pub payer: Address,
    /// Payee, participant B.
    pub payee: Address,
    /// Payment asset.
    pub asset: Address,
    /// Amount credited by this state.
    pub amount: TokenAmount,
    /// Payment expiry.
    pub expiry: UnixTimestamp,
    /// Must equal the outer invoice id.
    pub invoice_id: String,
    /// Must equal the outer payment id.
    pub payment_id: String,
    /// New channel state crediting the payee.
    pub channel_state: ChannelState,
    /// Payer signature over `channel_state`.
    pub sig_a: Bytes,
}

/// Direct payment payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectPayment {
    /// Payment id.
    pub payment_id: String,
    /// Invoice id.
    pub invoice_id: String,
    /// Signed state and claims.
    pub direct: DirectPaymentBody,
}

/// Payload carried by the `PAYMENT-SIGNATURE` header, tagged by `scheme`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme")]
pub enum PaymentPayload {
    /// `statechannel-hub-v1`
    #[serde(rename = "statechannel-hub-v1")]
    Hub(HubPayment),
    /// `statechannel-direct-v1`
    #[serde(rename = "statechannel-direct-v1")]
    Direct(DirectPayment),
}

/// Why a payment payload could not be parsed.
///
/// The `Display` strings are the rejection reasons a payee reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Unknown or missing `scheme`.
    #[error("wrong scheme")]
    WrongScheme,
    /// Hub payload lacks required fields or has malformed ones.
    #[error("missing payment fields")]
    MissingHubFields,
    /// Direct payload lacks required fields or has malformed ones.
    #[error("missing direct payment fields")]
    MissingDirectFields,
}

impl PaymentPayload {
    /// Parses a payload, reading `scheme` first so an unknown scheme is
    /// reported as such rather than as a field error.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] naming the first problem found.
    pub fn parse(value: serde_json::Value) -> Result<Self, PayloadError> {
        match value.get("scheme").and_then(serde_json::Value::as_str) {
            Some(HUB_SCHEME) => serde_json::from_value(value)
                .map(Self::Hub)
                .map_err(|_| PayloadError::MissingHubFields),
            Some(DIRECT_SCHEME) => serde_json::from_value(value)
                .map(Self::Direct)
                .map_err(|_| PayloadError::MissingDirectFields),
            _ => Err(PayloadError::WrongScheme),
        }
    }

    /// Payment id of either variant.
    #[must_use]
    pub fn payment_id(&self) -> &str {
        match self {
            Self::Hub(p) => &p.payment_id,
            Self::Direct(p) => &p.payment_id,
        }
    }

    /// Invoice id of either variant.
    #[must_use]
    pub fn invoice_id(&self) -> &str {
        match self {
            Self::Hub(p) => &p.invoice_id,
            Self::Direct(p) => &p.invoice_id,
        }
    }
}

/// Receipt returned by a payee for an accepted payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// Payment id.
    pub payment_id: String,
    /// Payee-assigned receipt id (`rcpt_…`).
    pub receipt_id: String,
    /// Acceptance time.
    pub accepted_at: UnixTimestamp,
    /// Ticket id of a hub payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// Channel of a direct payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_channel_id: Option<B256>,
}

/// Resource payload delivered with a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceData {
    /// The protected value.
    pub value: String,
    /// Payee that served it.
    pub payee: Address,
}

/// `200` body of a paid request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaidResource {
    /// Always `true`.
    pub ok: bool,
    /// The resource.
    pub data: ResourceData,
    /// Proof of acceptance.
    pub receipt: Receipt,
}

/// `402` body of a rejected payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRejected {
    /// Rejection reason.
    pub error: String,
    /// Always `false`: the same payload will be rejected again.
    pub retryable: bool,
}

/// Hub-side payment state machine: `quoted → issued → settled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// A quote exists; no ticket yet.
    Quoted,
    /// A ticket was signed and the payer state countersigned.
    Issued,
    /// Included in an on-chain payout to the payee.
    Settled,
}

/// `payments[paymentId]` record kept by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    /// Payment id.
    pub payment_id: String,
    /// Current state.
    pub status: PaymentStatus,
    /// Ticket id once issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// Payer nonce the ticket was issued against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_nonce: Option<u64>,
}

/// Status of a payee ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// Earned, not yet paid out.
    Issued,
    /// Paid out on-chain.
    Settled,
}

/// One entry of a payee's append-only ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Global, monotonically increasing sequence number.
    pub seq: u64,
    /// Time the ticket was issued.
    pub created_at: UnixTimestamp,
    /// Payment id.
    pub payment_id: String,
    /// Invoice id.
    pub invoice_id: String,
    /// Ticket id.
    pub ticket_id: String,
    /// Amount credited to the payee.
    pub amount: TokenAmount,
    /// Asset of the payment.
    pub asset: Address,
    /// Settlement status.
    pub status: LedgerStatus,
    /// Payout transaction once settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle_tx: Option<B256>,
    /// Payout time once settled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<UnixTimestamp>,
}
