use alloy_primitives::Address;
use scp::UnixTimestamp;
use scp::proto::{Ticket, TokenAmount};
use scp_evm::signing::recover_ticket_signer;

use crate::headers::decode_header_value;

/// What a third-party payee expects of a ticket. Unset fields are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyExpectation {
    /// Trusted hub signer.
    pub hub: Option<Address>,
    /// The payee's own address.
    pub payee: Option<Address>,
    /// Price of the resource.
    pub amount: Option<TokenAmount>,
}

/// A ticket that passed [`verify_payment_header`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPayment {
    /// Address the ticket recovered to.
    pub signer: Address,
    /// The ticket.
    pub ticket: Ticket,
    /// Outer payment id, when present.
    pub payment_id: Option<String>,
}

/// Why [`verify_payment_header`] refused a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// No header value.
    #[error("missing header")]
    MissingHeader,
    /// Not JSON (raw or Base64).
    #[error("bad json")]
    BadJson,
    /// No parsable `ticket`.
    #[error("no ticket")]
    NoTicket,
    /// The ticket signature does not recover.
    #[error("bad sig")]
    BadSignature,
    /// Signed by a hub other than the expected one.
    #[error("unknown hub")]
    UnknownHub(Address),
    /// Credits another payee.
    #[error("wrong payee")]
    WrongPayee(Address),
    /// Amount differs from the price.
    #[error("wrong amount")]
    WrongAmount(Address),
    /// Past its expiry.
    #[error("expired")]
    Expired(Address),
}

/// Verifies a `PAYMENT-SIGNATURE` header carrying a hub ticket in one call.
///
/// This only checks the ticket itself. It does not consult the hub or track
/// replays; payees that need those guarantees use the payee router.
///
/// # Errors
///
/// Returns the first [`VerifyError`] found.
pub fn verify_payment_header(
    header: Option<&str>,
    expect: &VerifyExpectation,
) -> Result<VerifiedPayment, VerifyError> {
    let header = header
        .filter(|h| !h.trim().is_empty())
        .ok_or(VerifyError::MissingHeader)?;
    let mut value = decode_header_value(header).map_err(|_| VerifyError::BadJson)?;
    let payment_id = value
        .get("paymentId")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned);
    let ticket: Ticket = value
        .get_mut("ticket")
        .map(serde_json::Value::take)
        .and_then(|t| serde_json::from_value(t).ok())
        .ok_or(VerifyError::NoTicket)?;

    let signer = recover_ticket_signer(&ticket).map_err(|_| VerifyError::BadSignature)?;
    if expect.hub.is_some_and(|hub| hub != signer) {
        return Err(VerifyError::UnknownHub(signer));
    }
    if expect.payee.is_some_and(|payee| payee != ticket.draft.payee) {
        return Err(VerifyError::WrongPayee(signer));
    }
    if expect.amount.is_some_and(|amount| amount != ticket.draft.amount) {
        return Err(VerifyError::WrongAmount(signer));
    }
    if ticket.draft.expiry.is_past(UnixTimestamp::now()) {
        return Err(VerifyError::Expired(signer));
    }
    Ok(VerifiedPayment {
        signer,
        ticket,
        payment_id,
    })
}
