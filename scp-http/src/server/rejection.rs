use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use scp::proto::{PayloadError, PaymentRejected};

/// Why a payee refused a payment.
///
/// `Display` is the exact reason string returned to the payer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PaymentRejection {
    /// The payload could not be parsed for its scheme.
    #[error("{0}")]
    Payload(#[from] PayloadError),
    /// The ticket signature does not recover.
    #[error("invalid ticket signature")]
    InvalidTicketSignature,
    /// The hub discovery document could not be fetched.
    #[error("hub metadata unavailable")]
    HubMetadataUnavailable,
    /// The ticket was signed by someone other than the hub.
    #[error("ticket signer mismatch")]
    TicketSignerMismatch,
    /// The ticket credits a different payee.
    #[error("ticket payee mismatch")]
    TicketPayeeMismatch,
    /// The ticket is past its expiry.
    #[error("ticket expired")]
    TicketExpired,
    /// The ticket answers a different invoice.
    #[error("invoice mismatch")]
    InvoiceMismatch,
    /// The ticket carries a different payment id.
    #[error("payment id mismatch")]
    PaymentIdMismatch,
    /// The invoice was never minted by this payee.
    #[error("unknown invoice")]
    UnknownInvoice,
    /// The paid amount differs from the invoice.
    #[error("amount mismatch")]
    AmountMismatch,
    /// The paid asset differs from the invoice.
    #[error("asset mismatch")]
    AssetMismatch,
    /// The hub does not know the payment.
    #[error("hub payment unknown")]
    HubPaymentUnknown,
    /// The hub knows the payment but has not issued it.
    #[error("hub payment not issued")]
    HubPaymentNotIssued,
    /// The hub issued a different ticket for the payment.
    #[error("ticket id mismatch at hub")]
    HubTicketMismatch,
    /// The direct payment names another payee.
    #[error("direct payee mismatch")]
    DirectPayeeMismatch,
    /// Inner and outer invoice or payment ids differ.
    #[error("direct id mismatch")]
    DirectIdMismatch,
    /// The direct payment is past its expiry.
    #[error("direct payment expired")]
    DirectPaymentExpired,
    /// The channel state was not signed by the claimed payer.
    #[error("payer signature mismatch")]
    PayerSignatureMismatch,
    /// The channel state does not advance the nonce seen last.
    #[error("stale direct nonce")]
    StaleDirectNonce,
    /// The channel state credits less than the amount.
    #[error("insufficient direct delta")]
    InsufficientDirectDelta,
    /// The channel state is past its expiry.
    #[error("state expired")]
    StateExpired,
}

impl IntoResponse for PaymentRejection {
    fn into_response(self) -> Response {
        let body = PaymentRejected {
            error: self.to_string(),
            retryable: false,
        };
        (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response()
    }
}
