//! Payee side of the protocol.
//!
//! A payee answers unpaid requests with a `402` offer listing a hub route and
//! a direct route, then validates the `PAYMENT-SIGNATURE` header of the paid
//! retry. Each payment id is fulfilled at most once; replays receive the
//! cached body.
//!
//! - [`payee_router`] - Axum router serving the protected resource and `/pay`
//! - [`PayeeState`] - Invoices, fulfilled payments and direct-channel watermarks
//! - [`PaymentRejection`] - Every reason a payment is refused
//! - [`verify_payment_header`] - One-call ticket check for third-party payees

mod payee;
mod rejection;
mod validate;
mod verify;

pub use payee::{
    DirectWatermark, FULFILLED_RETENTION_SECS, Invoice, PayeeConfig, PayeeState, payee_router,
};
pub use rejection::PaymentRejection;
pub use verify::{VerifiedPayment, VerifyError, VerifyExpectation, verify_payment_header};
