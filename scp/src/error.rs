//! Machine-readable error codes shared by the hub, payee and agent.
//!
//! Every hub error response carries an [`ErrorBody`]:
//!
//! ```json
//! { "errorCode": "SCP_003_FEE_EXCEEDS_MAX", "message": "fee > maxFee", "retryable": false }
//! ```
//!
//! Policy, authentication and consistency failures are terminal. Only
//! settlement availability/execution failures and unexpected internal errors
//! are marked retryable, so a caller may safely repeat the identical request.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Protocol error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A signature did not recover, or recovered to the wrong signer.
    #[serde(rename = "SCP_001_INVALID_SIGNATURE")]
    InvalidSignature,
    /// The quote is missing, pruned or past its expiry.
    #[serde(rename = "SCP_002_QUOTE_EXPIRED")]
    QuoteExpired,
    /// The computed fee is above the caller's `maxFee`.
    #[serde(rename = "SCP_003_FEE_EXCEEDS_MAX")]
    FeeExceedsMax,
    /// A channel state did not advance the recorded nonce.
    #[serde(rename = "SCP_004_STALE_NONCE")]
    StaleNonce,
    /// A channel state does not conserve balances or under-credits the payee.
    #[serde(rename = "SCP_005_BALANCE_MISMATCH")]
    BalanceMismatch,
    /// The payment id has already been issued.
    #[serde(rename = "SCP_006_PAYMENT_CONSUMED")]
    PaymentConsumed,
    /// Unknown channel, payment or payee channel.
    #[serde(rename = "SCP_007_CHANNEL_NOT_FOUND")]
    ChannelNotFound,
    /// Malformed request or violated hub policy.
    #[serde(rename = "SCP_009_POLICY_VIOLATION")]
    PolicyViolation,
    /// No chain provider or contract is configured.
    #[serde(rename = "SCP_010_SETTLEMENT_UNAVAILABLE")]
    SettlementUnavailable,
    /// An on-chain call reverted or timed out.
    #[serde(rename = "SCP_011_SETTLEMENT_FAILED")]
    SettlementFailed,
    /// Unexpected internal failure caught at the request boundary.
    #[serde(rename = "SCP_012_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// Returns the wire representation, e.g. `SCP_002_QUOTE_EXPIRED`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "SCP_001_INVALID_SIGNATURE",
            Self::QuoteExpired => "SCP_002_QUOTE_EXPIRED",
            Self::FeeExceedsMax => "SCP_003_FEE_EXCEEDS_MAX",
            Self::StaleNonce => "SCP_004_STALE_NONCE",
            Self::BalanceMismatch => "SCP_005_BALANCE_MISMATCH",
            Self::PaymentConsumed => "SCP_006_PAYMENT_CONSUMED",
            Self::ChannelNotFound => "SCP_007_CHANNEL_NOT_FOUND",
            Self::PolicyViolation => "SCP_009_POLICY_VIOLATION",
            Self::SettlementUnavailable => "SCP_010_SETTLEMENT_UNAVAILABLE",
            Self::SettlementFailed => "SCP_011_SETTLEMENT_FAILED",
            Self::Internal => "SCP_012_INTERNAL",
        }
    }

    /// Default HTTP status for this code.
    ///
    /// The hub overrides it in one place: a channel mismatch on issue is a
    /// policy violation reported as `409`.
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::InvalidSignature => 401,
            Self::QuoteExpired
            | Self::StaleNonce
            | Self::BalanceMismatch
            | Self::PaymentConsumed => 409,
            Self::FeeExceedsMax | Self::PolicyViolation => 400,
            Self::ChannelNotFound => 404,
            Self::SettlementUnavailable => 503,
            Self::SettlementFailed | Self::Internal => 500,
        }
    }

    /// Whether a caller may repeat the identical request.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SettlementUnavailable | Self::SettlementFailed | Self::Internal
        )
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON error body returned by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Machine-readable code.
    pub error_code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// Whether the identical request may be retried.
    pub retryable: bool,
}

impl ErrorBody {
    /// Builds a body using the code's default retryability.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code,
            message: message.into(),
            retryable: code.is_retryable(),
        }
    }
}

impl Display for ErrorBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_wire_format() {
        let body = ErrorBody::new(ErrorCode::FeeExceedsMax, "fee > maxFee");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "errorCode": "SCP_003_FEE_EXCEEDS_MAX",
                "message": "fee > maxFee",
                "retryable": false
            })
        );
    }

    #[test]
    fn test_only_settlement_and_internal_are_retryable() {
        assert!(ErrorCode::SettlementUnavailable.is_retryable());
        assert!(ErrorCode::SettlementFailed.is_retryable());
        assert!(ErrorCode::Internal.is_retryable());
        assert!(!ErrorCode::QuoteExpired.is_retryable());
        assert!(!ErrorCode::InvalidSignature.is_retryable());
        assert_eq!(ErrorCode::SettlementUnavailable.status(), 503);
    }

    #[test]
    fn test_as_str_matches_serde() {
        let code = ErrorCode::PaymentConsumed;
        let json = serde_json::to_string(&code).unwrap();
        assert_eq!(json, format!("\"{}\"", code.as_str()));
    }
}
