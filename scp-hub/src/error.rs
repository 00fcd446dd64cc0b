//! Error types for the hub service.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use scp::store::StoreError;
use scp::{ErrorBody, ErrorCode};
use scp_evm::SignatureError;

/// Errors returned by hub operations.
///
/// `Display` is the `message` of the [`ErrorBody`] sent to the caller.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Malformed request or violated hub policy.
    #[error("{0}")]
    Policy(String),

    /// The issue request names a channel other than the quoted one.
    #[error("channel mismatch")]
    ChannelMismatch,

    /// No route matched the request.
    #[error("route not found")]
    RouteNotFound,

    /// The fee is above the caller's `maxFee`.
    #[error("fee > maxFee")]
    FeeExceedsMax,

    /// The quote is missing, pruned or past its expiry.
    #[error("{0}")]
    QuoteExpired(&'static str),

    /// The payment id was already issued.
    #[error("{0}")]
    PaymentConsumed(&'static str),

    /// `sigA` did not recover, or recovered to someone else.
    #[error("{0}")]
    InvalidSignature(String),

    /// The channel state does not advance the recorded nonce.
    #[error("{0}")]
    StaleNonce(String),

    /// The channel state does not conserve balances or under-credits the hub.
    #[error("{0}")]
    BalanceMismatch(String),

    /// Unknown payment or payee channel.
    #[error("{0}")]
    NotFound(&'static str),

    /// No chain provider or contract is configured.
    #[error("{0}")]
    SettlementUnavailable(&'static str),

    /// An on-chain call failed.
    #[error("{0}")]
    SettlementFailed(String),

    /// The store could not be read or persisted.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The hub's own signer failed.
    #[error("{0}")]
    Signing(#[from] SignatureError),
}

impl HubError {
    /// Protocol code reported for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Policy(_) | Self::ChannelMismatch | Self::RouteNotFound => {
                ErrorCode::PolicyViolation
            }
            Self::FeeExceedsMax => ErrorCode::FeeExceedsMax,
            Self::QuoteExpired(_) => ErrorCode::QuoteExpired,
            Self::PaymentConsumed(_) => ErrorCode::PaymentConsumed,
            Self::InvalidSignature(_) => ErrorCode::InvalidSignature,
            Self::StaleNonce(_) => ErrorCode::StaleNonce,
            Self::BalanceMismatch(_) => ErrorCode::BalanceMismatch,
            Self::NotFound(_) => ErrorCode::ChannelNotFound,
            Self::SettlementUnavailable(_) => ErrorCode::SettlementUnavailable,
            Self::SettlementFailed(_) => ErrorCode::SettlementFailed,
            Self::Store(_) | Self::Signing(_) => ErrorCode::Internal,
        }
    }

    /// HTTP status, the code's default except for channel mismatch and
    /// unknown routes.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ChannelMismatch => StatusCode::CONFLICT,
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            other => StatusCode::from_u16(other.code().status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Wire body.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

impl From<JsonRejection> for HubError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Policy(rejection.body_text())
    }
}

impl From<QueryRejection> for HubError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Policy(rejection.body_text())
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = %self.code(), "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mismatch_is_policy_conflict() {
        let err = HubError::ChannelMismatch;
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), ErrorCode::PolicyViolation);
        assert!(!err.body().retryable);
    }

    #[test]
    fn test_statuses_follow_codes() {
        assert_eq!(HubError::FeeExceedsMax.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            HubError::QuoteExpired("quote expired").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            HubError::InvalidSignature("bad".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            HubError::NotFound("payment not found").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(HubError::RouteNotFound.status(), StatusCode::NOT_FOUND);
        let unavailable = HubError::SettlementUnavailable("no provider");
        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(unavailable.body().retryable);
    }

    #[test]
    fn test_body_message_is_display() {
        let body = HubError::PaymentConsumed("quote already consumed").body();
        assert_eq!(body.error_code, ErrorCode::PaymentConsumed);
        assert_eq!(body.message, "quote already consumed");
    }
}
