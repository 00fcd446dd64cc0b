//! Error types for the payment header codec.

use scp::proto::PayloadError;

/// Errors that can occur while encoding or decoding the payment header.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Base64 decoding failed.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The JSON is well-formed but is not a payment payload.
    #[error("{0}")]
    Payload(#[from] PayloadError),
}
