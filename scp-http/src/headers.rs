//! Encoding and decoding of the `PAYMENT-SIGNATURE` header.
//!
//! Agents send the payload as raw JSON. Payees also accept the Base64-encoded
//! form that generic x402 clients emit, so both spellings decode to the same
//! [`PaymentPayload`].

use base64::prelude::*;
use scp::proto::PaymentPayload;

use crate::error::HttpError;

/// Encodes a payload as raw JSON for the `PAYMENT-SIGNATURE` header.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_signature(payload: &PaymentPayload) -> Result<String, HttpError> {
    Ok(serde_json::to_string(payload)?)
}

/// Encodes a payload as Base64 JSON.
///
/// # Errors
///
/// Returns [`HttpError::Serialize`] if JSON serialization fails.
pub fn encode_payment_signature_base64(payload: &PaymentPayload) -> Result<String, HttpError> {
    let json = serde_json::to_vec(payload)?;
    Ok(BASE64_STANDARD.encode(json))
}

/// Decodes a header value to JSON without interpreting it.
///
/// A value starting with `{` is read as raw JSON, anything else as Base64.
///
/// # Errors
///
/// Returns [`HttpError`] on Base64 or JSON decode failure.
pub fn decode_header_value(header_value: &str) -> Result<serde_json::Value, HttpError> {
    let trimmed = header_value.trim();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let bytes = BASE64_STANDARD.decode(trimmed)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Decodes a `PAYMENT-SIGNATURE` header value into a [`PaymentPayload`].
///
/// # Errors
///
/// Returns [`HttpError`] on decode failure, or [`HttpError::Payload`] when the
/// JSON names an unknown scheme or lacks required fields.
pub fn decode_payment_payload(header_value: &str) -> Result<PaymentPayload, HttpError> {
    let value = decode_header_value(header_value)?;
    Ok(PaymentPayload::parse(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, B256, Bytes};
    use scp::UnixTimestamp;
    use scp::proto::{ChannelState, DirectPayment, DirectPaymentBody, PayloadError, TokenAmount};

    fn payload() -> PaymentPayload {
        PaymentPayload::Direct(DirectPayment {
            payment_id: "pay_1".into(),
            invoice_id: "inv_1".into(),
            direct: DirectPaymentBody {
                payer: Address::repeat_byte(0x0a),
                payee: Address::repeat_byte(0x0b),
                asset: Address::ZERO,
                amount: TokenAmount::from(1_000u64),
                expiry: UnixTimestamp::from_secs(1_700_000_120),
                invoice_id: "inv_1".into(),
                payment_id: "pay_1".into(),
                channel_state: ChannelState {
                    channel_id: B256::repeat_byte(0x01),
                    state_nonce: 1,
                    bal_a: TokenAmount::from(9_000u64),
                    bal_b: TokenAmount::from(1_000u64),
                    locks_root: B256::ZERO,
                    state_expiry: UnixTimestamp::from_secs(1_700_000_120),
                    context_hash: B256::ZERO,
                },
                sig_a: Bytes::from_static(&[0x11; 65]),
            },
        })
    }

    #[test]
    fn test_raw_json_header() {
        let header = encode_payment_signature(&payload()).unwrap();
        assert!(header.starts_with('{'));
        assert!(header.contains("\"scheme\":\"statechannel-direct-v1\""));
        assert_eq!(decode_payment_payload(&header).unwrap(), payload());
    }

    #[test]
    fn test_base64_header_is_accepted() {
        let header = encode_payment_signature_base64(&payload()).unwrap();
        assert!(!header.starts_with('{'));
        assert_eq!(decode_payment_payload(&header).unwrap(), payload());
    }

    #[test]
    fn test_garbage_and_unknown_scheme() {
        assert!(matches!(
            decode_payment_payload("not base64 !!"),
            Err(HttpError::Base64(_))
        ));
        assert!(matches!(
            decode_payment_payload("{ nope"),
            Err(HttpError::Serialize(_))
        ));
        let err = decode_payment_payload(r#"{"scheme":"exact"}"#).unwrap_err();
        assert!(matches!(err, HttpError::Payload(PayloadError::WrongScheme)));
        assert_eq!(err.to_string(), "wrong scheme");
    }
}
