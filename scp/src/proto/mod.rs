//! Wire types for the state-channel payment protocol.
//!
//! All types serialize to JSON using camelCase field names. Token amounts are
//! decimal strings ([`TokenAmount`]), hashes and signatures are `0x` hex, and
//! timestamps are plain numbers.
//!
//! # Key Types
//!
//! - [`ChannelState`] - The signed seven-field channel state
//! - [`TicketDraft`] / [`Ticket`] - Hub-signed payment authorization
//! - [`Quote`] - Fee computation consumed exactly once by issue
//! - [`PaymentRequired`] / [`Offer`] - The `402` offer body
//! - [`PaymentPayload`] - The `PAYMENT-SIGNATURE` header payload, tagged per scheme

use alloy_primitives::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

mod channel;
mod hub;
mod offer;
mod payment;
mod ticket;

pub use channel::*;
pub use hub::*;
pub use offer::*;
pub use payment::*;
pub use ticket::*;

/// Scheme identifier of hub-mediated payments.
pub const HUB_SCHEME: &str = "statechannel-hub-v1";

/// Scheme identifier of direct channel payments.
pub const DIRECT_SCHEME: &str = "statechannel-direct-v1";

/// A token amount in base units that serializes as a decimal string.
///
/// `uint256` balances overflow every JSON number type, so amounts travel as
/// strings (`"1000000"`). Arithmetic is checked; callers decide how to report
/// an overflow or underflow.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TokenAmount(U256);

impl TokenAmount {
    /// The zero amount.
    pub const ZERO: Self = Self(U256::ZERO);

    /// Wraps a raw `U256`.
    #[must_use]
    pub const fn new(value: U256) -> Self {
        Self(value)
    }

    /// Returns the inner `U256` value.
    #[must_use]
    pub const fn inner(&self) -> U256 {
        self.0
    }

    /// Returns `true` for the zero amount.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition.
    #[must_use]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Checked subtraction.
    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    /// Saturating addition, for running totals in read-only reports.
    #[must_use]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }

    /// Saturating subtraction, for read-only reports.
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl FromStr for TokenAmount {
    type Err = alloy_primitives::ruint::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s.trim(), 10).map(Self)
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse::<Self>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_amount_is_decimal_string() {
        let amount = TokenAmount::from(1_000_000u64);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"1000000\"");
        let back: TokenAmount = serde_json::from_str("\"1000000\"").unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_token_amount_rejects_garbage() {
        assert!(serde_json::from_str::<TokenAmount>("\"12abc\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-1\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("12").is_err());
    }

    #[test]
    fn test_token_amount_checked_sub_underflows() {
        let a = TokenAmount::from(5u64);
        let b = TokenAmount::from(6u64);
        assert_eq!(a.checked_sub(b), None);
        assert_eq!(b.checked_sub(a), Some(TokenAmount::from(1u64)));
    }
}
