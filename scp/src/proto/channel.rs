use alloy_primitives::{Address, B256, Bytes};
use serde::{Deserialize, Serialize};

use super::TokenAmount;
use crate::timestamp::UnixTimestamp;

/// A signed channel state.
///
/// The two participant addresses are implied by `channelId`. Balances move
/// only by producing a new state with a strictly higher `stateNonce`; the sum
/// `balA + balB` stays constant between deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelState {
    /// Channel identifier, derived at open time and never reused.
    pub channel_id: B256,
    /// Strictly increasing per channel.
    pub state_nonce: u64,
    /// Balance of participant A (the payer).
    pub bal_a: TokenAmount,
    /// Balance of participant B (the hub or payee).
    pub bal_b: TokenAmount,
    /// Root of pending conditional locks; zero when there are none.
    #[serde(default)]
    pub locks_root: B256,
    /// Absolute time after which the state may no longer be used cooperatively.
    pub state_expiry: UnixTimestamp,
    /// Binds the state to the request that produced it.
    #[serde(default)]
    pub context_hash: B256,
}

impl ChannelState {
    /// Returns `balA + balB`, or `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<TokenAmount> {
        self.bal_a.checked_add(self.bal_b)
    }
}

/// Lifecycle status of a channel as seen by one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Accepting new states.
    #[default]
    Open,
    /// A unilateral close is in its challenge window.
    Closing,
    /// Paid out.
    Closed,
}

/// Hub countersignature over a payer's proposed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAck {
    /// Nonce of the countersigned state.
    pub state_nonce: u64,
    /// Digest that was signed.
    pub state_hash: B256,
    /// Hub signature (participant B).
    pub sig_b: Bytes,
}

/// Hub signature over the advanced Hub↔Payee shadow channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubChannelAck {
    /// Shadow channel id.
    pub channel_id: B256,
    /// New shadow channel nonce.
    pub state_nonce: u64,
    /// Payee balance after the credit.
    pub bal_b: TokenAmount,
    /// Hub signature (participant A of the shadow channel).
    pub sig_a: Bytes,
}

/// The hub's record of the last payer state it countersigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    /// Channel identifier.
    pub channel_id: B256,
    /// Highest countersigned nonce, `0` when none.
    pub latest_nonce: u64,
    /// Local view of the lifecycle.
    pub status: ChannelStatus,
    /// Last countersigned state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_state: Option<ChannelState>,
    /// Payer signature over `latest_state`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_a: Option<Bytes>,
    /// Hub signature over `latest_state`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig_b: Option<Bytes>,
    /// Address that signed the first accepted state; later states must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

impl ChannelRecord {
    /// Placeholder returned for channels the hub has never seen.
    #[must_use]
    pub const fn unseen(channel_id: B256) -> Self {
        Self {
            channel_id,
            latest_nonce: 0,
            status: ChannelStatus::Open,
            latest_state: None,
            sig_a: None,
            sig_b: None,
            payer: None,
        }
    }
}

/// Hub↔Payee shadow channel used to aggregate payee earnings between payouts.
///
/// The hub is participant A and the payee participant B.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubChannel {
    /// On-chain channel id.
    pub channel_id: B256,
    /// Payee address.
    pub payee: Address,
    /// Channel asset; zero for the native coin.
    pub asset: Address,
    /// Amount the hub deposited.
    pub total_deposit: TokenAmount,
    /// Hub's remaining collateral.
    pub bal_a: TokenAmount,
    /// Payee's credited earnings.
    pub bal_b: TokenAmount,
    /// Shadow channel nonce.
    pub nonce: u64,
    /// Last hub-signed shadow state.
    pub latest_state: Option<ChannelState>,
    /// Hub signature over `latest_state`.
    pub sig_a: Option<Bytes>,
    /// Opening transaction, absent for registered channels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_wire_shape() {
        let json = serde_json::json!({
            "channelId": format!("0x{}", "11".repeat(32)),
            "stateNonce": 3,
            "balA": "99996990",
            "balB": "3010",
            "locksRoot": format!("0x{}", "00".repeat(32)),
            "stateExpiry": 1_700_000_120u64,
            "contextHash": format!("0x{}", "22".repeat(32))
        });
        let state: ChannelState = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(state.state_nonce, 3);
        assert_eq!(state.total(), Some(TokenAmount::from(100_000_000u64)));
        assert_eq!(serde_json::to_value(&state).unwrap(), json);
    }

    #[test]
    fn test_unseen_channel_record_omits_state() {
        let record = ChannelRecord::unseen(B256::repeat_byte(0xab));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["latestNonce"], 0);
        assert_eq!(json["status"], "open");
        assert!(json.get("latestState").is_none());
    }
}
