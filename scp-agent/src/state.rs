//! The agent's local view of its channels, payments and watch proofs.
//!
//! Everything lives in one JSON document, `agent-state.json`:
//!
//! ```json
//! {
//!   "sessions": {},
//!   "channels": { "hub:http://127.0.0.1:4021": { "channelId": "0x…", "nonce": 3, … } },
//!   "payments": { "pay_…": { "paidAt": 1700000000, "route": "hub", … } },
//!   "watch": { "byChannelId": { "0x…": { "role": "agent", "state": {…}, "sigA": "0x…", "sigB": "0x…" } } }
//! }
//! ```
//!
//! The `watch` section is what `scp-watch --role agent` reads to defend the
//! channels.

use alloy_primitives::{Address, B256, Bytes, keccak256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use scp::UnixTimestamp;
use scp::proto::{ChannelState, ChannelStatus, Receipt, TokenAmount};
use scp_evm::watch::Role;

use crate::error::AgentError;

/// File name of the state document inside the state directory.
pub const STATE_FILE_NAME: &str = "agent-state.json";

/// Seconds a proposed state stays usable for a cooperative close.
pub const STATE_TTL_SECS: u64 = 120;

/// Opening balance of a dev-mode virtual channel.
pub const VIRTUAL_CHANNEL_BALANCE: u64 = 100_000_000_000;

/// Key of the channel with the hub at `endpoint`.
#[must_use]
pub fn hub_key(endpoint: &str) -> String {
    format!("hub:{endpoint}")
}

/// Key of the direct channel with `payee`.
#[must_use]
pub fn direct_key(payee: Address) -> String {
    format!("direct:{}", payee.to_string().to_lowercase())
}

/// Key of a channel opened on-chain by this agent.
#[must_use]
pub fn onchain_key(channel_id: B256) -> String {
    format!("onchain:{channel_id}")
}

/// One channel as the payer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalChannel {
    /// Channel id.
    pub channel_id: B256,
    /// Nonce of the last proposed state.
    pub nonce: u64,
    /// Payer balance after the last proposal.
    pub bal_a: TokenAmount,
    /// Counterparty balance after the last proposal.
    pub bal_b: TokenAmount,
    /// Dev-mode channel with no on-chain deposit behind it.
    #[serde(default, rename = "virtual", skip_serializing_if = "std::ops::Not::not")]
    pub is_virtual: bool,
    /// Hub base URL or resource URL the channel pays through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Counterparty of an on-chain channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_b: Option<Address>,
    /// Asset of an on-chain channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Address>,
    /// Total deposited on-chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deposit: Option<TokenAmount>,
    /// Challenge window of an on-chain channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_period_sec: Option<u64>,
    /// Expiry of an on-chain channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_expiry: Option<UnixTimestamp>,
    /// Transaction that opened the channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<B256>,
    /// Set once a close was sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ChannelStatus>,
}

impl LocalChannel {
    /// A fresh channel with the whole balance on the payer side.
    #[must_use]
    pub const fn new(channel_id: B256, bal_a: TokenAmount) -> Self {
        Self {
            channel_id,
            nonce: 0,
            bal_a,
            bal_b: TokenAmount::ZERO,
            is_virtual: false,
            endpoint: None,
            participant_b: None,
            asset: None,
            total_deposit: None,
            challenge_period_sec: None,
            channel_expiry: None,
            tx_hash: None,
            status: None,
        }
    }

    /// The dev-mode channel for `key`, id `keccak256("<key>:<payer>")`.
    #[must_use]
    pub fn virtual_for(key: &str, payer: Address) -> Self {
        let id = keccak256(format!("{key}:{payer}"));
        Self {
            is_virtual: true,
            ..Self::new(id, TokenAmount::from(VIRTUAL_CHANNEL_BALANCE))
        }
    }
}

/// A payment the agent made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEntry {
    /// When the payment completed.
    pub paid_at: UnixTimestamp,
    /// `hub` or `direct`.
    pub route: String,
    /// Resource paid for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    /// Payee of an address payment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<Address>,
    /// Invoice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice_id: Option<String>,
    /// Hub ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// Amount credited to the payee.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<TokenAmount>,
    /// Receipt returned by the resource server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Receipt>,
}

/// Latest state of a channel together with the signatures held for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchProof {
    /// Always [`Role::Agent`] in this file.
    pub role: Role,
    /// The state.
    pub state: ChannelState,
    /// Agent signature.
    pub sig_a: Bytes,
    /// Counterparty signature, once acknowledged.
    #[serde(default)]
    pub sig_b: Option<Bytes>,
    /// Last update.
    pub updated_at: UnixTimestamp,
}

/// Proofs indexed by channel id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchState {
    /// One proof per channel.
    #[serde(default)]
    pub by_channel_id: BTreeMap<B256, WatchProof>,
}

/// The whole state document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    /// Reserved for per-endpoint session data.
    #[serde(default)]
    pub sessions: BTreeMap<String, serde_json::Value>,
    /// Channels by key (`hub:<endpoint>`, `direct:<payee>`, `onchain:<id>`).
    #[serde(default)]
    pub channels: BTreeMap<String, LocalChannel>,
    /// Payments by payment id.
    #[serde(default)]
    pub payments: BTreeMap<String, PaymentEntry>,
    /// Proofs for the dispute watcher.
    #[serde(default)]
    pub watch: WatchState,
}

impl AgentState {
    /// Channel and key for `channel_id`.
    #[must_use]
    pub fn channel_by_id(&self, channel_id: B256) -> Option<(&str, &LocalChannel)> {
        self.channels
            .iter()
            .find(|(_, ch)| ch.channel_id == channel_id)
            .map(|(key, ch)| (key.as_str(), ch))
    }

    /// Proposes the next state of the channel under `key`, moving `debit`
    /// from the payer to the counterparty.
    ///
    /// The nonce is taken even if the proposal is never acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InsufficientBalance`] when `debit > balA`; the
    /// channel is left untouched.
    pub fn next_channel_state(
        &mut self,
        key: &str,
        debit: TokenAmount,
        context_hash: B256,
        now: UnixTimestamp,
    ) -> Result<ChannelState, AgentError> {
        let channel = self
            .channels
            .get_mut(key)
            .ok_or_else(|| AgentError::NoChannel(format!("no channel under {key}")))?;
        let bal_a = channel
            .bal_a
            .checked_sub(debit)
            .ok_or(AgentError::InsufficientBalance {
                channel_id: channel.channel_id,
                need: debit,
                have: channel.bal_a,
            })?;
        let bal_b = channel.bal_b.checked_add(debit).ok_or(AgentError::Overflow)?;
        channel.nonce += 1;
        channel.bal_a = bal_a;
        channel.bal_b = bal_b;
        Ok(ChannelState {
            channel_id: channel.channel_id,
            state_nonce: channel.nonce,
            bal_a,
            bal_b,
            locks_root: B256::ZERO,
            state_expiry: now + STATE_TTL_SECS,
            context_hash,
        })
    }

    /// Records a proof for `state.channel_id` unless one with an equal or
    /// higher nonce is already held.
    ///
    /// Returns `true` if the proof was stored.
    pub fn record_proof(
        &mut self,
        state: ChannelState,
        sig_a: Bytes,
        sig_b: Option<Bytes>,
        now: UnixTimestamp,
    ) -> bool {
        let proof = WatchProof {
            role: Role::Agent,
            state,
            sig_a,
            sig_b,
            updated_at: now,
        };
        match self.watch.by_channel_id.entry(proof.state.channel_id) {
            Entry::Occupied(held) if held.get().state.state_nonce >= proof.state.state_nonce => {
                false
            }
            Entry::Occupied(mut held) => {
                held.insert(proof);
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(proof);
                true
            }
        }
    }
}

/// Where the state document is kept.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    /// `<dir>/agent-state.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(STATE_FILE_NAME),
        }
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document. A missing or unparsable file yields an empty state.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Io`] if the directory cannot be created or the
    /// file cannot be read.
    pub async fn load(&self) -> Result<AgentState, AgentError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %self.path.display(), error = %e, "agent state is corrupt, starting empty");
                AgentState::default()
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentState::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes the document to `<path>.tmp` and renames it into place.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] if encoding or any file operation fails.
    pub async fn save(&self, state: &AgentState) -> Result<(), AgentError> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scp_evm::watch::{FileProofSource, ProofSource};

    const NOW: UnixTimestamp = UnixTimestamp::from_secs(1_700_000_000);

    fn state_with(key: &str, bal_a: u64) -> AgentState {
        let mut state = AgentState::default();
        state.channels.insert(
            key.to_owned(),
            LocalChannel::new(B256::repeat_byte(0x11), TokenAmount::from(bal_a)),
        );
        state
    }

    #[test]
    fn test_next_state_moves_debit_and_bumps_nonce() {
        let mut state = state_with("hub:http://hub", 100_000_000);
        let ctx = B256::repeat_byte(0xcc);
        let next = state
            .next_channel_state("hub:http://hub", TokenAmount::from(1_003_010u64), ctx, NOW)
            .unwrap();
        assert_eq!(next.state_nonce, 1);
        assert_eq!(next.bal_a, TokenAmount::from(98_996_990u64));
        assert_eq!(next.bal_b, TokenAmount::from(1_003_010u64));
        assert_eq!(next.state_expiry, NOW + STATE_TTL_SECS);
        assert_eq!(next.context_hash, ctx);
        assert_eq!(next.locks_root, B256::ZERO);
        assert_eq!(state.channels["hub:http://hub"].nonce, 1);
    }

    #[test]
    fn test_insufficient_balance_leaves_channel_untouched() {
        let mut state = state_with("direct:0xabc", 10);
        let err = state
            .next_channel_state("direct:0xabc", TokenAmount::from(11u64), B256::ZERO, NOW)
            .unwrap_err();
        assert!(err.to_string().starts_with("Insufficient channel balance: need 11 but have 10"));
        let channel = &state.channels["direct:0xabc"];
        assert_eq!(channel.nonce, 0);
        assert_eq!(channel.bal_a, TokenAmount::from(10u64));
    }

    #[test]
    fn test_virtual_channel_id_is_stable() {
        let payer = Address::repeat_byte(0x0a);
        let a = LocalChannel::virtual_for("hub:http://127.0.0.1:4021", payer);
        let b = LocalChannel::virtual_for("hub:http://127.0.0.1:4021", payer);
        assert_eq!(a.channel_id, b.channel_id);
        assert_ne!(
            a.channel_id,
            LocalChannel::virtual_for("hub:http://other", payer).channel_id
        );
        assert!(a.is_virtual);
        assert_eq!(a.bal_a, TokenAmount::from(VIRTUAL_CHANNEL_BALANCE));
    }

    #[test]
    fn test_older_proof_never_replaces_newer() {
        let key = "hub:http://hub";
        let mut state = state_with(key, 100);
        let first = state
            .next_channel_state(key, TokenAmount::from(1u64), B256::ZERO, NOW)
            .unwrap();
        let second = state
            .next_channel_state(key, TokenAmount::from(1u64), B256::ZERO, NOW)
            .unwrap();
        let sig = |b: u8| Bytes::from(vec![b; 65]);

        assert!(state.record_proof(second.clone(), sig(2), Some(sig(3)), NOW));
        assert!(!state.record_proof(first, sig(1), Some(sig(1)), NOW + 1));
        assert!(!state.record_proof(second.clone(), sig(4), None, NOW + 2));

        let held = &state.watch.by_channel_id[&second.channel_id];
        assert_eq!(held.state.state_nonce, 2);
        assert_eq!(held.sig_b, Some(sig(3)));
        assert_eq!(held.updated_at, NOW);
    }

    #[test]
    fn test_keys() {
        let payee = Address::repeat_byte(0xAB);
        assert_eq!(direct_key(payee), format!("direct:0x{}", "ab".repeat(20)));
        assert_eq!(hub_key("http://h:1"), "hub:http://h:1");
        assert!(onchain_key(B256::ZERO).starts_with("onchain:0x000"));
    }

    #[tokio::test]
    async fn test_round_trip_is_readable_by_watcher() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::in_dir(dir.path().join("agent"));
        let mut state = file.load().await.unwrap();
        assert_eq!(state, AgentState::default());

        state.channels.insert(
            "hub:http://hub".into(),
            LocalChannel::new(B256::repeat_byte(0x22), TokenAmount::from(50u64)),
        );
        let next = state
            .next_channel_state("hub:http://hub", TokenAmount::from(5u64), B256::ZERO, NOW)
            .unwrap();
        state.record_proof(
            next.clone(),
            Bytes::from(vec![1u8; 65]),
            Some(Bytes::from(vec![2u8; 65])),
            NOW,
        );
        file.save(&state).await.unwrap();

        assert_eq!(file.load().await.unwrap(), state);
        let proof = FileProofSource::new(Role::Agent, file.path())
            .local_proof(next.channel_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proof.state, next);
        assert_eq!(proof.counterparty_sig, Bytes::from(vec![2u8; 65]));
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = StateFile::in_dir(dir.path());
        tokio::fs::write(file.path(), b"{not json").await.unwrap();
        assert_eq!(file.load().await.unwrap(), AgentState::default());
    }
}
