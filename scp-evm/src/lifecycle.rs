//! In-memory model of the settlement contract.
//!
//! [`InMemoryChannelContract`] enforces the same lifecycle rules and revert
//! strings as the deployed contract:
//!
//! - `Open -> Closed` through `cooperativeClose` with both signatures, conserved
//!   balances and an unexpired state
//! - `Open -> Closing` through `startClose` with the counterparty's signature;
//!   the close deadline is `now + challengePeriod`
//! - `challenge` only while closing, before the deadline, with a strictly
//!   newer nonce
//! - `finalizeClose` only after the deadline, paying the last accepted state
//!
//! Closed channels are deleted, so `getChannel` reads back zeroed. Handles
//! created with [`InMemoryChannelContract::as_caller`] share one chain and
//! one clock.

use alloy_primitives::{Address, B256, Bytes, keccak256};
use alloy_sol_types::SolValue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use scp::UnixTimestamp;
use scp::proto::{ChannelState, TokenAmount};

use crate::chain::{
    ChainError, ChannelContract, ChannelOpened, Deposited, OnchainChannel, OpenChannelRequest,
};
use crate::signing::recover_channel_state_signer;

#[derive(Debug, Default)]
struct Chain {
    channels: HashMap<B256, ModelChannel>,
    paid: HashMap<Address, TokenAmount>,
    tx_count: u64,
}

#[derive(Debug, Clone)]
struct ModelChannel {
    params: OnchainChannel,
    close_state: Option<ChannelState>,
}

impl Chain {
    fn next_tx(&mut self) -> B256 {
        self.tx_count += 1;
        keccak256(self.tx_count.to_be_bytes())
    }

    fn channel(&self, id: B256) -> Result<&ModelChannel, ChainError> {
        self.channels.get(&id).ok_or_else(|| revert("SCP: not found"))
    }

    fn pay_out(&mut self, channel: &OnchainChannel, state: &ChannelState) {
        for (to, amount) in [
            (channel.participant_a, state.bal_a),
            (channel.participant_b, state.bal_b),
        ] {
            let paid = self.paid.entry(to).or_default();
            *paid = paid.saturating_add(amount);
        }
    }
}

fn revert(reason: &str) -> ChainError {
    ChainError::Reverted(reason.to_owned())
}

fn signed_by(state: &ChannelState, sig: &Bytes, expected: Address) -> bool {
    recover_channel_state_signer(state, sig).is_ok_and(|signer| signer == expected)
}

/// Shared-state contract model with a controllable clock.
#[derive(Debug, Clone)]
pub struct InMemoryChannelContract {
    chain: Arc<Mutex<Chain>>,
    clock: Arc<AtomicU64>,
    caller: Address,
}

impl InMemoryChannelContract {
    /// A fresh chain whose clock starts at the current time.
    #[must_use]
    pub fn new(caller: Address) -> Self {
        Self {
            chain: Arc::new(Mutex::new(Chain::default())),
            clock: Arc::new(AtomicU64::new(UnixTimestamp::now().as_secs())),
            caller,
        }
    }

    /// A handle on the same chain sending from `caller`.
    #[must_use]
    pub fn as_caller(&self, caller: Address) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            clock: Arc::clone(&self.clock),
            caller,
        }
    }

    /// Current chain time.
    #[must_use]
    pub fn now(&self) -> UnixTimestamp {
        UnixTimestamp::from_secs(self.clock.load(Ordering::SeqCst))
    }

    /// Moves the chain clock forward.
    pub fn advance(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }

    /// Total paid out to `account` by closed channels.
    pub async fn paid_to(&self, account: Address) -> TokenAmount {
        self.chain
            .lock()
            .await
            .paid
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    fn counterparty(&self, params: &OnchainChannel) -> Result<Address, ChainError> {
        if self.caller == params.participant_a {
            Ok(params.participant_b)
        } else if self.caller == params.participant_b {
            Ok(params.participant_a)
        } else {
            Err(revert("SCP: not participant"))
        }
    }

    fn bad_counterparty_sig(&self, params: &OnchainChannel) -> ChainError {
        if self.caller == params.participant_a {
            revert("SCP: bad sigB")
        } else {
            revert("SCP: bad sigA")
        }
    }
}

#[async_trait]
impl ChannelContract for InMemoryChannelContract {
    fn caller(&self) -> Address {
        self.caller
    }

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<ChannelOpened, ChainError> {
        if request.participant_b == Address::ZERO || request.participant_b == self.caller {
            return Err(revert("SCP: bad participant"));
        }
        if request.channel_expiry <= self.now() {
            return Err(revert("SCP: bad expiry"));
        }
        let channel_id = keccak256(
            (self.caller, request.participant_b, request.asset, request.salt).abi_encode_params(),
        );
        let mut chain = self.chain.lock().await;
        if chain.channels.contains_key(&channel_id) {
            return Err(revert("SCP: exists"));
        }
        chain.channels.insert(
            channel_id,
            ModelChannel {
                params: OnchainChannel {
                    participant_a: self.caller,
                    participant_b: request.participant_b,
                    asset: request.asset,
                    challenge_period_sec: request.challenge_period_sec,
                    channel_expiry: request.channel_expiry,
                    total_balance: request.amount,
                    is_closing: false,
                    close_deadline: UnixTimestamp::default(),
                    latest_nonce: 0,
                },
                close_state: None,
            },
        );
        let tx_hash = chain.next_tx();
        Ok(ChannelOpened {
            channel_id,
            tx_hash,
        })
    }

    async fn deposit(&self, channel_id: B256, amount: TokenAmount) -> Result<Deposited, ChainError> {
        let mut chain = self.chain.lock().await;
        let params = chain.channel(channel_id)?.params.clone();
        self.counterparty(&params)?;
        let new_total = params
            .total_balance
            .checked_add(amount)
            .ok_or_else(|| revert("SCP: overflow"))?;
        if let Some(ch) = chain.channels.get_mut(&channel_id) {
            ch.params.total_balance = new_total;
        }
        let tx_hash = chain.next_tx();
        Ok(Deposited {
            channel_id,
            amount,
            new_total_balance: Some(new_total),
            tx_hash,
        })
    }

    async fn cooperative_close(
        &self,
        state: &ChannelState,
        sig_a: &Bytes,
        sig_b: &Bytes,
    ) -> Result<B256, ChainError> {
        let mut chain = self.chain.lock().await;
        let params = chain.channel(state.channel_id)?.params.clone();
        if params.is_closing {
            return Err(revert("SCP: challenge open"));
        }
        if !signed_by(state, sig_a, params.participant_a) {
            return Err(revert("SCP: bad sigA"));
        }
        if !signed_by(state, sig_b, params.participant_b) {
            return Err(revert("SCP: bad sigB"));
        }
        if state.total() != Some(params.total_balance) {
            return Err(revert("SCP: bad balances"));
        }
        if state.state_expiry.is_past(self.now()) {
            return Err(revert("SCP: state expired"));
        }
        chain.channels.remove(&state.channel_id);
        chain.pay_out(&params, state);
        Ok(chain.next_tx())
    }

    async fn start_close(
        &self,
        state: &ChannelState,
        counterparty_sig: &Bytes,
    ) -> Result<B256, ChainError> {
        let mut chain = self.chain.lock().await;
        let params = chain.channel(state.channel_id)?.params.clone();
        let counterparty = self.counterparty(&params)?;
        if params.is_closing {
            return Err(revert("SCP: challenge open"));
        }
        if !signed_by(state, counterparty_sig, counterparty) {
            return Err(self.bad_counterparty_sig(&params));
        }
        if state.total() != Some(params.total_balance) {
            return Err(revert("SCP: bad balances"));
        }
        let deadline = self.now() + params.challenge_period_sec;
        if let Some(ch) = chain.channels.get_mut(&state.channel_id) {
            ch.params.is_closing = true;
            ch.params.close_deadline = deadline;
            ch.params.latest_nonce = state.state_nonce;
            ch.close_state = Some(state.clone());
        }
        Ok(chain.next_tx())
    }

    async fn challenge(
        &self,
        state: &ChannelState,
        counterparty_sig: &Bytes,
    ) -> Result<B256, ChainError> {
        let mut chain = self.chain.lock().await;
        let params = chain.channel(state.channel_id)?.params.clone();
        let counterparty = self.counterparty(&params)?;
        if !params.is_closing {
            return Err(revert("SCP: not closing"));
        }
        if self.now() > params.close_deadline {
            return Err(revert("SCP: deadline passed"));
        }
        if state.state_nonce <= params.latest_nonce {
            return Err(revert("SCP: stale nonce"));
        }
        if !signed_by(state, counterparty_sig, counterparty) {
            return Err(self.bad_counterparty_sig(&params));
        }
        if state.total() != Some(params.total_balance) {
            return Err(revert("SCP: bad balances"));
        }
        if let Some(ch) = chain.channels.get_mut(&state.channel_id) {
            ch.params.latest_nonce = state.state_nonce;
            ch.close_state = Some(state.clone());
        }
        Ok(chain.next_tx())
    }

    async fn finalize_close(&self, channel_id: B256) -> Result<B256, ChainError> {
        let mut chain = self.chain.lock().await;
        let channel = chain.channel(channel_id)?.clone();
        if !channel.params.is_closing {
            return Err(revert("SCP: not closing"));
        }
        if self.now() <= channel.params.close_deadline {
            return Err(revert("SCP: challenge open"));
        }
        let state = channel
            .close_state
            .ok_or_else(|| revert("SCP: not closing"))?;
        chain.channels.remove(&channel_id);
        chain.pay_out(&channel.params, &state);
        Ok(chain.next_tx())
    }

    async fn get_channel(&self, channel_id: B256) -> Result<OnchainChannel, ChainError> {
        let chain = self.chain.lock().await;
        Ok(chain.channels.get(&channel_id).map_or(
            OnchainChannel {
                participant_a: Address::ZERO,
                participant_b: Address::ZERO,
                asset: Address::ZERO,
                challenge_period_sec: 0,
                channel_expiry: UnixTimestamp::default(),
                total_balance: TokenAmount::ZERO,
                is_closing: false,
                close_deadline: UnixTimestamp::default(),
                latest_nonce: 0,
            },
            |ch| ch.params.clone(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::signing::sign_channel_state;
    use alloy_signer_local::PrivateKeySigner;

    pub(crate) struct Fixture {
        pub a: PrivateKeySigner,
        pub b: PrivateKeySigner,
        pub as_a: InMemoryChannelContract,
        pub as_b: InMemoryChannelContract,
        pub channel_id: B256,
    }

    pub(crate) async fn open(challenge_period_sec: u64) -> Fixture {
        let a = PrivateKeySigner::random();
        let b = PrivateKeySigner::random();
        let as_a = InMemoryChannelContract::new(a.address());
        let as_b = as_a.as_caller(b.address());
        let opened = as_a
            .open_channel(OpenChannelRequest {
                participant_b: b.address(),
                asset: Address::ZERO,
                amount: TokenAmount::from(1_000u64),
                challenge_period_sec,
                channel_expiry: as_a.now() + 7_200,
                salt: B256::repeat_byte(0x5a),
            })
            .await
            .unwrap();
        Fixture {
            a,
            b,
            as_a,
            as_b,
            channel_id: opened.channel_id,
        }
    }

    pub(crate) fn state(f: &Fixture, nonce: u64, bal_b: u64) -> ChannelState {
        ChannelState {
            channel_id: f.channel_id,
            state_nonce: nonce,
            bal_a: TokenAmount::from(1_000 - bal_b),
            bal_b: TokenAmount::from(bal_b),
            locks_root: B256::ZERO,
            state_expiry: f.as_a.now() + 1_800,
            context_hash: B256::ZERO,
        }
    }

    #[tokio::test]
    async fn test_cooperative_close_pays_out_and_deletes() {
        let f = open(600).await;
        let s = state(&f, 1, 300);
        let sig_a = sign_channel_state(&s, &f.a).unwrap();
        let sig_b = sign_channel_state(&s, &f.b).unwrap();
        f.as_a.cooperative_close(&s, &sig_a, &sig_b).await.unwrap();

        assert_eq!(f.as_a.paid_to(f.b.address()).await, TokenAmount::from(300u64));
        assert_eq!(f.as_a.paid_to(f.a.address()).await, TokenAmount::from(700u64));
        assert!(!f.as_a.get_channel(f.channel_id).await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_cooperative_close_rejects_bad_inputs() {
        let f = open(600).await;
        let s = state(&f, 1, 300);
        let sig_a = sign_channel_state(&s, &f.a).unwrap();
        let sig_b = sign_channel_state(&s, &f.b).unwrap();

        let err = f.as_a.cooperative_close(&s, &sig_a, &sig_a).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: bad sigB");

        let mut unbalanced = s.clone();
        unbalanced.bal_b = TokenAmount::from(400u64);
        let ua = sign_channel_state(&unbalanced, &f.a).unwrap();
        let ub = sign_channel_state(&unbalanced, &f.b).unwrap();
        let err = f.as_a.cooperative_close(&unbalanced, &ua, &ub).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: bad balances");

        f.as_a.advance(1_801);
        let err = f.as_a.cooperative_close(&s, &sig_a, &sig_b).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: state expired");
    }

    #[tokio::test]
    async fn test_unilateral_close_challenge_and_finalize() {
        let f = open(100).await;
        let s1 = state(&f, 1, 200);
        let s2 = state(&f, 2, 250);

        let sig_b_on_1 = sign_channel_state(&s1, &f.b).unwrap();
        f.as_a.start_close(&s1, &sig_b_on_1).await.unwrap();

        let sig_a_on_1 = sign_channel_state(&s1, &f.a).unwrap();
        let err = f.as_b.challenge(&s1, &sig_a_on_1).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: stale nonce");

        let sig_a_on_2 = sign_channel_state(&s2, &f.a).unwrap();
        f.as_b.challenge(&s2, &sig_a_on_2).await.unwrap();
        assert_eq!(f.as_a.get_channel(f.channel_id).await.unwrap().latest_nonce, 2);

        let err = f.as_a.finalize_close(f.channel_id).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: challenge open");

        f.as_a.advance(101);
        f.as_a.finalize_close(f.channel_id).await.unwrap();
        assert_eq!(f.as_a.paid_to(f.b.address()).await, TokenAmount::from(250u64));
    }

    #[tokio::test]
    async fn test_challenge_rules() {
        let f = open(50).await;
        let s1 = state(&f, 1, 100);
        let s2 = state(&f, 2, 150);
        let sig_a_on_2 = sign_channel_state(&s2, &f.a).unwrap();

        let err = f.as_b.challenge(&s2, &sig_a_on_2).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: not closing");

        let sig_b_on_1 = sign_channel_state(&s1, &f.b).unwrap();
        f.as_a.start_close(&s1, &sig_b_on_1).await.unwrap();
        f.as_a.advance(51);
        let err = f.as_b.challenge(&s2, &sig_a_on_2).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: deadline passed");
    }

    #[tokio::test]
    async fn test_outsiders_are_rejected() {
        let f = open(600).await;
        let outsider = f.as_a.as_caller(Address::repeat_byte(0x99));
        let err = outsider
            .deposit(f.channel_id, TokenAmount::from(1u64))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "SCP: not participant");

        let s = state(&f, 1, 10);
        let sig_b = sign_channel_state(&s, &f.b).unwrap();
        let err = outsider.start_close(&s, &sig_b).await.unwrap_err();
        assert_eq!(err.to_string(), "SCP: not participant");

        let err = f
            .as_a
            .finalize_close(B256::repeat_byte(0x01))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "SCP: not found");
    }
}
