//! Hub operations.
//!
//! [`HubService`] owns the hub signer, the fee policy and the store, plus the
//! optional on-chain collaborators used to open payee channels and pay out
//! earnings. Every operation that writes runs as one [`Store::transact`], so
//! an issue either records the ticket, payment, channel state, ledger entry
//! and shadow-channel update together or records nothing.

use std::cmp::min;
use std::collections::HashSet;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use alloy_signer_local::PrivateKeySigner;
use dashmap::DashMap;
use rand::RngExt;
use serde::Serialize;
use tokio::sync::Mutex;

use scp::UnixTimestamp;
use scp::fee::FeePolicy;
use scp::id::random_id;
use scp::proto::{
    AgentSummary, ChannelAck, ChannelRecord, ChannelState, ChannelStatus, HUB_SCHEME, HubChannel,
    HubChannelAck, HubInfo, InboxPage, IssueRequest, IssueResponse, LedgerEntry, LedgerStatus,
    OpenPayeeChannelRequest, PayeeBalance, PayeeChannelResponse, PayeeChannelState, PaymentRecord,
    PaymentStatus, Quote, QuoteRequest, RefundReceipt, RefundRequest, RegisterPayeeChannelRequest,
    SettleReceipt, SettleRequest, SignatureInfo, SummaryItem, TicketDraft, TokenAmount,
};
use scp::store::{Store, StoreState, StoredQuote};
use scp_evm::chain::{ChannelContract, OpenChannelRequest, Payout};
use scp_evm::signing::{
    channel_state_digest, policy_hash, recover_channel_state_signer, sign_channel_state,
    sign_ticket_draft,
};

use crate::config::HubConfig;
use crate::error::HubError;

/// Longest a quote (and the ticket it becomes) stays valid.
pub const QUOTE_WINDOW_SECS: u64 = 120;

/// Lifetime of a hub-signed shadow-channel state.
pub const SHADOW_STATE_TTL_SECS: u64 = 3600;

/// Default challenge period of a hub-opened payee channel.
pub const PAYEE_CHANNEL_CHALLENGE_SECS: u64 = 300;

/// Default lifetime of a hub-opened payee channel.
pub const PAYEE_CHANNEL_TTL_SECS: u64 = 86_400;

/// Key identifier published in discovery.
const KEY_ID: &str = "hub-main-1";

/// The hub.
pub struct HubService<S> {
    signer: PrivateKeySigner,
    config: HubConfig,
    fees: FeePolicy,
    store: S,
    contract: Option<Arc<dyn ChannelContract>>,
    payout: Option<Arc<dyn Payout>>,
    payee_locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl<S> Debug for HubService<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubService")
            .field("address", &self.signer.address())
            .field("hub_name", &self.config.hub_name)
            .field("chain_id", &self.config.chain_id)
            .field("contract", &self.contract.is_some())
            .field("payout", &self.payout.is_some())
            .finish_non_exhaustive()
    }
}

impl<S: Store> HubService<S> {
    /// Creates a hub without on-chain collaborators.
    pub fn new(config: HubConfig, signer: PrivateKeySigner, store: S) -> Self {
        Self {
            fees: config.fee_policy(),
            signer,
            config,
            store,
            contract: None,
            payout: None,
            payee_locks: DashMap::new(),
        }
    }

    /// Enables opening payee channels on-chain.
    #[must_use]
    pub fn with_contract(mut self, contract: Arc<dyn ChannelContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Enables payee settlement.
    #[must_use]
    pub fn with_payout(mut self, payout: Arc<dyn Payout>) -> Self {
        self.payout = Some(payout);
        self
    }

    /// Hub signer address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Configuration the hub was built from.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Discovery document served at `/.well-known/x402`.
    #[must_use]
    pub fn info(&self) -> HubInfo {
        let address = self.address();
        HubInfo {
            hub_name: self.config.hub_name.clone(),
            address,
            chain_id: self.config.chain_id,
            schemes: vec![HUB_SCHEME.to_owned()],
            supported_assets: vec![self.config.default_asset, Address::ZERO],
            modes: vec!["proxy_hold".to_owned(), "peer_simple".to_owned()],
            signature: SignatureInfo {
                format: "eth_sign".to_owned(),
                key_id: KEY_ID.to_owned(),
                public_key: address,
            },
            fee_policy: self.fees.info(),
        }
    }

    /// Prices a payment and reserves its payment id.
    ///
    /// # Errors
    ///
    /// - [`HubError::Policy`] when `quoteExpiry` is not in the future
    /// - [`HubError::FeeExceedsMax`] when the fee is above `maxFee`
    /// - [`HubError::PaymentConsumed`] when the payment id was already issued
    pub async fn quote(&self, request: &QuoteRequest, now: UnixTimestamp) -> Result<Quote, HubError> {
        let result = self.try_quote(request, now).await;
        match &result {
            Ok(quote) => tracing::info!(
                payment_id = %quote.payment_id,
                fee = %quote.fee,
                total_debit = %quote.total_debit,
                "quote accepted"
            ),
            Err(e) => tracing::info!(
                payment_id = %request.payment_id,
                code = %e.code(),
                reason = %e,
                "quote rejected"
            ),
        }
        result
    }

    async fn try_quote(&self, request: &QuoteRequest, now: UnixTimestamp) -> Result<Quote, HubError> {
        if request.quote_expiry <= now {
            return Err(HubError::Policy("quoteExpiry must be future unix ts".to_owned()));
        }
        let computed = self
            .fees
            .compute(request.amount)
            .ok_or_else(|| HubError::Policy("amount too large".to_owned()))?;
        if computed.fee > request.max_fee {
            return Err(HubError::FeeExceedsMax);
        }

        let expiry = min(request.quote_expiry, now + QUOTE_WINDOW_SECS);
        let draft = TicketDraft {
            ticket_id: random_id("tkt"),
            hub: self.address(),
            payee: request.payee,
            invoice_id: request.invoice_id.clone(),
            payment_id: request.payment_id.clone(),
            asset: request.asset,
            amount: request.amount,
            fee_charged: computed.fee,
            total_debit: computed.total_debit,
            expiry,
            policy_hash: policy_hash(
                request.channel_id,
                self.config.chain_id,
                request.payment_memo.as_deref().unwrap_or_default(),
            ),
        };
        let quote = Quote {
            invoice_id: request.invoice_id.clone(),
            payment_id: request.payment_id.clone(),
            ticket_draft: draft,
            fee: computed.fee,
            total_debit: computed.total_debit,
            expiry,
            fee_breakdown: computed.breakdown,
        };

        let stored = StoredQuote {
            quote: quote.clone(),
            channel_id: request.channel_id,
            created_at: now,
            consumed: false,
        };
        self.store
            .transact(|state| {
                state.prune_quotes(now);
                let issued = state
                    .payments
                    .get(&stored.quote.payment_id)
                    .is_some_and(|p| p.status != PaymentStatus::Quoted);
                if issued {
                    return Err(HubError::PaymentConsumed("payment already issued"));
                }
                // One live quote per payment id, whatever the invoice.
                state
                    .quotes
                    .retain(|_, q| q.quote.payment_id != stored.quote.payment_id);
                state.payments.insert(
                    stored.quote.payment_id.clone(),
                    PaymentRecord {
                        payment_id: stored.quote.payment_id.clone(),
                        status: PaymentStatus::Quoted,
                        ticket_id: None,
                        state_nonce: None,
                    },
                );
                state.quotes.insert(stored.quote.key(), stored);
                Ok(())
            })
            .await?;
        Ok(quote)
    }

    /// Redeems a quote: signs the ticket, countersigns the payer state and
    /// credits the payee, all in one transaction.
    ///
    /// Only the stored quote is trusted; the echoed quote contributes its key.
    ///
    /// # Errors
    ///
    /// In check order: [`HubError::QuoteExpired`] (missing),
    /// [`HubError::PaymentConsumed`], [`HubError::QuoteExpired`] (expired),
    /// [`HubError::ChannelMismatch`], [`HubError::InvalidSignature`],
    /// [`HubError::StaleNonce`] and [`HubError::BalanceMismatch`].
    pub async fn issue(
        &self,
        request: &IssueRequest,
        now: UnixTimestamp,
    ) -> Result<IssueResponse, HubError> {
        let key = request.quote.key();
        let signer = &self.signer;
        let result = self
            .store
            .transact(|state| issue_in(state, &key, request, signer, now))
            .await;
        match &result {
            Ok(response) => {
                tracing::info!(
                    payment_id = %response.ticket.draft.payment_id,
                    ticket_id = %response.ticket.draft.ticket_id,
                    channel_id = %request.channel_state.channel_id,
                    state_nonce = response.channel_ack.state_nonce,
                    "ticket issued"
                );
                if let Some(ack) = &response.hub_channel_ack {
                    tracing::info!(
                        channel_id = %ack.channel_id,
                        state_nonce = ack.state_nonce,
                        bal_b = %ack.bal_b,
                        "shadow channel advanced"
                    );
                }
            }
            Err(e) => tracing::info!(
                payment_id = %request.quote.payment_id,
                code = %e.code(),
                reason = %e,
                "issue rejected"
            ),
        }
        result
    }

    /// Best-effort refund acknowledgement. Nothing is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Policy`] when `ticketId` is empty.
    pub fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, HubError> {
        if request.ticket_id.trim().is_empty() {
            return Err(HubError::Policy("ticketId required".to_owned()));
        }
        Ok(RefundReceipt {
            ticket_id: request.ticket_id.clone(),
            state_nonce: rand::rng().random_range(1..=1_000_000),
            receipt_id: random_id("rfd"),
        })
    }

    /// Looks up a payment.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] for unknown ids.
    pub async fn payment(&self, payment_id: &str) -> Result<PaymentRecord, HubError> {
        self.store
            .read(|state| state.payments.get(payment_id).cloned())
            .await
            .ok_or(HubError::NotFound("payment not found"))
    }

    /// The hub's record of a payer channel; a zero record when unseen.
    pub async fn channel(&self, channel_id: B256) -> ChannelRecord {
        self.store
            .read(|state| state.channels.get(&channel_id).cloned())
            .await
            .unwrap_or_else(|| ChannelRecord::unseen(channel_id))
    }

    /// Ledger entries with `seq > since`, at most `limit` of them.
    pub async fn inbox(&self, payee: Address, since: u64, limit: usize) -> InboxPage {
        let items: Vec<LedgerEntry> = self
            .store
            .read(|state| {
                state
                    .ledger(&payee)
                    .iter()
                    .filter(|entry| entry.seq > since)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .await;
        InboxPage {
            payee: lower_hex(payee),
            since,
            count: items.len(),
            next_cursor: items.last().map_or(since, |entry| entry.seq),
            items,
        }
    }

    /// Spend summary of a payer channel, built from its issued payments.
    pub async fn agent_summary(&self, channel_id: B256) -> AgentSummary {
        self.store
            .read(|state| summarize(state, channel_id))
            .await
    }

    /// Earned, settled and unsettled totals of a payee.
    pub async fn balance(&self, payee: Address) -> PayeeBalance {
        let (earned, settled, payments) = self
            .store
            .read(|state| {
                let ledger = state.ledger(&payee);
                let (earned, settled) = ledger.iter().fold(
                    (TokenAmount::ZERO, TokenAmount::ZERO),
                    |(earned, settled), entry| {
                        let settled = if entry.status == LedgerStatus::Settled {
                            settled.saturating_add(entry.amount)
                        } else {
                            settled
                        };
                        (earned.saturating_add(entry.amount), settled)
                    },
                );
                (earned, settled, ledger.len())
            })
            .await;
        PayeeBalance {
            payee: lower_hex(payee),
            earned,
            settled,
            unsettled: earned.saturating_sub(settled),
            payments,
        }
    }

    /// Opens a Hub↔Payee channel on-chain with the hub as participant A.
    ///
    /// # Errors
    ///
    /// - [`HubError::SettlementUnavailable`] without a channel contract
    /// - [`HubError::SettlementFailed`] when the open transaction fails
    pub async fn open_payee_channel(
        &self,
        request: &OpenPayeeChannelRequest,
        now: UnixTimestamp,
    ) -> Result<PayeeChannelResponse, HubError> {
        let contract = self.contract.as_ref().ok_or(HubError::SettlementUnavailable(
            "hub has no on-chain provider or contract (set rpc_url, contract_address)",
        ))?;
        let payee = request.payee;
        let lock = self.payee_lock(payee);
        let _guard = lock.lock().await;

        let existing = self
            .store
            .read(|state| state.hub_channels.get(&payee).cloned())
            .await;
        if let Some(channel) = existing {
            return Ok(PayeeChannelResponse {
                message: Some("already open".to_owned()),
                channel,
            });
        }

        let asset = request.asset.unwrap_or(Address::ZERO);
        let deposit = request.deposit.unwrap_or_default();
        let opened = contract
            .open_channel(OpenChannelRequest {
                participant_b: payee,
                asset,
                amount: deposit,
                challenge_period_sec: request
                    .challenge_period_sec
                    .unwrap_or(PAYEE_CHANNEL_CHALLENGE_SECS),
                channel_expiry: request
                    .channel_expiry
                    .unwrap_or(now + PAYEE_CHANNEL_TTL_SECS),
                salt: payee_channel_salt(payee, now),
            })
            .await
            .map_err(|e| {
                tracing::error!(payee = %payee, error = %e, "open payee channel failed");
                HubError::SettlementFailed(e.to_string())
            })?;

        let channel = HubChannel {
            channel_id: opened.channel_id,
            payee,
            asset,
            total_deposit: deposit,
            bal_a: deposit,
            bal_b: TokenAmount::ZERO,
            nonce: 0,
            latest_state: None,
            sig_a: None,
            tx_hash: Some(opened.tx_hash),
        };
        self.store
            .transact(|state| {
                state.hub_channels.insert(payee, channel.clone());
                Ok::<_, HubError>(())
            })
            .await?;
        tracing::info!(
            payee = %payee,
            channel_id = %channel.channel_id,
            tx_hash = %opened.tx_hash,
            deposit = %deposit,
            "payee channel opened"
        );
        Ok(PayeeChannelResponse {
            message: None,
            channel,
        })
    }

    /// Records a Hub↔Payee channel opened elsewhere. Idempotent per payee.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the store cannot persist.
    pub async fn register_payee_channel(
        &self,
        request: &RegisterPayeeChannelRequest,
    ) -> Result<PayeeChannelResponse, HubError> {
        let deposit = request.total_deposit.unwrap_or_default();
        let candidate = HubChannel {
            channel_id: request.channel_id,
            payee: request.payee,
            asset: request.asset.unwrap_or(Address::ZERO),
            total_deposit: deposit,
            bal_a: deposit,
            bal_b: TokenAmount::ZERO,
            nonce: 0,
            latest_state: None,
            sig_a: None,
            tx_hash: None,
        };
        self.store
            .transact(|state| {
                if let Some(existing) = state.hub_channels.get(&request.payee) {
                    return Ok(PayeeChannelResponse {
                        message: Some("already registered".to_owned()),
                        channel: existing.clone(),
                    });
                }
                state.hub_channels.insert(request.payee, candidate.clone());
                Ok::<_, HubError>(PayeeChannelResponse {
                    message: None,
                    channel: candidate,
                })
            })
            .await
    }

    /// Latest shadow-channel state of a payee.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::NotFound`] when the payee has no shadow channel.
    pub async fn payee_channel_state(&self, payee: Address) -> Result<PayeeChannelState, HubError> {
        self.store
            .read(|state| state.hub_channels.get(&payee).cloned())
            .await
            .map(PayeeChannelState::from)
            .ok_or(HubError::NotFound("no hub channel for this payee"))
    }

    /// Pays out every unsettled ledger entry of a payee in one transfer.
    ///
    /// Entries are marked settled only after the transfer succeeds, and only
    /// the entries that were summed. Concurrent settles for one payee are
    /// serialized, so an entry is never paid twice.
    ///
    /// # Errors
    ///
    /// - [`HubError::SettlementUnavailable`] without a payout sender
    /// - [`HubError::SettlementFailed`] when the transfer fails; nothing is marked
    pub async fn settle(
        &self,
        request: &SettleRequest,
        now: UnixTimestamp,
    ) -> Result<SettleReceipt, HubError> {
        let payout = self.payout.as_ref().ok_or(HubError::SettlementUnavailable(
            "hub has no on-chain provider (set rpc_url)",
        ))?;
        let payee = request.payee;
        let asset = request.asset.unwrap_or(Address::ZERO);
        let lock = self.payee_lock(payee);
        let _guard = lock.lock().await;

        let (amount, seqs) = self
            .store
            .read(|state| {
                state
                    .ledger(&payee)
                    .iter()
                    .filter(|entry| entry.status == LedgerStatus::Issued)
                    .try_fold((TokenAmount::ZERO, HashSet::new()), |(sum, mut seqs), entry| {
                        seqs.insert(entry.seq);
                        Some((sum.checked_add(entry.amount)?, seqs))
                    })
            })
            .await
            .ok_or_else(|| HubError::Policy("unsettled total overflows".to_owned()))?;

        if amount.is_zero() {
            return Ok(SettleReceipt {
                payee: lower_hex(payee),
                amount: TokenAmount::ZERO,
                asset: None,
                tx_hash: None,
                settled_count: None,
                message: Some("nothing to settle".to_owned()),
            });
        }

        let tx_hash = payout.transfer(asset, payee, amount).await.map_err(|e| {
            tracing::error!(payee = %payee, amount = %amount, error = %e, "settlement failed");
            HubError::SettlementFailed(e.to_string())
        })?;

        let settled_count = self
            .store
            .transact(|state| {
                let mut count = 0;
                if let Some(ledger) = state.payee_ledger.get_mut(&payee) {
                    for entry in ledger
                        .iter_mut()
                        .filter(|e| e.status == LedgerStatus::Issued && seqs.contains(&e.seq))
                    {
                        entry.status = LedgerStatus::Settled;
                        entry.settle_tx = Some(tx_hash);
                        entry.settled_at = Some(now);
                        count += 1;
                    }
                }
                Ok::<_, HubError>(count)
            })
            .await?;
        tracing::info!(
            payee = %payee,
            amount = %amount,
            tx_hash = %tx_hash,
            count = settled_count,
            "settlement sent"
        );

        Ok(SettleReceipt {
            payee: lower_hex(payee),
            amount,
            asset: Some(asset),
            tx_hash: Some(tx_hash),
            settled_count: Some(settled_count),
            message: None,
        })
    }

    /// Compares every shadow channel's remaining collateral with the payee's
    /// unsettled earnings, and with the on-chain deposit when a contract is
    /// configured. Under-collateralised payees are logged at `warn`.
    pub async fn reconcile(&self, now: UnixTimestamp) -> ReconcileReport {
        let mut payees: Vec<PayeeReconciliation> = self
            .store
            .read(|state| {
                state
                    .hub_channels
                    .values()
                    .map(|channel| {
                        let unsettled = state
                            .ledger(&channel.payee)
                            .iter()
                            .filter(|e| e.status == LedgerStatus::Issued)
                            .fold(TokenAmount::ZERO, |sum, e| sum.saturating_add(e.amount));
                        PayeeReconciliation {
                            payee: channel.payee,
                            channel_id: channel.channel_id,
                            total_deposit: channel.total_deposit,
                            credited: channel.bal_b,
                            remaining: channel.bal_a,
                            unsettled,
                            onchain_total: None,
                            undercollateralised: unsettled > channel.bal_a,
                        }
                    })
                    .collect()
            })
            .await;
        payees.sort_by_key(|p| p.payee);

        if let Some(contract) = &self.contract {
            for row in &mut payees {
                match contract.get_channel(row.channel_id).await {
                    Ok(onchain) if onchain.exists() => row.onchain_total = Some(onchain.total_balance),
                    Ok(_) => tracing::warn!(
                        payee = %row.payee,
                        channel_id = %row.channel_id,
                        "payee channel missing on-chain"
                    ),
                    Err(e) => tracing::warn!(
                        payee = %row.payee,
                        channel_id = %row.channel_id,
                        error = %e,
                        "could not read payee channel"
                    ),
                }
            }
        }

        for row in payees.iter().filter(|r| r.undercollateralised) {
            tracing::warn!(
                payee = %row.payee,
                channel_id = %row.channel_id,
                remaining = %row.remaining,
                unsettled = %row.unsettled,
                "payee earnings exceed remaining collateral"
            );
        }
        ReconcileReport {
            checked_at: now,
            payees,
        }
    }

    fn payee_lock(&self, payee: Address) -> Arc<Mutex<()>> {
        Arc::clone(&self.payee_locks.entry(payee).or_default())
    }
}

/// One payee in a [`ReconcileReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeReconciliation {
    /// Payee.
    pub payee: Address,
    /// Shadow channel.
    pub channel_id: B256,
    /// Hub deposit recorded at open or registration.
    pub total_deposit: TokenAmount,
    /// Earnings credited through the shadow channel.
    pub credited: TokenAmount,
    /// Hub collateral left in the shadow channel.
    pub remaining: TokenAmount,
    /// Ledger amount not yet paid out.
    pub unsettled: TokenAmount,
    /// Channel balance on-chain, when readable.
    pub onchain_total: Option<TokenAmount>,
    /// `unsettled > remaining`.
    pub undercollateralised: bool,
}

/// Result of [`HubService::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Time of the pass.
    pub checked_at: UnixTimestamp,
    /// One row per shadow channel, ordered by payee.
    pub payees: Vec<PayeeReconciliation>,
}

impl ReconcileReport {
    /// Payees whose unsettled earnings exceed the remaining collateral.
    pub fn flagged(&self) -> impl Iterator<Item = &PayeeReconciliation> {
        self.payees.iter().filter(|p| p.undercollateralised)
    }
}

fn issue_in(
    state: &mut StoreState,
    key: &str,
    request: &IssueRequest,
    signer: &PrivateKeySigner,
    now: UnixTimestamp,
) -> Result<IssueResponse, HubError> {
    let stored = state
        .quotes
        .get(key)
        .ok_or(HubError::QuoteExpired("quote not found"))?;
    if stored.consumed {
        return Err(HubError::PaymentConsumed("quote already consumed"));
    }
    let issued = state
        .payments
        .get(&stored.quote.payment_id)
        .is_some_and(|p| p.status != PaymentStatus::Quoted);
    if issued {
        return Err(HubError::PaymentConsumed("payment already issued"));
    }
    if stored.quote.expiry.is_past(now) {
        return Err(HubError::QuoteExpired("quote expired"));
    }
    let channel_state = &request.channel_state;
    let channel_id = channel_state.channel_id;
    if stored.channel_id != channel_id {
        return Err(HubError::ChannelMismatch);
    }
    let quote = stored.quote.clone();

    let payer = recover_channel_state_signer(channel_state, &request.sig_a)
        .map_err(|e| HubError::InvalidSignature(format!("invalid sigA: {e}")))?;
    let record = state.channels.get(&channel_id);
    if let Some(known) = record.and_then(|r| r.payer) {
        if known != payer {
            return Err(HubError::InvalidSignature(format!(
                "sigA recovered {payer}, channel payer is {known}"
            )));
        }
    }
    check_progress(
        record.and_then(|r| r.latest_state.as_ref()),
        channel_state,
        quote.total_debit,
    )?;

    let ticket = sign_ticket_draft(quote.ticket_draft, signer)?;
    let sig_b = sign_channel_state(channel_state, signer)?;
    let channel_ack = ChannelAck {
        state_nonce: channel_state.state_nonce,
        state_hash: channel_state_digest(channel_state),
        sig_b: sig_b.clone(),
    };

    if let Some(stored) = state.quotes.get_mut(key) {
        stored.consumed = true;
    }
    let draft = &ticket.draft;
    state.payments.insert(
        draft.payment_id.clone(),
        PaymentRecord {
            payment_id: draft.payment_id.clone(),
            status: PaymentStatus::Issued,
            ticket_id: Some(draft.ticket_id.clone()),
            state_nonce: Some(channel_state.state_nonce),
        },
    );
    state.channels.insert(
        channel_id,
        ChannelRecord {
            channel_id,
            latest_nonce: channel_state.state_nonce,
            status: ChannelStatus::Open,
            latest_state: Some(channel_state.clone()),
            sig_a: Some(request.sig_a.clone()),
            sig_b: Some(sig_b),
            payer: Some(payer),
        },
    );
    state.append_ledger(
        draft.payee,
        LedgerEntry {
            seq: 0,
            created_at: now,
            payment_id: draft.payment_id.clone(),
            invoice_id: draft.invoice_id.clone(),
            ticket_id: draft.ticket_id.clone(),
            amount: draft.amount,
            asset: draft.asset,
            status: LedgerStatus::Issued,
            settle_tx: None,
            settled_at: None,
        },
    );
    let hub_channel_ack = advance_shadow(state, draft, channel_state.context_hash, signer, now)?;

    Ok(IssueResponse {
        ticket,
        channel_ack,
        hub_channel_ack,
    })
}

/// Checks a proposed payer state against the last one the hub countersigned.
fn check_progress(
    prior: Option<&ChannelState>,
    next: &ChannelState,
    total_debit: TokenAmount,
) -> Result<(), HubError> {
    let next_total = next
        .total()
        .ok_or_else(|| HubError::BalanceMismatch("channel balances overflow".to_owned()))?;
    let Some(prior) = prior else {
        if next.bal_b < total_debit {
            return Err(HubError::BalanceMismatch(format!(
                "balB {} below totalDebit {total_debit}",
                next.bal_b
            )));
        }
        return Ok(());
    };
    if next.state_nonce <= prior.state_nonce {
        return Err(HubError::StaleNonce(format!(
            "stateNonce {} must exceed {}",
            next.state_nonce, prior.state_nonce
        )));
    }
    if prior.total() != Some(next_total) {
        return Err(HubError::BalanceMismatch("channel total not conserved".to_owned()));
    }
    let delta = next
        .bal_b
        .checked_sub(prior.bal_b)
        .ok_or_else(|| HubError::BalanceMismatch("balB decreased".to_owned()))?;
    if delta < total_debit {
        return Err(HubError::BalanceMismatch(format!(
            "balB delta {delta} below totalDebit {total_debit}"
        )));
    }
    Ok(())
}

/// Credits the payee's shadow channel by the ticket amount, if it can cover it.
fn advance_shadow(
    state: &mut StoreState,
    draft: &TicketDraft,
    context_hash: B256,
    signer: &PrivateKeySigner,
    now: UnixTimestamp,
) -> Result<Option<HubChannelAck>, HubError> {
    let Some(channel) = state.hub_channels.get_mut(&draft.payee) else {
        return Ok(None);
    };
    let Some(bal_a) = channel.bal_a.checked_sub(draft.amount) else {
        tracing::warn!(
            payee = %draft.payee,
            channel_id = %channel.channel_id,
            remaining = %channel.bal_a,
            amount = %draft.amount,
            "shadow channel under-collateralised, not advanced"
        );
        return Ok(None);
    };
    let Some(bal_b) = channel.bal_b.checked_add(draft.amount) else {
        return Ok(None);
    };
    let shadow = ChannelState {
        channel_id: channel.channel_id,
        state_nonce: channel.nonce.saturating_add(1),
        bal_a,
        bal_b,
        locks_root: B256::ZERO,
        state_expiry: now + SHADOW_STATE_TTL_SECS,
        context_hash,
    };
    let sig_a = sign_channel_state(&shadow, signer)?;
    let ack = HubChannelAck {
        channel_id: shadow.channel_id,
        state_nonce: shadow.state_nonce,
        bal_b,
        sig_a: sig_a.clone(),
    };
    channel.bal_a = bal_a;
    channel.bal_b = bal_b;
    channel.nonce = shadow.state_nonce;
    channel.latest_state = Some(shadow);
    channel.sig_a = Some(sig_a);
    Ok(Some(ack))
}

fn summarize(state: &StoreState, channel_id: B256) -> AgentSummary {
    let latest_nonce = state
        .channels
        .get(&channel_id)
        .map_or(0, |record| record.latest_nonce);
    let mut rows: Vec<(u64, SummaryItem)> = state
        .quotes
        .values()
        .filter(|stored| stored.channel_id == channel_id)
        .filter_map(|stored| {
            let payment = state.payments.get(&stored.quote.payment_id)?;
            if payment.status != PaymentStatus::Issued {
                return None;
            }
            let draft = &stored.quote.ticket_draft;
            Some((
                payment.state_nonce.unwrap_or_default(),
                SummaryItem {
                    payment_id: payment.payment_id.clone(),
                    amount: draft.amount,
                    fee: draft.fee_charged,
                    payee: draft.payee,
                    ticket_id: payment.ticket_id.clone(),
                },
            ))
        })
        .collect();
    rows.sort_by_key(|(nonce, _)| *nonce);
    let items: Vec<SummaryItem> = rows.into_iter().map(|(_, item)| item).collect();
    let total_spent = items
        .iter()
        .fold(TokenAmount::ZERO, |sum, item| sum.saturating_add(item.amount));
    let total_fees = items
        .iter()
        .fold(TokenAmount::ZERO, |sum, item| sum.saturating_add(item.fee));
    AgentSummary {
        channel_id,
        latest_nonce,
        payments: items.len(),
        total_spent,
        total_fees,
        total_debit: total_spent.saturating_add(total_fees),
        items,
    }
}

fn payee_channel_salt(payee: Address, now: UnixTimestamp) -> B256 {
    let tag = format!("hb-{now}-{}", &lower_hex(payee)[2..8]);
    B256::right_padding_from(tag.as_bytes())
}

fn lower_hex(address: Address) -> String {
    address.to_string().to_lowercase()
}
