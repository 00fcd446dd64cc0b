//! Durable storage for quotes, payments, channels and payee ledgers.
//!
//! The store exposes one narrow capability: read a consistent snapshot, or
//! apply a closure to the whole state as a single transaction. Get, set and
//! append-to-ledger are all expressed through those two primitives, which is
//! what makes the hub's issue step (ticket + payment + channel + ledger +
//! shadow channel) all-or-nothing.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process, for tests and ephemeral hubs
//! - [`JsonFileStore`] - a single JSON document, written atomically (tmp + rename)
//!
//! A remote backend plugs in by implementing [`Store`].

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use crate::proto::{
    ChannelRecord, HubChannel, LedgerEntry, LedgerStatus, PaymentRecord, Quote, quote_key,
};
use crate::timestamp::UnixTimestamp;

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Ledger length above which the oldest settled entries are dropped.
///
/// Unsettled entries are never dropped, so a ledger can exceed the cap.
pub const LEDGER_MAX: usize = 10_000;

/// Age after which a stored quote is pruned.
pub const QUOTE_TTL_SECS: u64 = 300;

/// A quote as stored by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuote {
    /// The quote exactly as returned to the payer.
    pub quote: Quote,
    /// Channel the quote was requested for.
    pub channel_id: B256,
    /// Time the quote was created.
    pub created_at: UnixTimestamp,
    /// Set once issue has redeemed the quote.
    #[serde(default)]
    pub consumed: bool,
}

/// The complete persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Quotes keyed by `invoiceId:paymentId`.
    #[serde(default)]
    pub quotes: HashMap<String, StoredQuote>,
    /// Payment records keyed by payment id.
    #[serde(default)]
    pub payments: HashMap<String, PaymentRecord>,
    /// Payer channels the hub has countersigned.
    #[serde(default)]
    pub channels: HashMap<B256, ChannelRecord>,
    /// Hub↔Payee shadow channels keyed by payee.
    #[serde(default)]
    pub hub_channels: HashMap<Address, HubChannel>,
    /// Append-only per-payee ledgers.
    #[serde(default)]
    pub payee_ledger: HashMap<Address, Vec<LedgerEntry>>,
    /// Next ledger sequence number.
    #[serde(default = "first_seq")]
    pub next_seq: u64,
}

const fn first_seq() -> u64 {
    1
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            quotes: HashMap::new(),
            payments: HashMap::new(),
            channels: HashMap::new(),
            hub_channels: HashMap::new(),
            payee_ledger: HashMap::new(),
            next_seq: first_seq(),
        }
    }
}

impl StoreState {
    /// Looks up a quote by invoice and payment id.
    #[must_use]
    pub fn quote(&self, invoice_id: &str, payment_id: &str) -> Option<&StoredQuote> {
        self.quotes.get(&quote_key(invoice_id, payment_id))
    }

    /// A payee's ledger, oldest first.
    #[must_use]
    pub fn ledger(&self, payee: &Address) -> &[LedgerEntry] {
        self.payee_ledger.get(payee).map_or(&[], Vec::as_slice)
    }

    /// Appends `entry` to the payee's ledger, assigning the next sequence
    /// number. Past [`LEDGER_MAX`] entries the oldest settled ones are
    /// dropped.
    ///
    /// Returns the assigned sequence number.
    pub fn append_ledger(&mut self, payee: Address, mut entry: LedgerEntry) -> u64 {
        let seq = self.next_seq;
        entry.seq = seq;
        self.next_seq = seq.saturating_add(1);
        let ledger = self.payee_ledger.entry(payee).or_default();
        ledger.push(entry);
        let mut excess = ledger.len().saturating_sub(LEDGER_MAX);
        if excess > 0 {
            ledger.retain(|e| {
                if excess > 0 && e.status == LedgerStatus::Settled {
                    excess -= 1;
                    false
                } else {
                    true
                }
            });
        }
        seq
    }

    /// Drops quotes created more than [`QUOTE_TTL_SECS`] before `now`.
    pub fn prune_quotes(&mut self, now: UnixTimestamp) {
        self.quotes
            .retain(|_, q| q.created_at + QUOTE_TTL_SECS >= now);
    }
}

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The state could not be encoded.
    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transactional key-value/list store.
///
/// `transact` runs its closure atomically with respect to every other store
/// operation. If the closure returns `Err`, or the backend fails to persist
/// the result, the state is left exactly as it was.
pub trait Store: Send + Sync + 'static {
    /// Runs `f` against a consistent snapshot.
    fn read<R, F>(&self, f: F) -> impl Future<Output = R> + Send
    where
        F: FnOnce(&StoreState) -> R + Send,
        R: Send;

    /// Applies `f` as a single transaction.
    fn transact<R, E, F>(&self, f: F) -> impl Future<Output = Result<R, E>> + Send
    where
        F: FnOnce(&mut StoreState) -> Result<R, E> + Send,
        R: Send,
        E: From<StoreError> + Send;

    /// Flushes and releases the backend.
    fn close(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Runtime-selected backend.
#[derive(Debug)]
pub enum StoreBackend {
    /// In-memory state.
    Memory(MemoryStore),
    /// JSON document on disk.
    File(JsonFileStore),
}

impl StoreBackend {
    /// Opens a file store at `path`, or an in-memory store when `path` is
    /// `None` or `:memory:`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file store cannot be created.
    pub async fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        match path {
            Some(p) if p != Path::new(":memory:") => {
                Ok(Self::File(JsonFileStore::open(p).await?))
            }
            _ => Ok(Self::Memory(MemoryStore::new())),
        }
    }
}

impl Store for StoreBackend {
    async fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&StoreState) -> R + Send,
        R: Send,
    {
        match self {
            Self::Memory(s) => s.read(f).await,
            Self::File(s) => s.read(f).await,
        }
    }

    async fn transact<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut StoreState) -> Result<R, E> + Send,
        R: Send,
        E: From<StoreError> + Send,
    {
        match self {
            Self::Memory(s) => s.transact(f).await,
            Self::File(s) => s.transact(f).await,
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self {
            Self::Memory(s) => s.close().await,
            Self::File(s) => s.close().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::TokenAmount;

    pub(super) fn entry(payment_id: &str) -> LedgerEntry {
        LedgerEntry {
            seq: 0,
            created_at: UnixTimestamp::from_secs(1),
            payment_id: payment_id.to_owned(),
            invoice_id: "inv".to_owned(),
            ticket_id: "tkt".to_owned(),
            amount: TokenAmount::from(1u64),
            asset: Address::ZERO,
            status: LedgerStatus::Issued,
            settle_tx: None,
            settled_at: None,
        }
    }

    #[test]
    fn test_append_ledger_assigns_global_sequence() {
        let mut state = StoreState::default();
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        assert_eq!(state.append_ledger(a, entry("p1")), 1);
        assert_eq!(state.append_ledger(b, entry("p2")), 2);
        assert_eq!(state.append_ledger(a, entry("p3")), 3);
        let seqs: Vec<u64> = state.ledger(&a).iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(state.next_seq, 4);
    }

    #[test]
    fn test_append_ledger_drops_only_settled_entries() {
        let mut state = StoreState::default();
        let payee = Address::repeat_byte(0x0c);
        for i in 0..(LEDGER_MAX + 5) {
            state.append_ledger(payee, entry(&format!("p{i}")));
        }
        let ledger = state.ledger(&payee);
        assert_eq!(ledger.len(), LEDGER_MAX + 5);
        assert_eq!(ledger[0].seq, 1);

        // Settle the first ten entries except seq 1.
        for e in state.payee_ledger.get_mut(&payee).unwrap().iter_mut().skip(1).take(10) {
            e.status = LedgerStatus::Settled;
        }
        state.append_ledger(payee, entry("next"));
        let ledger = state.ledger(&payee);
        assert_eq!(ledger.len(), LEDGER_MAX);
        assert_eq!(ledger[0].seq, 1);
        assert_eq!(ledger[0].status, LedgerStatus::Issued);
        assert_eq!(ledger[1].seq, 8);
        assert_eq!(ledger[1].status, LedgerStatus::Settled);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = StoreState::default();
        state.append_ledger(Address::repeat_byte(0x0d), entry("p1"));
        state
            .channels
            .insert(B256::repeat_byte(0x01), ChannelRecord::unseen(B256::repeat_byte(0x01)));
        let json = serde_json::to_string(&state).unwrap();
        let back: StoreState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_missing_collections_default() {
        let state: StoreState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.next_seq, 1);
        assert!(state.quotes.is_empty());
    }
}
