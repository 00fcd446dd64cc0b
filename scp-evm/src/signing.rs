//! Channel-state and ticket signing.
//!
//! Every signature in the protocol is an EIP-191 personal-message signature
//! over a 32-byte digest, so wallets and the settlement contract apply the
//! same recovery rule.
//!
//! | Digest | Preimage |
//! |---|---|
//! | channel state | `abi.encode(channelId, stateNonce, balA, balB, locksRoot, stateExpiry, contextHash)` |
//! | ticket | `abi.encode(TicketDraft)` in declared field order |
//! | policy | `abi.encode(channelId, uint64 chainId, string memo)` |
//! | context | `abi.encode(payee, resource, method, invoiceId, paymentId, amount, asset)` |
//!
//! Recovery never panics: malformed signatures surface as [`SignatureError`].

use alloy_primitives::{Address, B256, Bytes, Signature, keccak256};
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::SolValue;

use scp::proto::{ChannelState, Ticket, TicketDraft, TokenAmount};

use crate::contract::{IX402StateChannel, TicketDraftAbi};

/// Length of an `r || s || v` signature.
pub const SIGNATURE_LENGTH: usize = 65;

/// Signing or recovery failure.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The signature is not 65 bytes long.
    #[error("signature must be {SIGNATURE_LENGTH} bytes, got {0}")]
    InvalidLength(usize),
    /// The signature bytes do not form a recoverable signature.
    #[error("unrecoverable signature: {0}")]
    Recovery(#[from] alloy_primitives::SignatureError),
    /// The local signer failed.
    #[error("signing failed: {0}")]
    Signing(#[from] alloy_signer::Error),
    /// The signature recovered to an unexpected address.
    #[error("signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch {
        /// Address the caller trusts.
        expected: Address,
        /// Address the signature recovered to.
        recovered: Address,
    },
}

/// Parses a hex private key, with or without `0x`.
///
/// # Errors
///
/// Returns an error if the key is not a valid secp256k1 scalar.
pub fn parse_signer(private_key: &str) -> Result<PrivateKeySigner, alloy_signer_local::LocalSignerError> {
    private_key.trim().parse()
}

/// Digest of a channel state, identical to the contract's `abi.encode` hash.
#[must_use]
pub fn channel_state_digest(state: &ChannelState) -> B256 {
    keccak256(IX402StateChannel::ChannelState::from(state).abi_encode())
}

/// Signs a channel state.
///
/// # Errors
///
/// Returns [`SignatureError::Signing`] if the signer fails.
pub fn sign_channel_state(
    state: &ChannelState,
    signer: &PrivateKeySigner,
) -> Result<Bytes, SignatureError> {
    sign_digest(channel_state_digest(state), signer)
}

/// Recovers the address that signed `state`.
///
/// # Errors
///
/// Returns [`SignatureError`] if the signature is malformed.
pub fn recover_channel_state_signer(
    state: &ChannelState,
    signature: &[u8],
) -> Result<Address, SignatureError> {
    recover_digest(channel_state_digest(state), signature)
}

/// Digest of a ticket draft.
#[must_use]
pub fn ticket_draft_digest(draft: &TicketDraft) -> B256 {
    keccak256(TicketDraftAbi::from(draft).abi_encode())
}

/// Signs a draft, producing the ticket.
///
/// # Errors
///
/// Returns [`SignatureError::Signing`] if the signer fails.
pub fn sign_ticket_draft(
    draft: TicketDraft,
    signer: &PrivateKeySigner,
) -> Result<Ticket, SignatureError> {
    let sig = sign_digest(ticket_draft_digest(&draft), signer)?;
    Ok(Ticket { draft, sig })
}

/// Recovers the address that signed `ticket`.
///
/// # Errors
///
/// Returns [`SignatureError`] if the signature is malformed.
pub fn recover_ticket_signer(ticket: &Ticket) -> Result<Address, SignatureError> {
    recover_digest(ticket_draft_digest(&ticket.draft), &ticket.sig)
}

/// Checks that `ticket` was signed by `hub`.
///
/// # Errors
///
/// Returns [`SignatureError::SignerMismatch`] when the recovered signer
/// differs, or a recovery error for malformed signatures.
pub fn verify_ticket(ticket: &Ticket, hub: Address) -> Result<(), SignatureError> {
    let recovered = recover_ticket_signer(ticket)?;
    if recovered == hub {
        Ok(())
    } else {
        Err(SignatureError::SignerMismatch {
            expected: hub,
            recovered,
        })
    }
}

/// Binds a ticket to one channel on one chain.
#[must_use]
pub fn policy_hash(channel_id: B256, chain_id: u64, memo: &str) -> B256 {
    keccak256((channel_id, chain_id, memo.to_owned()).abi_encode_params())
}

/// The request a payment is made for; hashed into `contextHash`.
#[derive(Debug, Clone, Copy)]
pub struct PaymentContext<'a> {
    /// Payee address.
    pub payee: Address,
    /// Resource URL, empty for address payments.
    pub resource: &'a str,
    /// HTTP method, or `transfer`.
    pub method: &'a str,
    /// Invoice id.
    pub invoice_id: &'a str,
    /// Payment id.
    pub payment_id: &'a str,
    /// Amount paid to the payee.
    pub amount: TokenAmount,
    /// Asset.
    pub asset: Address,
}

impl PaymentContext<'_> {
    /// `contextHash` carried in the channel state.
    #[must_use]
    pub fn hash(&self) -> B256 {
        keccak256(
            (
                self.payee,
                self.resource.to_owned(),
                self.method.to_owned(),
                self.invoice_id.to_owned(),
                self.payment_id.to_owned(),
                self.amount.inner(),
                self.asset,
            )
                .abi_encode_params(),
        )
    }
}

fn sign_digest(digest: B256, signer: &PrivateKeySigner) -> Result<Bytes, SignatureError> {
    let signature = signer.sign_message_sync(digest.as_slice())?;
    Ok(Bytes::copy_from_slice(&signature.as_bytes()))
}

fn recover_digest(digest: B256, signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(SignatureError::InvalidLength(signature.len()));
    }
    let signature = Signature::from_raw(signature)?;
    Ok(signature.recover_address_from_msg(digest.as_slice())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scp::UnixTimestamp;

    const KEY: &str = "0x59c6995e998f97a5a0044976f5d81f39bcb8c4f7f2d1b6c2c9f6f2c7d4b6f001";

    fn state() -> ChannelState {
        ChannelState {
            channel_id: B256::repeat_byte(0x11),
            state_nonce: 1,
            bal_a: TokenAmount::from(99_996_990u64),
            bal_b: TokenAmount::from(3_010u64),
            locks_root: B256::ZERO,
            state_expiry: UnixTimestamp::from_secs(1_700_000_120),
            context_hash: B256::repeat_byte(0x22),
        }
    }

    fn draft(hub: Address) -> TicketDraft {
        TicketDraft {
            ticket_id: "tkt_01".into(),
            hub,
            payee: Address::repeat_byte(0x02),
            invoice_id: "inv_01".into(),
            payment_id: "pay_01".into(),
            asset: Address::ZERO,
            amount: TokenAmount::from(1_000_000u64),
            fee_charged: TokenAmount::from(3_010u64),
            total_debit: TokenAmount::from(1_003_010u64),
            expiry: UnixTimestamp::from_secs(1_700_000_120),
            policy_hash: policy_hash(B256::repeat_byte(0x11), 8453, ""),
        }
    }

    #[test]
    fn test_channel_state_round_trip() {
        let signer = parse_signer(KEY).unwrap();
        let sig = sign_channel_state(&state(), &signer).unwrap();
        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        let recovered = recover_channel_state_signer(&state(), &sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn test_changed_state_recovers_someone_else() {
        let signer = parse_signer(KEY).unwrap();
        let sig = sign_channel_state(&state(), &signer).unwrap();
        let mut tampered = state();
        tampered.state_nonce = 2;
        let recovered = recover_channel_state_signer(&tampered, &sig).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_digest_matches_abi_encode_of_fields() {
        let s = state();
        let manual = keccak256(
            (
                s.channel_id,
                s.state_nonce,
                s.bal_a.inner(),
                s.bal_b.inner(),
                s.locks_root,
                s.state_expiry.as_secs(),
                s.context_hash,
            )
                .abi_encode_params(),
        );
        assert_eq!(channel_state_digest(&s), manual);
    }

    #[test]
    fn test_ticket_with_mutated_amount_fails_verification() {
        let signer = parse_signer(KEY).unwrap();
        let hub = signer.address();
        let mut ticket = sign_ticket_draft(draft(hub), &signer).unwrap();
        assert!(verify_ticket(&ticket, hub).is_ok());

        ticket.draft.amount = TokenAmount::from(2_000_000u64);
        assert!(matches!(
            verify_ticket(&ticket, hub),
            Err(SignatureError::SignerMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_signatures_are_errors() {
        assert!(matches!(
            recover_channel_state_signer(&state(), &[0u8; 10]),
            Err(SignatureError::InvalidLength(10))
        ));
        let mut bad = [0u8; SIGNATURE_LENGTH];
        bad[64] = 99;
        assert!(recover_channel_state_signer(&state(), &bad).is_err());
    }

    #[test]
    fn test_policy_hash_binds_chain() {
        let id = B256::repeat_byte(0x11);
        assert_ne!(policy_hash(id, 8453, ""), policy_hash(id, 1, ""));
        assert_ne!(policy_hash(id, 8453, ""), policy_hash(id, 8453, "memo"));
    }
}
