//! Solidity interface definitions for the settlement contract and payouts.
//!
//! - [`IX402StateChannel`] - The bilateral channel contract
//! - [`IERC20`] - Token `transfer` used by hub payouts

use alloy_sol_types::sol;

use scp::proto::TokenAmount;

sol! {
    /// Bilateral payment-channel settlement contract.
    ///
    /// `ChannelState` is hashed with `abi.encode` of its seven fields; the
    /// off-chain digest in [`crate::signing`] must stay bit-identical.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IX402StateChannel {
        struct ChannelState {
            bytes32 channelId;
            uint64 stateNonce;
            uint256 balA;
            uint256 balB;
            bytes32 locksRoot;
            uint64 stateExpiry;
            bytes32 contextHash;
        }

        struct ChannelParams {
            address participantA;
            address participantB;
            address asset;
            uint64 challengePeriodSec;
            uint64 channelExpiry;
            uint256 totalBalance;
            bool isClosing;
            uint64 closeDeadline;
            uint64 latestNonce;
        }

        event ChannelOpened(
            bytes32 indexed channelId,
            address indexed participantA,
            address indexed participantB,
            address asset,
            uint64 challengePeriodSec,
            uint64 channelExpiry
        );
        event Deposited(bytes32 indexed channelId, address indexed sender, uint256 amount, uint256 newTotalBalance);
        event ChannelClosed(bytes32 indexed channelId, uint64 stateNonce, uint256 payoutA, uint256 payoutB);

        function openChannel(
            address participantB,
            address asset,
            uint256 amount,
            uint64 challengePeriodSec,
            uint64 channelExpiry,
            bytes32 salt
        ) external payable returns (bytes32 channelId);
        function deposit(bytes32 channelId, uint256 amount) external payable;
        function cooperativeClose(ChannelState st, bytes sigA, bytes sigB) external;
        function startClose(ChannelState st, bytes sigFromCounterparty) external;
        function challenge(ChannelState newer, bytes sigFromCounterparty) external;
        function finalizeClose(bytes32 channelId) external;
        function getChannel(bytes32 channelId) external view returns (ChannelParams params);
    }
}

sol! {
    /// Minimal ERC-20 surface used for payee payouts.
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IERC20 {
        function transfer(address to, uint256 value) external returns (bool);
        function balanceOf(address account) external view returns (uint256);
    }
}

sol! {
    /// Declared-order ticket layout; its `abi.encode` is the ticket digest preimage.
    #[allow(missing_docs)]
    #[derive(Debug)]
    struct TicketDraftAbi {
        string ticketId;
        address hub;
        address payee;
        string invoiceId;
        string paymentId;
        address asset;
        uint256 amount;
        uint256 feeCharged;
        uint256 totalDebit;
        uint64 expiry;
        bytes32 policyHash;
    }
}

impl From<&scp::proto::ChannelState> for IX402StateChannel::ChannelState {
    fn from(state: &scp::proto::ChannelState) -> Self {
        Self {
            channelId: state.channel_id,
            stateNonce: state.state_nonce,
            balA: state.bal_a.inner(),
            balB: state.bal_b.inner(),
            locksRoot: state.locks_root,
            stateExpiry: state.state_expiry.as_secs(),
            contextHash: state.context_hash,
        }
    }
}

impl From<&scp::proto::TicketDraft> for TicketDraftAbi {
    fn from(draft: &scp::proto::TicketDraft) -> Self {
        Self {
            ticketId: draft.ticket_id.clone(),
            hub: draft.hub,
            payee: draft.payee,
            invoiceId: draft.invoice_id.clone(),
            paymentId: draft.payment_id.clone(),
            asset: draft.asset,
            amount: draft.amount.inner(),
            feeCharged: draft.fee_charged.inner(),
            totalDebit: draft.total_debit.inner(),
            expiry: draft.expiry.as_secs(),
            policyHash: draft.policy_hash,
        }
    }
}

impl From<IX402StateChannel::ChannelParams> for crate::chain::OnchainChannel {
    fn from(p: IX402StateChannel::ChannelParams) -> Self {
        Self {
            participant_a: p.participantA,
            participant_b: p.participantB,
            asset: p.asset,
            challenge_period_sec: p.challengePeriodSec,
            channel_expiry: scp::UnixTimestamp::from_secs(p.channelExpiry),
            total_balance: TokenAmount::new(p.totalBalance),
            is_closing: p.isClosing,
            close_deadline: scp::UnixTimestamp::from_secs(p.closeDeadline),
            latest_nonce: p.latestNonce,
        }
    }
}
