//! Agent error type.

use alloy_primitives::B256;
use reqwest::StatusCode;

use scp::proto::TokenAmount;
use scp_evm::{ChainError, SignatureError};
use scp_http::HttpError;
use scp_http::client::HubClientError;

/// Errors returned by [`crate::ScpAgent`] operations.
///
/// Messages are written for the operator running the CLI; several carry a
/// hint on how to fix the situation.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The offer asks for more than the agent is willing to pay.
    #[error("amount exceeds maxAmount policy ({amount} > {max})")]
    AmountExceedsMax {
        /// Requested amount.
        amount: TokenAmount,
        /// Configured ceiling.
        max: TokenAmount,
    },

    /// No local channel for the counterparty and dev mode is off.
    ///
    /// The message is a setup hint when the hub could be reached.
    #[error("{0}")]
    NoChannel(String),

    /// The debit is larger than the payer balance of the channel.
    #[error(
        "Insufficient channel balance: need {need} but have {have}. Top up with: scp-agent fund {channel_id} <amount>"
    )]
    InsufficientBalance {
        /// Channel that would be debited.
        channel_id: B256,
        /// Requested debit.
        need: TokenAmount,
        /// Current `balA`.
        have: TokenAmount,
    },

    /// The hub refused or failed to quote. No channel state was produced.
    #[error("quote failed: {0}")]
    Quote(#[source] HubClientError),

    /// The hub refused or failed to issue the ticket.
    #[error("issue failed: {0}")]
    Issue(#[source] HubClientError),

    /// The hub's countersignature does not cover the proposed state.
    #[error("hub channel ack rejected: {0}")]
    BadChannelAck(String),

    /// The resource server rejected a hub payment.
    #[error("payee rejected payment: {status} {body}")]
    PayeeRejected {
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: String,
    },

    /// The resource server rejected a direct payment.
    #[error("payee rejected direct payment: {status} {body}")]
    DirectRejected {
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: String,
    },

    /// The resource answered discovery with something other than `402`.
    #[error("expected 402, got {0}")]
    UnexpectedStatus(StatusCode),

    /// None of the offers passed the allowlists.
    #[error("No compatible payment offers from payee.")]
    NoOffers,

    /// The requested route is not offered.
    #[error("Payee does not offer \"{route}\" route. Available: {available}")]
    RouteUnavailable {
        /// Requested route.
        route: &'static str,
        /// Routes on offer, comma-separated.
        available: String,
    },

    /// The offer lacks the extension of its own scheme.
    #[error("offer for {0} has no scheme extension")]
    MalformedOffer(&'static str),

    /// No channel with that id in the agent state.
    #[error("Channel {0} not found in agent state.")]
    UnknownChannel(B256),

    /// A direct channel has no endpoint to pay through yet.
    #[error("No endpoint stored for direct channel {0}. Pay a URL first with: scp-agent pay <url> direct")]
    NoEndpoint(B256),

    /// The channel key is neither a hub nor a direct channel.
    #[error("Unknown channel type (key={0}).")]
    UnsupportedChannel(String),

    /// Closing needs a counterparty signature the agent does not hold.
    #[error(
        "no counterparty signature available; request cooperative close from hub or use challenge watcher"
    )]
    NoCounterpartySignature,

    /// On-chain operation without a configured contract.
    #[error("on-chain operations need RPC_URL and CONTRACT_ADDRESS")]
    NoContract,

    /// Balance arithmetic overflowed.
    #[error("amount overflow")]
    Overflow,

    /// Hub request outside of quote and issue.
    #[error(transparent)]
    Hub(#[from] HubClientError),

    /// Transport failure talking to a resource server.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid endpoint URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Payment header encoding failed.
    #[error(transparent)]
    Header(#[from] HttpError),

    /// The configured private key is invalid.
    #[error("invalid private key: {0}")]
    Key(#[from] alloy_signer_local::LocalSignerError),

    /// Signing failed.
    #[error(transparent)]
    Signing(#[from] SignatureError),

    /// A contract call failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The state file could not be read or written.
    #[error("agent state: {0}")]
    Io(#[from] std::io::Error),

    /// The state file could not be encoded.
    #[error("agent state: {0}")]
    Json(#[from] serde_json::Error),
}
