#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Payer agent for the state-channel payment protocol.
//!
//! The agent pays for HTTP resources that answer `402 Payment Required`
//! with state-channel offers. A hub offer is paid by quoting a fee at the
//! hub, signing the next state of the agent's channel with the hub, and
//! presenting the resulting ticket. A direct offer is paid by handing the
//! payee a signed state of a channel opened with it.
//!
//! Channels, proposed nonces, payments and countersigned proofs live in a
//! JSON state file that the dispute watcher can read.
//!
//! # Modules
//!
//! - [`client`] - [`ScpAgent`] and its payment and channel operations
//! - [`state`] - The persisted agent state
//! - [`options`] - Agent settings and per-call overrides
//! - [`error`] - [`AgentError`]
//!
//! # Example
//!
//! ```no_run
//! use scp_agent::{AgentOptions, PayOptions, ScpAgent};
//!
//! # async fn run() -> Result<(), scp_agent::AgentError> {
//! let agent = ScpAgent::open(AgentOptions::default()).await?;
//! let outcome = agent
//!     .pay_resource("http://127.0.0.1:4042/v1/data", &PayOptions::default())
//!     .await?;
//! println!("paid {} + {} fee", outcome.amount, outcome.fee);
//! # Ok(())
//! # }
//! ```
//!
//! # Feature Flags
//!
//! - `chain-eip155` - Lets the `scp-agent` binary open, fund and close
//!   channels through an RPC endpoint

pub mod client;
pub mod error;
pub mod options;
pub mod state;

pub use client::{
    ClosedChannel, CloseMethod, FundedChannel, OpenedChannel, PaymentOutcome, ScpAgent,
    choose_offer, setup_hint,
};
pub use error::AgentError;
pub use options::{AddressPayment, AgentOptions, OpenOptions, PayOptions};
