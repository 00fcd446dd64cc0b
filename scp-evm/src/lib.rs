#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM support for the state-channel payment protocol.
//!
//! Channel states and tickets are signed with secp256k1 keys as EIP-191
//! personal messages over `abi.encode` digests, so the same signatures verify
//! off-chain at the hub and payee and on-chain in the settlement contract.
//!
//! # Modules
//!
//! - [`signing`] - Channel-state and ticket digests, signing and recovery
//! - [`contract`] - `sol!` bindings for the settlement contract and ERC-20
//! - [`chain`] - The [`ChannelContract`] and [`Payout`] collaborators
//! - [`lifecycle`] - In-memory model of the contract's lifecycle rules
//! - [`watch`] - The dispute watcher
//! - [`networks`] - Known networks, assets and amount conversion
//!
//! # Feature Flags
//!
//! - `provider` - Alloy-provider backed [`ChannelContract`] and [`Payout`]
//! - `telemetry` - Tracing events for watcher ticks and provider setup

pub mod chain;
pub mod contract;
pub mod lifecycle;
pub mod networks;
pub mod signing;
pub mod watch;

pub use chain::{ChainError, ChannelContract, OnchainChannel, Payout};
pub use lifecycle::InMemoryChannelContract;
pub use signing::SignatureError;
