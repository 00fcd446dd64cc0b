#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the state-channel payment protocol (SCP) over x402.
//!
//! A resource server answers an unpaid request with a `402` offer. The payer
//! settles it by presenting a signed artifact: either a hub-issued ticket
//! backed by a countersigned channel state, or a direct channel state signed
//! for the payee. Value moves inside bilateral payment channels that only
//! rarely touch the settlement chain.
//!
//! This crate is chain- and transport-agnostic. Signing lives in `scp-evm`,
//! HTTP plumbing in `scp-http`.
//!
//! # Modules
//!
//! - [`error`] - Machine-readable error codes and the hub error body
//! - [`fee`] - Hub fee policy (`base + bps + gas surcharge`)
//! - [`id`] - Prefixed random identifiers (`tkt_…`, `inv_…`, `pay_…`)
//! - [`proto`] - Wire types: channel states, quotes, tickets, offers, payment payloads
//! - [`store`] - Transactional key-value/list store with memory and JSON-file backends
//! - [`timestamp`] - Unix timestamps used for every expiry in the protocol
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation in the store backends

pub mod error;
pub mod fee;
pub mod id;
pub mod proto;
pub mod store;
pub mod timestamp;

pub use error::{ErrorBody, ErrorCode};
pub use timestamp::UnixTimestamp;
