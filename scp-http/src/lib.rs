#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! HTTP transport for the state-channel payment protocol.
//!
//! Provides the `PAYMENT-SIGNATURE` header codec, route constants and
//! (feature-gated) a hub HTTP client and the payee-side validator and router.
//!
//! # Modules
//!
//! - [`constants`] - Header names, hub routes, default URLs and client limits
//! - [`headers`] - Raw-JSON / Base64 codec for the payment header
//! - [`error`] - Header codec error types
//! - [`client`] - Hub HTTP client (feature: `client`)
//! - [`server`] - Payee validator, router and one-call verifier (feature: `server`)
//!
//! # Feature Flags
//!
//! - `client` - [`client::HubClient`] over `reqwest`
//! - `server` - Payee axum router and validators
//! - `telemetry` - Tracing events for payee decisions and hub requests

pub mod constants;
pub mod error;
pub mod headers;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "server")]
pub mod server;

pub use error::HttpError;
