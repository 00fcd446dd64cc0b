//! State-channel payment hub.
//!
//! The hub quotes and issues tickets against payer channel states,
//! countersigns those states, keeps an append-only ledger per payee and pays
//! out accumulated earnings on demand.
//!
//! # Modules
//!
//! - [`config`] - Server configuration with environment variable expansion
//! - [`error`] - Hub error type and its HTTP mapping
//! - [`handlers`] - Axum route handlers and router builder
//! - [`service`] - The hub operations over a [`scp::store::Store`]
//! - [`util`] - Graceful shutdown

pub mod config;
pub mod error;
pub mod handlers;
pub mod service;
pub mod util;

pub use config::HubConfig;
pub use error::HubError;
pub use handlers::{HubState, hub_router};
pub use service::HubService;
