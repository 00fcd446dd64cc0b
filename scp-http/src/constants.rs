//! HTTP constants shared by hubs, payees and agents.

use std::time::Duration;

/// Header carrying the payment payload (agent → payee).
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// HTTP 402 Payment Required status code.
pub const HTTP_STATUS_PAYMENT_REQUIRED: u16 = 402;

/// Hub discovery document.
pub const WELL_KNOWN_PATH: &str = "/.well-known/x402";

/// Quote route.
pub const QUOTE_PATH: &str = "/v1/tickets/quote";

/// Issue route.
pub const ISSUE_PATH: &str = "/v1/tickets/issue";

/// Refund route.
pub const REFUNDS_PATH: &str = "/v1/refunds";

/// Payment status route prefix, followed by the payment id.
pub const PAYMENTS_PATH: &str = "/v1/payments";

/// Channel status route prefix, followed by the channel id.
pub const CHANNELS_PATH: &str = "/v1/channels";

/// Payee inbox route.
pub const PAYEE_INBOX_PATH: &str = "/v1/payee/inbox";

/// Payee balance route.
pub const PAYEE_BALANCE_PATH: &str = "/v1/payee/balance";

/// Payee shadow-channel route.
pub const PAYEE_CHANNEL_STATE_PATH: &str = "/v1/payee/channel-state";

/// Payee settlement route.
pub const PAYEE_SETTLE_PATH: &str = "/v1/payee/settle";

/// Agent summary route.
pub const AGENT_SUMMARY_PATH: &str = "/v1/agent/summary";

/// Opens a hub→payee channel on-chain.
pub const OPEN_PAYEE_CHANNEL_PATH: &str = "/v1/hub/open-payee-channel";

/// Registers an externally opened hub→payee channel.
pub const REGISTER_PAYEE_CHANNEL_PATH: &str = "/v1/hub/register-payee-channel";

/// Offer discovery route served next to a paid resource.
pub const PAY_DISCOVERY_PATH: &str = "/pay";

/// Default hub URL for local development.
pub const DEFAULT_HUB_URL: &str = "http://127.0.0.1:4021";

/// Default per-request timeout for outbound calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Default idle connections kept per host.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 128;
