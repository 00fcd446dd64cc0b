//! A client for the hub HTTP API.
//!
//! [`HubClient`] wraps every hub endpoint used by agents and payees: discovery,
//! quote and issue, payment and channel status, the payee inbox, balance and
//! settlement, and shadow-channel management.
//!
//! ## Error Handling
//!
//! Non-`200` responses become [`HubClientError::HttpStatus`] carrying the raw
//! body; [`HubClientError::error_body`] parses it as the hub's
//! [`ErrorBody`] when possible.

use alloy_primitives::{Address, B256};
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use scp::ErrorBody;
use scp::proto::{
    AgentSummary, ChannelRecord, HubInfo, InboxPage, IssueRequest, IssueResponse,
    OpenPayeeChannelRequest, PayeeBalance, PayeeChannelResponse, PayeeChannelState,
    PaymentRecord, Quote, QuoteRequest, RefundReceipt, RefundRequest, RegisterPayeeChannelRequest,
    SettleReceipt, SettleRequest,
};
use std::fmt::Display;
use std::time::Duration;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::instrument;

use crate::constants::{DEFAULT_MAX_IDLE_PER_HOST, DEFAULT_TIMEOUT};

/// Errors that can occur while talking to a hub.
#[derive(Debug, thiserror::Error)]
pub enum HubClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

impl HubClientError {
    /// The hub's error body, when the failure was an error response.
    #[must_use]
    pub fn error_body(&self) -> Option<ErrorBody> {
        match self {
            Self::HttpStatus { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }

    /// HTTP status of an error response.
    #[must_use]
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short description for user-facing messages: the hub's `message` when
    /// available, otherwise the full error.
    #[must_use]
    pub fn reason(&self) -> String {
        self.error_body()
            .map_or_else(|| self.to_string(), |body| body.message)
    }
}

/// A client for one hub.
#[derive(Clone, Debug)]
pub struct HubClient {
    /// Base URL of the hub (e.g. `http://127.0.0.1:4021/`)
    base_url: Url,
    well_known_url: Url,
    quote_url: Url,
    issue_url: Url,
    refunds_url: Url,
    inbox_url: Url,
    balance_url: Url,
    channel_state_url: Url,
    settle_url: Url,
    summary_url: Url,
    open_payee_channel_url: Url,
    register_payee_channel_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Custom headers sent with each request
    headers: HeaderMap,
    /// Request timeout
    timeout: Option<Duration>,
}

impl HubClient {
    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> &Option<Duration> {
        &self.timeout
    }

    /// Constructs a client from a base URL.
    ///
    /// The underlying connection pool keeps up to
    /// [`DEFAULT_MAX_IDLE_PER_HOST`] idle connections and requests time out
    /// after [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, HubClientError> {
        let client = Client::builder()
            .pool_max_idle_per_host(DEFAULT_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|source| HubClientError::Http {
                context: "Failed to build HTTP client",
                source,
            })?;
        Self::with_client(base_url, client)
    }

    /// Constructs a client sharing an existing `reqwest` pool.
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if URL construction fails.
    pub fn with_client(base_url: Url, client: Client) -> Result<Self, HubClientError> {
        let join = |path: &'static str, context: &'static str| {
            base_url
                .join(path)
                .map_err(|source| HubClientError::UrlParse { context, source })
        };
        Ok(Self {
            well_known_url: join(
                "./.well-known/x402",
                "Failed to construct ./.well-known/x402 URL",
            )?,
            quote_url: join("./v1/tickets/quote", "Failed to construct quote URL")?,
            issue_url: join("./v1/tickets/issue", "Failed to construct issue URL")?,
            refunds_url: join("./v1/refunds", "Failed to construct refunds URL")?,
            inbox_url: join("./v1/payee/inbox", "Failed to construct inbox URL")?,
            balance_url: join("./v1/payee/balance", "Failed to construct balance URL")?,
            channel_state_url: join(
                "./v1/payee/channel-state",
                "Failed to construct channel-state URL",
            )?,
            settle_url: join("./v1/payee/settle", "Failed to construct settle URL")?,
            summary_url: join("./v1/agent/summary", "Failed to construct summary URL")?,
            open_payee_channel_url: join(
                "./v1/hub/open-payee-channel",
                "Failed to construct open-payee-channel URL",
            )?,
            register_payee_channel_url: join(
                "./v1/hub/register-payee-channel",
                "Failed to construct register-payee-channel URL",
            )?,
            base_url,
            client,
            headers: HeaderMap::new(),
            timeout: Some(DEFAULT_TIMEOUT),
        })
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `GET /.well-known/x402`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn well_known(&self) -> Result<HubInfo, HubClientError> {
        self.get_json(self.well_known_url.clone(), "GET /.well-known/x402")
            .await
    }

    /// `POST /v1/tickets/quote`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails or the hub rejects it.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "scp.hub_client.quote", skip_all, fields(payment_id = %request.payment_id), err)
    )]
    pub async fn quote(&self, request: &QuoteRequest) -> Result<Quote, HubClientError> {
        self.post_json(&self.quote_url, "POST /v1/tickets/quote", request)
            .await
    }

    /// `POST /v1/tickets/issue`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails or the hub rejects it.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "scp.hub_client.issue", skip_all, fields(payment_id = %request.quote.payment_id), err)
    )]
    pub async fn issue(&self, request: &IssueRequest) -> Result<IssueResponse, HubClientError> {
        self.post_json(&self.issue_url, "POST /v1/tickets/issue", request)
            .await
    }

    /// `POST /v1/refunds`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, HubClientError> {
        self.post_json(&self.refunds_url, "POST /v1/refunds", request)
            .await
    }

    /// `GET /v1/payments/{paymentId}`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError::HttpStatus`] with `404` for unknown payments.
    pub async fn payment(&self, payment_id: &str) -> Result<PaymentRecord, HubClientError> {
        let url = self.segment_url(&["v1", "payments", payment_id], "Failed to construct payment URL")?;
        self.get_json(url, "GET /v1/payments/{id}").await
    }

    /// `GET /v1/channels/{channelId}`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn channel(&self, channel_id: B256) -> Result<ChannelRecord, HubClientError> {
        let id = channel_id.to_string();
        let url = self.segment_url(&["v1", "channels", &id], "Failed to construct channel URL")?;
        self.get_json(url, "GET /v1/channels/{id}").await
    }

    /// `GET /v1/payee/inbox`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn inbox(
        &self,
        payee: Address,
        since: u64,
        limit: Option<usize>,
    ) -> Result<InboxPage, HubClientError> {
        let mut url = self.inbox_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("payee", &payee.to_string());
            query.append_pair("since", &since.to_string());
            if let Some(limit) = limit {
                query.append_pair("limit", &limit.to_string());
            }
        }
        self.get_json(url, "GET /v1/payee/inbox").await
    }

    /// `GET /v1/payee/balance`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn balance(&self, payee: Address) -> Result<PayeeBalance, HubClientError> {
        let mut url = self.balance_url.clone();
        url.query_pairs_mut()
            .append_pair("payee", &payee.to_string());
        self.get_json(url, "GET /v1/payee/balance").await
    }

    /// `GET /v1/payee/channel-state`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError::HttpStatus`] with `404` when the payee has no
    /// shadow channel.
    pub async fn payee_channel_state(
        &self,
        payee: Address,
    ) -> Result<PayeeChannelState, HubClientError> {
        let mut url = self.channel_state_url.clone();
        url.query_pairs_mut()
            .append_pair("payee", &payee.to_string());
        self.get_json(url, "GET /v1/payee/channel-state").await
    }

    /// `POST /v1/payee/settle`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails or the payout fails.
    pub async fn settle(&self, request: &SettleRequest) -> Result<SettleReceipt, HubClientError> {
        self.post_json(&self.settle_url, "POST /v1/payee/settle", request)
            .await
    }

    /// `GET /v1/agent/summary`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn agent_summary(&self, channel_id: B256) -> Result<AgentSummary, HubClientError> {
        let mut url = self.summary_url.clone();
        url.query_pairs_mut()
            .append_pair("channelId", &channel_id.to_string());
        self.get_json(url, "GET /v1/agent/summary").await
    }

    /// `POST /v1/hub/open-payee-channel`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn open_payee_channel(
        &self,
        request: &OpenPayeeChannelRequest,
    ) -> Result<PayeeChannelResponse, HubClientError> {
        self.post_json(
            &self.open_payee_channel_url,
            "POST /v1/hub/open-payee-channel",
            request,
        )
        .await
    }

    /// `POST /v1/hub/register-payee-channel`
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the request fails.
    pub async fn register_payee_channel(
        &self,
        request: &RegisterPayeeChannelRequest,
    ) -> Result<PayeeChannelResponse, HubClientError> {
        self.post_json(
            &self.register_payee_channel_url,
            "POST /v1/hub/register-payee-channel",
            request,
        )
        .await
    }

    fn segment_url(&self, segments: &[&str], context: &'static str) -> Result<Url, HubClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| HubClientError::UrlParse {
                context,
                source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, HubClientError>
    where
        T: serde::Serialize + Sync + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.post(url.clone()).json(payload);
        self.send(req, context).await
    }

    async fn get_json<R>(&self, url: Url, context: &'static str) -> Result<R, HubClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let req = self.client.get(url);
        self.send(req, context).await
    }

    async fn send<R>(
        &self,
        mut req: reqwest::RequestBuilder,
        context: &'static str,
    ) -> Result<R, HubClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| HubClientError::Http { context, source: e })?;

        let result = if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| HubClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| HubClientError::ResponseBodyRead { context, source: e })?;
            Err(HubClientError::HttpStatus {
                context,
                status,
                body,
            })
        };

        record_result(context, &result);

        result
    }
}

/// Converts a string URL into a [`HubClient`], normalizing the trailing slash.
impl TryFrom<&str> for HubClient {
    type Error = HubClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| HubClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

impl TryFrom<String> for HubClient {
    type Error = HubClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

#[cfg(feature = "telemetry")]
fn record_result<R, E: Display>(context: &'static str, result: &Result<R, E>) {
    if let Err(err) = result {
        tracing::debug!(context, error = %err, "Request to hub failed");
    }
}

#[cfg(not(feature = "telemetry"))]
const fn record_result<R, E: Display>(_context: &'static str, _result: &Result<R, E>) {}
