//! Axum route handlers for the hub service.
//!
//! Every handler validates its input, delegates to [`HubService`] and maps
//! failures through [`HubError`], so all error bodies share the
//! `{errorCode, message, retryable}` shape.

use std::sync::{Arc, LazyLock};

use alloy_primitives::{Address, B256};
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use regex::Regex;
use serde::Deserialize;

use scp::UnixTimestamp;
use scp::proto::{
    AgentSummary, ChannelRecord, HubInfo, InboxPage, IssueRequest, IssueResponse,
    OpenPayeeChannelRequest, PayeeBalance, PayeeChannelResponse, PayeeChannelState, PaymentRecord,
    Quote, QuoteRequest, RefundReceipt, RefundRequest, RegisterPayeeChannelRequest, SettleReceipt,
    SettleRequest,
};
use scp::store::StoreBackend;
use scp_http::constants::{
    AGENT_SUMMARY_PATH, ISSUE_PATH, OPEN_PAYEE_CHANNEL_PATH, PAYEE_BALANCE_PATH,
    PAYEE_CHANNEL_STATE_PATH, PAYEE_INBOX_PATH, PAYEE_SETTLE_PATH, QUOTE_PATH, REFUNDS_PATH,
    REGISTER_PAYEE_CHANNEL_PATH, WELL_KNOWN_PATH,
};

use crate::error::HubError;
use crate::service::HubService;

/// Shared application state for the hub service.
pub type HubState = Arc<HubService<StoreBackend>>;

/// Default page size of the payee inbox.
const DEFAULT_INBOX_LIMIT: usize = 50;

/// Largest page the payee inbox returns.
const MAX_INBOX_LIMIT: usize = 500;

static CHANNEL_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^0x[0-9a-fA-F]{64}$").expect("valid regex"));

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^0x[0-9a-fA-F]{40}$").expect("valid regex"));

/// Query of the payee read endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PayeeQuery {
    payee: Option<String>,
    since: Option<String>,
    limit: Option<String>,
}

/// Query of `GET /v1/agent/summary`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryQuery {
    channel_id: Option<String>,
}

fn parse_channel_id(raw: &str) -> Result<B256, HubError> {
    if !CHANNEL_ID_RE.is_match(raw) {
        return Err(HubError::Policy("invalid channel id".to_owned()));
    }
    raw.parse()
        .map_err(|_| HubError::Policy("invalid channel id".to_owned()))
}

fn parse_payee(raw: Option<&str>, message: &str) -> Result<Address, HubError> {
    raw.filter(|p| ADDRESS_RE.is_match(p))
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| HubError::Policy(message.to_owned()))
}

fn parse_limit(raw: Option<&str>) -> usize {
    raw.and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_INBOX_LIMIT)
        .clamp(1, MAX_INBOX_LIMIT)
}

fn parse_since(raw: Option<&str>) -> Result<u64, HubError> {
    raw.map_or(Ok(0), |s| {
        s.trim()
            .parse()
            .map_err(|_| HubError::Policy("since must be a non-negative integer".to_owned()))
    })
}

/// `GET /.well-known/x402`: Hub identity and fee policy.
pub async fn get_well_known(State(hub): State<HubState>) -> Json<HubInfo> {
    Json(hub.info())
}

/// `POST /v1/tickets/quote`: Prices a payment.
///
/// # Errors
///
/// Returns 400 on bad input or `fee > maxFee`, 409 if the payment was issued.
pub async fn post_quote(
    State(hub): State<HubState>,
    body: Result<Json<QuoteRequest>, JsonRejection>,
) -> Result<Json<Quote>, HubError> {
    let Json(request) = body?;
    let quote = hub.quote(&request, UnixTimestamp::now()).await?;
    Ok(Json(quote))
}

/// `POST /v1/tickets/issue`: Redeems a quote for a signed ticket.
///
/// # Errors
///
/// Returns 401 on a bad payer signature, 409 on any replay, expiry, nonce or
/// balance conflict.
pub async fn post_issue(
    State(hub): State<HubState>,
    body: Result<Json<IssueRequest>, JsonRejection>,
) -> Result<Json<IssueResponse>, HubError> {
    let Json(request) = body?;
    let response = hub.issue(&request, UnixTimestamp::now()).await?;
    Ok(Json(response))
}

/// `POST /v1/refunds`
///
/// # Errors
///
/// Returns 400 when `ticketId` is missing.
pub async fn post_refund(
    State(hub): State<HubState>,
    body: Result<Json<RefundRequest>, JsonRejection>,
) -> Result<Json<RefundReceipt>, HubError> {
    let Json(request) = body?;
    Ok(Json(hub.refund(&request)?))
}

/// `GET /v1/payments/{id}`
///
/// # Errors
///
/// Returns 404 for unknown payments.
pub async fn get_payment(
    State(hub): State<HubState>,
    Path(payment_id): Path<String>,
) -> Result<Json<PaymentRecord>, HubError> {
    Ok(Json(hub.payment(&payment_id).await?))
}

/// `GET /v1/channels/{id}`
///
/// # Errors
///
/// Returns 400 when `id` is not a 32-byte hex string.
pub async fn get_channel(
    State(hub): State<HubState>,
    Path(channel_id): Path<String>,
) -> Result<Json<ChannelRecord>, HubError> {
    let channel_id = parse_channel_id(&channel_id)?;
    Ok(Json(hub.channel(channel_id).await))
}

/// `GET /v1/payee/inbox?payee&since&limit`
///
/// # Errors
///
/// Returns 400 on a malformed `payee` or `since`.
pub async fn get_inbox(
    State(hub): State<HubState>,
    query: Result<Query<PayeeQuery>, QueryRejection>,
) -> Result<Json<InboxPage>, HubError> {
    let Query(query) = query?;
    let payee = parse_payee(query.payee.as_deref(), "payee query must be 0x address")?;
    let since = parse_since(query.since.as_deref())?;
    let limit = parse_limit(query.limit.as_deref());
    Ok(Json(hub.inbox(payee, since, limit).await))
}

/// `GET /v1/payee/balance?payee`
///
/// # Errors
///
/// Returns 400 on a malformed `payee`.
pub async fn get_balance(
    State(hub): State<HubState>,
    query: Result<Query<PayeeQuery>, QueryRejection>,
) -> Result<Json<PayeeBalance>, HubError> {
    let Query(query) = query?;
    let payee = parse_payee(query.payee.as_deref(), "payee query must be 0x address")?;
    Ok(Json(hub.balance(payee).await))
}

/// `GET /v1/payee/channel-state?payee`
///
/// # Errors
///
/// Returns 400 on a malformed `payee`, 404 without a shadow channel.
pub async fn get_payee_channel_state(
    State(hub): State<HubState>,
    query: Result<Query<PayeeQuery>, QueryRejection>,
) -> Result<Json<PayeeChannelState>, HubError> {
    let Query(query) = query?;
    let payee = parse_payee(query.payee.as_deref(), "payee query must be 0x address")?;
    Ok(Json(hub.payee_channel_state(payee).await?))
}

/// `GET /v1/agent/summary?channelId`
///
/// # Errors
///
/// Returns 400 when `channelId` is missing or malformed.
pub async fn get_agent_summary(
    State(hub): State<HubState>,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> Result<Json<AgentSummary>, HubError> {
    let Query(query) = query?;
    let raw = query
        .channel_id
        .ok_or_else(|| HubError::Policy("channelId required".to_owned()))?;
    let channel_id = parse_channel_id(&raw)?;
    Ok(Json(hub.agent_summary(channel_id).await))
}

/// `POST /v1/hub/open-payee-channel`
///
/// # Errors
///
/// Returns 503 without a chain provider, 500 if the open transaction fails.
pub async fn post_open_payee_channel(
    State(hub): State<HubState>,
    body: Result<Json<OpenPayeeChannelRequest>, JsonRejection>,
) -> Result<Json<PayeeChannelResponse>, HubError> {
    let Json(request) = body?;
    let response = hub
        .open_payee_channel(&request, UnixTimestamp::now())
        .await?;
    Ok(Json(response))
}

/// `POST /v1/hub/register-payee-channel`
///
/// # Errors
///
/// Returns 400 on bad input.
pub async fn post_register_payee_channel(
    State(hub): State<HubState>,
    body: Result<Json<RegisterPayeeChannelRequest>, JsonRejection>,
) -> Result<Json<PayeeChannelResponse>, HubError> {
    let Json(request) = body?;
    Ok(Json(hub.register_payee_channel(&request).await?))
}

/// `POST /v1/payee/settle`: Pays out a payee's unsettled earnings.
///
/// # Errors
///
/// Returns 503 without a payout sender, 500 if the transfer fails.
pub async fn post_settle(
    State(hub): State<HubState>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<SettleReceipt>, HubError> {
    let Json(raw) = body?;
    let payee = parse_payee(
        raw.get("payee").and_then(serde_json::Value::as_str),
        "payee must be 0x address",
    )?;
    let asset = raw
        .get("asset")
        .and_then(serde_json::Value::as_str)
        .and_then(|a| a.parse().ok());
    let request = SettleRequest { payee, asset };
    Ok(Json(hub.settle(&request, UnixTimestamp::now()).await?))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn not_found() -> HubError {
    HubError::RouteNotFound
}

/// Creates an Axum [`axum::Router`] with all hub endpoints.
///
/// Unmatched paths answer 404 with a policy-violation error body.
pub fn hub_router(state: HubState) -> axum::Router {
    axum::Router::new()
        .route(WELL_KNOWN_PATH, get(get_well_known))
        .route(QUOTE_PATH, post(post_quote))
        .route(ISSUE_PATH, post(post_issue))
        .route(REFUNDS_PATH, post(post_refund))
        .route("/v1/payments/{id}", get(get_payment))
        .route("/v1/channels/{id}", get(get_channel))
        .route(PAYEE_INBOX_PATH, get(get_inbox))
        .route(PAYEE_BALANCE_PATH, get(get_balance))
        .route(PAYEE_CHANNEL_STATE_PATH, get(get_payee_channel_state))
        .route(PAYEE_SETTLE_PATH, post(post_settle))
        .route(AGENT_SUMMARY_PATH, get(get_agent_summary))
        .route(OPEN_PAYEE_CHANNEL_PATH, post(post_open_payee_channel))
        .route(REGISTER_PAYEE_CHANNEL_PATH, post(post_register_payee_channel))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use alloy_signer_local::PrivateKeySigner;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use scp::proto::{ChannelState, TokenAmount};
    use scp::store::MemoryStore;
    use scp_evm::signing::sign_channel_state;
    use tower::ServiceExt;

    use crate::config::HubConfig;

    fn state() -> HubState {
        let config = HubConfig::default();
        let signer = scp_evm::signing::parse_signer(&config.signer_private_key).unwrap();
        Arc::new(HubService::new(
            config,
            signer,
            StoreBackend::Memory(MemoryStore::new()),
        ))
    }

    async fn call(
        router: &axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn quote_body(payment_id: &str, channel_id: B256, payee: Address) -> serde_json::Value {
        serde_json::json!({
            "invoiceId": "inv_1",
            "paymentId": payment_id,
            "channelId": channel_id,
            "payee": payee,
            "asset": Address::ZERO,
            "amount": "1000000",
            "maxFee": "5000",
            "quoteExpiry": UnixTimestamp::now().as_secs() + 600,
        })
    }

    fn issue_body(quote: serde_json::Value, key: &PrivateKeySigner, channel_id: B256) -> serde_json::Value {
        let total: TokenAmount = quote["totalDebit"].as_str().unwrap().parse().unwrap();
        let state = ChannelState {
            channel_id,
            state_nonce: 1,
            bal_a: TokenAmount::from(100_000_000u64).checked_sub(total).unwrap(),
            bal_b: total,
            locks_root: B256::ZERO,
            state_expiry: UnixTimestamp::now() + 120,
            context_hash: B256::ZERO,
        };
        let sig_a: Bytes = sign_channel_state(&state, key).unwrap();
        serde_json::json!({ "quote": quote, "channelState": state, "sigA": sig_a })
    }

    #[tokio::test]
    async fn test_well_known_and_health() {
        let router = hub_router(state());
        let (status, info) = call(&router, "GET", WELL_KNOWN_PATH, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["hubName"], "pay.eth");
        assert_eq!(info["schemes"][0], "statechannel-hub-v1");
        assert_eq!(info["feePolicy"]["bps"], 30);

        let (status, health) = call(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_quote_issue_and_replay_over_http() {
        let router = hub_router(state());
        let key = PrivateKeySigner::random();
        let channel_id = B256::repeat_byte(0x11);
        let payee = Address::repeat_byte(0xbb);

        let (status, quote) =
            call(&router, "POST", QUOTE_PATH, Some(quote_body("pay_1", channel_id, payee))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quote["fee"], "3010");
        assert_eq!(quote["feeBreakdown"]["variable"], "3000");

        let body = issue_body(quote, &key, channel_id);
        let (status, ticket) = call(&router, "POST", ISSUE_PATH, Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ticket["paymentId"], "pay_1");
        assert_eq!(ticket["channelAck"]["stateNonce"], 1);

        let (status, err) = call(&router, "POST", ISSUE_PATH, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["errorCode"], "SCP_006_PAYMENT_CONSUMED");
        assert_eq!(err["retryable"], false);

        let (status, payment) = call(&router, "GET", "/v1/payments/pay_1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(payment["status"], "issued");

        let uri = format!("/v1/channels/{channel_id}");
        let (_, channel) = call(&router, "GET", &uri, None).await;
        assert_eq!(channel["latestNonce"], 1);
        assert_eq!(channel["payer"], serde_json::json!(key.address()));

        let uri = format!("{PAYEE_INBOX_PATH}?payee={payee}&since=0&limit=0");
        let (status, inbox) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(inbox["count"], 1);
        assert_eq!(inbox["nextCursor"], 1);

        let uri = format!("{AGENT_SUMMARY_PATH}?channelId={channel_id}");
        let (_, summary) = call(&router, "GET", &uri, None).await;
        assert_eq!(summary["totalDebit"], "1003010");
    }

    #[tokio::test]
    async fn test_issue_channel_mismatch_is_409_policy() {
        let router = hub_router(state());
        let key = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let (_, quote) = call(
            &router,
            "POST",
            QUOTE_PATH,
            Some(quote_body("pay_1", B256::repeat_byte(0x11), payee)),
        )
        .await;
        let body = issue_body(quote, &key, B256::repeat_byte(0x22));
        let (status, err) = call(&router, "POST", ISSUE_PATH, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["errorCode"], "SCP_009_POLICY_VIOLATION");
        assert_eq!(err["message"], "channel mismatch");
    }

    #[tokio::test]
    async fn test_fee_above_max_is_rejected() {
        let router = hub_router(state());
        let mut body = quote_body("pay_1", B256::repeat_byte(0x11), Address::repeat_byte(0xbb));
        body["maxFee"] = serde_json::json!("3009");
        let (status, err) = call(&router, "POST", QUOTE_PATH, Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["errorCode"], "SCP_003_FEE_EXCEEDS_MAX");
        assert_eq!(err["message"], "fee > maxFee");
    }

    #[tokio::test]
    async fn test_input_validation() {
        let router = hub_router(state());
        let (status, err) = call(&router, "GET", "/v1/channels/0x1234", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["message"], "invalid channel id");

        let uri = format!("{PAYEE_INBOX_PATH}?payee=alice");
        let (status, err) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["message"], "payee query must be 0x address");

        let (status, err) = call(&router, "GET", AGENT_SUMMARY_PATH, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["message"], "channelId required");

        let (status, err) = call(
            &router,
            "POST",
            PAYEE_SETTLE_PATH,
            Some(serde_json::json!({ "payee": "bob" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["message"], "payee must be 0x address");

        let (status, err) = call(&router, "POST", QUOTE_PATH, Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["errorCode"], "SCP_009_POLICY_VIOLATION");
    }

    #[tokio::test]
    async fn test_unknown_lookups() {
        let router = hub_router(state());
        let (status, err) = call(&router, "GET", "/v1/payments/pay_404", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["errorCode"], "SCP_007_CHANNEL_NOT_FOUND");

        let uri = format!("/v1/channels/{}", B256::repeat_byte(0x42));
        let (status, channel) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(channel["latestNonce"], 0);
        assert_eq!(channel["status"], "open");

        let uri = format!("{PAYEE_CHANNEL_STATE_PATH}?payee={}", Address::repeat_byte(0xbb));
        let (status, _) = call(&router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, err) = call(&router, "GET", "/v1/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["message"], "route not found");
        assert_eq!(err["errorCode"], "SCP_009_POLICY_VIOLATION");
    }

    #[tokio::test]
    async fn test_settle_without_provider_is_503() {
        let router = hub_router(state());
        let payee = Address::repeat_byte(0xbb);
        let (status, err) = call(
            &router,
            "POST",
            PAYEE_SETTLE_PATH,
            Some(serde_json::json!({ "payee": payee })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err["errorCode"], "SCP_010_SETTLEMENT_UNAVAILABLE");
        assert_eq!(err["retryable"], true);
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(parse_limit(None), 50);
        assert_eq!(parse_limit(Some("0")), 1);
        assert_eq!(parse_limit(Some("9999")), 500);
        assert_eq!(parse_limit(Some("abc")), 50);
        assert!(parse_since(Some("-1")).is_err());
    }
}
