use alloy_primitives::{Address, B256};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use dashmap::DashMap;
use scp::UnixTimestamp;
use scp::id::random_id;
use scp::proto::{
    DirectExtension, FeeModel, HubExtension, Offer, OfferExtensions, PaidResource,
    PaymentPayload, PaymentRequired, Receipt, ResourceData, Scheme, TokenAmount,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::OnceCell;

use crate::client::{HubClient, HubClientError};
use crate::constants::{DEFAULT_HUB_URL, PAY_DISCOVERY_PATH, PAYMENT_SIGNATURE_HEADER};
use crate::headers::decode_header_value;

use super::PaymentRejection;

/// How long an offer stays payable.
const OFFER_TTL_SECS: u64 = 120;

/// How long a fulfilled payment is re-served from cache.
///
/// Every ticket and direct state has expired by then, so a later replay is
/// rejected instead of served again.
pub const FULFILLED_RETENTION_SECS: u64 = 3_600;

/// Payee configuration.
#[derive(Debug, Clone)]
pub struct PayeeConfig {
    /// Advertised host of the resource URL.
    pub host: String,
    /// Advertised port of the resource URL.
    pub port: u16,
    /// Hub base URL.
    pub hub_url: String,
    /// CAIP-2 network of the offers.
    pub network: String,
    /// Payment asset.
    pub asset: Address,
    /// Price per request in base units.
    pub price: TokenAmount,
    /// Hub name advertised as `payTo`.
    pub hub_name: String,
    /// Path of the protected resource.
    pub resource_path: String,
    /// Skip the hub payment-status check.
    pub perf_mode: bool,
    /// Fee model advertised for the hub.
    pub fee_model: FeeModel,
}

impl Default for PayeeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4042,
            hub_url: DEFAULT_HUB_URL.into(),
            network: "eip155:8453".into(),
            asset: scp_evm::networks::USDC_BASE,
            price: TokenAmount::from(1_000_000u64),
            hub_name: "pay.eth".into(),
            resource_path: "/v1/data".into(),
            perf_mode: false,
            fee_model: FeeModel {
                base: TokenAmount::from(10u64),
                bps: 30,
            },
        }
    }
}

impl PayeeConfig {
    /// Absolute URL of the protected resource.
    #[must_use]
    pub fn resource_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.resource_path)
    }
}

/// An invoice minted for an unpaid request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    /// Invoice id (`inv_…`).
    pub invoice_id: String,
    /// Amount due.
    pub amount: TokenAmount,
    /// Asset due.
    pub asset: Address,
    /// Mint time.
    pub created_at: UnixTimestamp,
}

/// Last accepted direct state per channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectWatermark {
    /// Highest accepted nonce.
    pub nonce: u64,
    /// Payee balance in that state.
    pub bal_b: TokenAmount,
}

/// Shared payee state.
#[derive(Debug)]
pub struct PayeeState {
    pub(super) config: PayeeConfig,
    pub(super) payee: Address,
    pub(super) hub: HubClient,
    pub(super) hub_address: OnceCell<Address>,
    pub(super) invoices: DashMap<String, Invoice>,
    pub(super) fulfilled: DashMap<String, Arc<OnceCell<PaidResource>>>,
    pub(super) direct_channels: DashMap<B256, DirectWatermark>,
    last_prune: AtomicU64,
}

impl PayeeState {
    /// Creates the state for `payee`.
    ///
    /// # Errors
    ///
    /// Returns [`HubClientError`] if the hub URL is invalid.
    pub fn new(config: PayeeConfig, payee: Address) -> Result<Self, HubClientError> {
        let hub = HubClient::try_from(config.hub_url.as_str())?;
        Ok(Self::with_hub_client(config, payee, hub))
    }

    /// Creates the state with an existing hub client.
    #[must_use]
    pub fn with_hub_client(config: PayeeConfig, payee: Address, hub: HubClient) -> Self {
        Self {
            config,
            payee,
            hub,
            hub_address: OnceCell::new(),
            invoices: DashMap::new(),
            fulfilled: DashMap::new(),
            direct_channels: DashMap::new(),
            last_prune: AtomicU64::new(0),
        }
    }

    /// Payee address.
    #[must_use]
    pub const fn payee(&self) -> Address {
        self.payee
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &PayeeConfig {
        &self.config
    }

    /// Looks up an invoice.
    #[must_use]
    pub fn invoice(&self, invoice_id: &str) -> Option<Invoice> {
        self.invoices.get(invoice_id).map(|i| i.clone())
    }

    /// Last accepted direct state of `channel_id`.
    #[must_use]
    pub fn direct_watermark(&self, channel_id: B256) -> Option<DirectWatermark> {
        self.direct_channels.get(&channel_id).map(|w| *w)
    }

    /// Mints an invoice for the configured price.
    ///
    /// Expired invoices and receipts are pruned at most once per second.
    pub fn mint_invoice(&self, now: UnixTimestamp) -> Invoice {
        if self.last_prune.swap(now.as_secs(), Ordering::Relaxed) != now.as_secs() {
            self.prune(now);
        }
        let invoice = Invoice {
            invoice_id: random_id("inv"),
            amount: self.config.price,
            asset: self.config.asset,
            created_at: now,
        };
        self.invoices
            .insert(invoice.invoice_id.clone(), invoice.clone());
        invoice
    }

    /// Drops invoices whose offers have expired and receipts older than
    /// [`FULFILLED_RETENTION_SECS`]. Payments still in flight are kept.
    pub fn prune(&self, now: UnixTimestamp) {
        self.invoices
            .retain(|_, invoice| !(invoice.created_at + OFFER_TTL_SECS).is_past(now));
        self.fulfilled.retain(|_, cell| {
            cell.get().is_none_or(|paid| {
                !(paid.receipt.accepted_at + FULFILLED_RETENTION_SECS).is_past(now)
            })
        });
    }

    /// The `402` offer body for `invoice_id`.
    #[must_use]
    pub fn offers(&self, invoice_id: &str, now: UnixTimestamp) -> PaymentRequired {
        let cfg = &self.config;
        let resource = cfg.resource_url();
        let quote_expiry = now + OFFER_TTL_SECS;
        let hub = Offer {
            scheme: Scheme::Hub,
            network: cfg.network.clone(),
            asset: cfg.asset,
            max_amount_required: cfg.price,
            pay_to: cfg.hub_name.clone(),
            resource: resource.clone(),
            extensions: OfferExtensions {
                hub: Some(HubExtension {
                    hub_name: cfg.hub_name.clone(),
                    hub_endpoint: cfg.hub_url.clone(),
                    mode: "proxy_hold".into(),
                    fee_model: cfg.fee_model.clone(),
                    quote_expiry,
                    invoice_id: invoice_id.to_owned(),
                    payee_address: self.payee,
                }),
                direct: None,
            },
        };
        let direct = Offer {
            scheme: Scheme::Direct,
            network: cfg.network.clone(),
            asset: cfg.asset,
            max_amount_required: cfg.price,
            pay_to: self.payee.to_string(),
            resource,
            extensions: OfferExtensions {
                hub: None,
                direct: Some(DirectExtension {
                    mode: "direct".into(),
                    quote_expiry,
                    invoice_id: invoice_id.to_owned(),
                    payee_address: self.payee,
                }),
            },
        };
        PaymentRequired {
            accepts: vec![hub, direct],
        }
    }

    /// Validates a payment and fulfils it at most once.
    ///
    /// A payment id that was already fulfilled returns the cached body.
    /// Concurrent requests for the same id wait for the first one; if it is
    /// rejected the next waiter validates its own payload.
    ///
    /// # Errors
    ///
    /// Returns the first [`PaymentRejection`] found.
    pub async fn fulfil(
        &self,
        payment_id: &str,
        payload: Result<PaymentPayload, PaymentRejection>,
    ) -> Result<PaidResource, PaymentRejection> {
        let cell = Arc::clone(
            self.fulfilled
                .entry(payment_id.to_owned())
                .or_default()
                .value(),
        );
        let result = cell
            .get_or_try_init(|| async {
                let payload = payload?;
                self.validate(&payload).await?;
                Ok(self.receipt(&payload))
            })
            .await
            .cloned();
        if result.is_err() {
            drop(cell);
            self.fulfilled
                .remove_if(payment_id, |_, c| !c.initialized() && Arc::strong_count(c) == 1);
        }
        result
    }

    async fn validate(&self, payload: &PaymentPayload) -> Result<(), PaymentRejection> {
        let now = UnixTimestamp::now();
        match payload {
            PaymentPayload::Hub(payment) => self.validate_hub(payment, now).await,
            PaymentPayload::Direct(payment) => self.validate_direct(payment, now),
        }
    }

    fn receipt(&self, payload: &PaymentPayload) -> PaidResource {
        let (ticket_id, direct_channel_id) = match payload {
            PaymentPayload::Hub(p) => (Some(p.ticket.draft.ticket_id.clone()), None),
            PaymentPayload::Direct(p) => (None, Some(p.direct.channel_state.channel_id)),
        };
        PaidResource {
            ok: true,
            data: ResourceData {
                value: "premium-resource".into(),
                payee: self.payee,
            },
            receipt: Receipt {
                payment_id: payload.payment_id().to_owned(),
                receipt_id: random_id("rcpt"),
                accepted_at: UnixTimestamp::now(),
                ticket_id,
                direct_channel_id,
            },
        }
    }

    pub(super) async fn hub_address(&self) -> Result<Address, PaymentRejection> {
        self.hub_address
            .get_or_try_init(|| async { self.hub.well_known().await.map(|info| info.address) })
            .await
            .copied()
            .map_err(|_| PaymentRejection::HubMetadataUnavailable)
    }
}

/// Builds the payee router.
///
/// - `GET <resource_path>` - the protected resource
/// - `GET /pay` - offer discovery, always `200`
///
/// Every other method or path answers `404 {"error":"not found"}`.
pub fn payee_router(state: Arc<PayeeState>) -> axum::Router {
    let resource_path = state.config.resource_path.clone();
    let mut router = axum::Router::new().route(
        &resource_path,
        get(get_resource).fallback(not_found),
    );
    if resource_path != PAY_DISCOVERY_PATH {
        router = router.route(PAY_DISCOVERY_PATH, get(get_offers).fallback(not_found));
    }
    router.fallback(not_found).with_state(state)
}

async fn get_offers(State(state): State<Arc<PayeeState>>) -> Json<PaymentRequired> {
    let now = UnixTimestamp::now();
    let invoice = state.mint_invoice(now);
    Json(state.offers(&invoice.invoice_id, now))
}

async fn get_resource(State(state): State<Arc<PayeeState>>, headers: HeaderMap) -> Response {
    let value = headers
        .get(PAYMENT_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| decode_header_value(raw).ok());
    let Some(value) = value else {
        let now = UnixTimestamp::now();
        let invoice = state.mint_invoice(now);
        return (
            StatusCode::PAYMENT_REQUIRED,
            Json(state.offers(&invoice.invoice_id, now)),
        )
            .into_response();
    };

    let payment_id = value
        .get("paymentId")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let payload = PaymentPayload::parse(value).map_err(PaymentRejection::from);

    match state.fulfil(&payment_id, payload).await {
        Ok(body) => {
            #[cfg(feature = "telemetry")]
            tracing::info!(payment_id = %payment_id, receipt_id = %body.receipt.receipt_id, "Payment accepted");
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(rejection) => {
            #[cfg(feature = "telemetry")]
            tracing::warn!(payment_id = %payment_id, reason = %rejection, "Payment rejected");
            rejection.into_response()
        }
    }
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not found" })),
    )
        .into_response()
}
