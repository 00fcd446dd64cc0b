//! The payer agent.
//!
//! [`ScpAgent`] discovers offers, keeps one local channel per counterparty,
//! proposes and signs channel states, and presents hub tickets or direct
//! states to resource servers. Every proposed state and every countersigned
//! proof is written to the state file before the call that depends on it
//! returns.

use alloy_primitives::{Address, B256, Bytes, U256, hex};
use alloy_signer_local::PrivateKeySigner;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

use scp::UnixTimestamp;
use scp::fee::FeePolicy;
use scp::id::random_id;
use scp::proto::{
    ChannelAck, ChannelProof, ChannelState, ChannelStatus, DirectPayment, DirectPaymentBody,
    HubInfo, HubPayment, IssueRequest, IssueResponse, Offer, PaidResource, PaymentPayload,
    PaymentRequired, Quote, QuoteRequest, Scheme, Ticket, TokenAmount,
};
use scp_evm::chain::OpenChannelRequest;
use scp_evm::signing::{
    PaymentContext, channel_state_digest, parse_signer, recover_channel_state_signer,
    sign_channel_state,
};
use scp_evm::ChannelContract;
use scp_http::client::HubClient;
use scp_http::constants::{PAY_DISCOVERY_PATH, PAYMENT_SIGNATURE_HEADER};
use scp_http::headers::encode_payment_signature;

use crate::error::AgentError;
use crate::options::{
    AddressPayment, AgentOptions, DEFAULT_CHALLENGE_PERIOD_SECS, DEFAULT_CHANNEL_TTL_SECS,
    DEV_PRIVATE_KEY, OpenOptions, PayOptions,
};
use crate::state::{
    AgentState, LocalChannel, PaymentEntry, STATE_TTL_SECS, StateFile, direct_key, hub_key,
    onchain_key,
};

/// Outcome of a payment.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    /// Route taken.
    pub route: Scheme,
    /// Payment id.
    pub payment_id: String,
    /// Payee credited.
    pub payee: Address,
    /// Amount credited.
    pub amount: TokenAmount,
    /// Hub fee; zero for direct payments.
    pub fee: TokenAmount,
    /// The signed channel state.
    pub state: ChannelState,
    /// Hub quote.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<Quote>,
    /// Hub ticket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<Ticket>,
    /// Hub countersignature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_ack: Option<ChannelAck>,
    /// Resource server response; absent for address payments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<PaidResource>,
}

/// A channel opened on-chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenedChannel {
    /// Id from the `ChannelOpened` event.
    pub channel_id: B256,
    /// This agent.
    pub participant_a: Address,
    /// Counterparty.
    pub participant_b: Address,
    /// Asset.
    pub asset: Address,
    /// Initial deposit.
    pub amount: TokenAmount,
    /// Challenge window.
    pub challenge_period_sec: u64,
    /// Transaction hash.
    pub tx_hash: B256,
}

/// A deposit into an existing channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundedChannel {
    /// Channel.
    pub channel_id: B256,
    /// Amount added.
    pub deposited: TokenAmount,
    /// Balance reported by the `Deposited` event.
    pub new_total_balance: Option<TokenAmount>,
    /// Transaction hash.
    pub tx_hash: B256,
}

/// How a channel was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseMethod {
    /// Both signatures, paid out immediately.
    Cooperative,
    /// `startClose`, paid out after the challenge window.
    Unilateral,
}

/// A submitted close.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedChannel {
    /// Channel.
    pub channel_id: B256,
    /// Close path taken.
    pub method: CloseMethod,
    /// Transaction hash.
    pub tx_hash: B256,
}

/// What a hub transfer needs besides the channel.
struct Transfer<'a> {
    endpoint: &'a str,
    payee: Address,
    asset: Address,
    amount: TokenAmount,
    invoice_id: String,
    payment_id: String,
    max_fee: TokenAmount,
    context_hash: B256,
}

/// Quote, signed state and issue result of a hub transfer.
struct Issued {
    quote: Quote,
    state: ChannelState,
    sig_a: Bytes,
    response: IssueResponse,
}

/// The payer agent.
pub struct ScpAgent {
    signer: PrivateKeySigner,
    options: AgentOptions,
    http: Client,
    file: StateFile,
    state: Mutex<AgentState>,
    contract: Option<Arc<dyn ChannelContract>>,
    /// Hub signer addresses by endpoint.
    hub_signers: DashMap<String, Address>,
}

impl std::fmt::Debug for ScpAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScpAgent")
            .field("address", &self.signer.address())
            .field("state_file", &self.file.path())
            .field("dev_mode", &self.options.dev_mode)
            .field("contract", &self.contract.as_ref().map(|c| c.caller()))
            .finish_non_exhaustive()
    }
}

impl ScpAgent {
    /// Loads the state file and builds the HTTP pool.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError`] for an invalid key, an unreadable state
    /// directory or an HTTP client that cannot be built.
    pub async fn open(options: AgentOptions) -> Result<Self, AgentError> {
        let signer = parse_signer(options.private_key.as_deref().unwrap_or(DEV_PRIVATE_KEY))?;
        let http = Client::builder()
            .timeout(options.timeout)
            .pool_max_idle_per_host(options.max_sockets)
            .build()?;
        let file = StateFile::in_dir(&options.state_dir);
        let state = file.load().await?;
        tracing::debug!(
            address = %signer.address(),
            path = %file.path().display(),
            channels = state.channels.len(),
            "agent state loaded"
        );
        Ok(Self {
            signer,
            options,
            http,
            file,
            state: Mutex::new(state),
            contract: None,
            hub_signers: DashMap::new(),
        })
    }

    /// Uses `contract` for on-chain operations.
    #[must_use]
    pub fn with_contract(mut self, contract: Arc<dyn ChannelContract>) -> Self {
        self.contract = Some(contract);
        self
    }

    /// Payer address.
    #[must_use]
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Settings.
    #[must_use]
    pub const fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Location of the state file.
    #[must_use]
    pub fn state_path(&self) -> &std::path::Path {
        self.file.path()
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> AgentState {
        self.state.lock().await.clone()
    }

    /// All local channels with their keys.
    pub async fn list_channels(&self) -> Vec<(String, LocalChannel)> {
        self.state
            .lock()
            .await
            .channels
            .iter()
            .map(|(key, ch)| (key.clone(), ch.clone()))
            .collect()
    }

    /// All recorded payments by id.
    pub async fn payments(&self) -> BTreeMap<String, PaymentEntry> {
        self.state.lock().await.payments.clone()
    }

    /// `GET /.well-known/x402` of the hub at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Hub`] if the hub cannot be reached.
    pub async fn hub_info(&self, endpoint: &str) -> Result<HubInfo, AgentError> {
        Ok(self.hub_client(endpoint)?.well_known().await?)
    }

    /// Proposes the next state of the channel under `key`.
    ///
    /// In dev mode a missing channel is created as a virtual one first. The
    /// new nonce and balances are persisted before returning, so the state
    /// counts as proposed even if it is never acknowledged.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InsufficientBalance`] when `debit > balA`, or
    /// [`AgentError::NoChannel`] outside dev mode.
    pub async fn next_channel_state(
        &self,
        key: &str,
        debit: TokenAmount,
        context_hash: B256,
    ) -> Result<ChannelState, AgentError> {
        let mut state = self.state.lock().await;
        if !state.channels.contains_key(key) && self.options.dev_mode {
            state
                .channels
                .insert(key.to_owned(), LocalChannel::virtual_for(key, self.address()));
        }
        let next = state.next_channel_state(key, debit, context_hash, UnixTimestamp::now())?;
        self.persist(&state).await?;
        tracing::debug!(
            channel_id = %next.channel_id,
            nonce = next.state_nonce,
            debit = %debit,
            "channel state proposed"
        );
        Ok(next)
    }

    /// Fetches the offers for `resource_url`.
    ///
    /// `<url without its last segment>/pay` is tried first; when it does not
    /// answer with an offer list the resource itself must answer `402`.
    /// Offers outside the allowlists are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnexpectedStatus`] if the fallback request does
    /// not answer `402`, or a transport error.
    pub async fn discover_offers(&self, resource_url: &str) -> Result<Vec<Offer>, AgentError> {
        let required = match self.try_discovery_endpoint(resource_url).await {
            Some(required) => required,
            None => {
                let response = self.http.get(resource_url).send().await?;
                if response.status() != StatusCode::PAYMENT_REQUIRED {
                    return Err(AgentError::UnexpectedStatus(response.status()));
                }
                response.json::<PaymentRequired>().await?
            }
        };
        Ok(required
            .accepts
            .into_iter()
            .filter(|offer| self.options.allows(&offer.network, offer.asset))
            .collect())
    }

    async fn try_discovery_endpoint(&self, resource_url: &str) -> Option<PaymentRequired> {
        let response = self.http.get(discovery_url(resource_url)).send().await.ok()?;
        if response.status() != StatusCode::OK {
            return None;
        }
        let body = response.json::<serde_json::Value>().await.ok()?;
        body.get("accepts")?;
        serde_json::from_value(body).ok()
    }

    /// Pays for `resource_url` over the route in `opts`, hub first by default.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoOffers`] or [`AgentError::RouteUnavailable`]
    /// when nothing suitable is offered, and any error of the chosen route.
    pub async fn pay_resource(
        &self,
        resource_url: &str,
        opts: &PayOptions,
    ) -> Result<PaymentOutcome, AgentError> {
        let offers = self.discover_offers(resource_url).await?;
        if offers.is_empty() {
            return Err(AgentError::NoOffers);
        }
        let offer = choose_offer(
            &offers,
            opts.route,
            opts.network.as_deref(),
            opts.asset,
        )
        .ok_or_else(|| AgentError::RouteUnavailable {
            route: opts.route.unwrap_or(Scheme::Hub).route(),
            available: offers
                .iter()
                .map(|o| o.scheme.route())
                .collect::<Vec<_>>()
                .join(", "),
        })?;
        match offer.scheme {
            Scheme::Hub => self.pay_via_hub(resource_url, offer, opts).await,
            Scheme::Direct => self.pay_via_direct(resource_url, offer, opts).await,
        }
    }

    /// Pays a hub offer: quote, propose, issue, then present the ticket.
    ///
    /// The countersigned state is recorded as a watch proof as soon as the
    /// hub issues, whatever the resource server answers.
    ///
    /// # Errors
    ///
    /// Returns `quote failed`, `issue failed` or `payee rejected payment`
    /// errors for the respective step; a failed quote leaves the channel
    /// untouched.
    pub async fn pay_via_hub(
        &self,
        resource_url: &str,
        offer: &Offer,
        opts: &PayOptions,
    ) -> Result<PaymentOutcome, AgentError> {
        let ext = offer
            .extensions
            .hub
            .as_ref()
            .ok_or(AgentError::MalformedOffer(Scheme::Hub.as_str()))?;
        let amount = offer.max_amount_required;
        self.check_amount(amount, opts.max_amount)?;
        let invoice_id = ext.invoice_id.clone();
        let payment_id = opts.payment_id.clone().unwrap_or_else(|| random_id("pay"));
        let target = target_url(offer, resource_url);
        let context_hash = PaymentContext {
            payee: ext.payee_address,
            resource: target,
            method: "GET",
            invoice_id: &invoice_id,
            payment_id: &payment_id,
            amount,
            asset: offer.asset,
        }
        .hash();

        let issued = self
            .hub_transfer(Transfer {
                endpoint: &ext.hub_endpoint,
                payee: ext.payee_address,
                asset: offer.asset,
                amount,
                invoice_id: invoice_id.clone(),
                payment_id: payment_id.clone(),
                max_fee: opts.max_fee.unwrap_or(self.options.max_fee_default),
                context_hash,
            })
            .await?;

        let ticket = issued.response.ticket.clone();
        let payload = PaymentPayload::Hub(HubPayment {
            payment_id: payment_id.clone(),
            invoice_id: invoice_id.clone(),
            ticket: ticket.clone(),
            channel_proof: Some(ChannelProof {
                channel_id: issued.state.channel_id,
                state_nonce: issued.state.state_nonce,
                state_hash: channel_state_digest(&issued.state),
                sig_a: issued.sig_a.clone(),
            }),
        });
        let paid = match self.present(target, &payload).await? {
            Ok(paid) => paid,
            Err((status, body)) => {
                tracing::warn!(payment_id = %payment_id, %status, "payee rejected payment");
                return Err(AgentError::PayeeRejected { status, body });
            }
        };

        self.record_payment(
            &payment_id,
            PaymentEntry {
                paid_at: UnixTimestamp::now(),
                route: Scheme::Hub.route().to_owned(),
                resource_url: Some(target.to_owned()),
                payee: None,
                invoice_id: Some(invoice_id),
                ticket_id: Some(ticket.draft.ticket_id.clone()),
                amount: Some(amount),
                receipt: Some(paid.receipt.clone()),
            },
        )
        .await?;
        tracing::info!(
            payment_id = %payment_id,
            ticket_id = %ticket.draft.ticket_id,
            fee = %issued.quote.fee,
            "hub payment accepted"
        );

        Ok(PaymentOutcome {
            route: Scheme::Hub,
            payment_id,
            payee: ext.payee_address,
            amount,
            fee: issued.quote.fee,
            state: issued.state,
            quote: Some(issued.quote),
            ticket: Some(ticket),
            channel_ack: Some(issued.response.channel_ack),
            response: Some(paid),
        })
    }

    /// Pays a direct offer with a state crediting the payee.
    ///
    /// # Errors
    ///
    /// Returns `payee rejected direct payment` when the resource server
    /// refuses the state, or a channel error.
    pub async fn pay_via_direct(
        &self,
        resource_url: &str,
        offer: &Offer,
        opts: &PayOptions,
    ) -> Result<PaymentOutcome, AgentError> {
        let ext = offer
            .extensions
            .direct
            .as_ref()
            .ok_or(AgentError::MalformedOffer(Scheme::Direct.as_str()))?;
        let amount = offer.max_amount_required;
        self.check_amount(amount, opts.max_amount)?;
        let payee = ext.payee_address;
        let invoice_id = ext.invoice_id.clone();
        let payment_id = opts.payment_id.clone().unwrap_or_else(|| random_id("pay"));
        let target = target_url(offer, resource_url);

        let key = direct_key(payee);
        self.require_channel(&key, payee, target).await.map_err(|e| match e {
            AgentError::NoChannel(_) => AgentError::NoChannel(format!(
                "No direct channel open with {payee}.\nOpen one with: scp-agent open {payee} <network> <asset> <deposit>"
            )),
            other => other,
        })?;
        let context_hash = PaymentContext {
            payee,
            resource: target,
            method: "GET",
            invoice_id: &invoice_id,
            payment_id: &payment_id,
            amount,
            asset: offer.asset,
        }
        .hash();
        let state = self.next_channel_state(&key, amount, context_hash).await?;
        let sig_a = sign_channel_state(&state, &self.signer)?;

        let payload = PaymentPayload::Direct(DirectPayment {
            payment_id: payment_id.clone(),
            invoice_id: invoice_id.clone(),
            direct: DirectPaymentBody {
                payer: self.address(),
                payee,
                asset: offer.asset,
                amount,
                expiry: UnixTimestamp::now() + STATE_TTL_SECS,
                invoice_id: invoice_id.clone(),
                payment_id: payment_id.clone(),
                channel_state: state.clone(),
                sig_a,
            },
        });
        let paid = match self.present(target, &payload).await? {
            Ok(paid) => paid,
            Err((status, body)) => {
                tracing::warn!(payment_id = %payment_id, %status, "payee rejected direct payment");
                return Err(AgentError::DirectRejected { status, body });
            }
        };

        self.record_payment(
            &payment_id,
            PaymentEntry {
                paid_at: UnixTimestamp::now(),
                route: Scheme::Direct.route().to_owned(),
                resource_url: Some(target.to_owned()),
                payee: Some(payee),
                invoice_id: Some(invoice_id),
                ticket_id: None,
                amount: Some(amount),
                receipt: Some(paid.receipt.clone()),
            },
        )
        .await?;
        tracing::info!(payment_id = %payment_id, nonce = state.state_nonce, "direct payment accepted");

        Ok(PaymentOutcome {
            route: Scheme::Direct,
            payment_id,
            payee,
            amount,
            fee: TokenAmount::ZERO,
            state,
            quote: None,
            ticket: None,
            channel_ack: None,
            response: Some(paid),
        })
    }

    /// Transfers `amount` to `payee` through a hub, without a resource.
    ///
    /// # Errors
    ///
    /// Returns `quote failed` or `issue failed` errors, or a channel error.
    pub async fn pay_address(
        &self,
        payee: Address,
        amount: TokenAmount,
        params: &AddressPayment,
    ) -> Result<PaymentOutcome, AgentError> {
        let invoice_id = params.invoice_id.clone().unwrap_or_else(|| random_id("inv"));
        let payment_id = params.payment_id.clone().unwrap_or_else(|| random_id("pay"));
        let context_hash = PaymentContext {
            payee,
            resource: "",
            method: "transfer",
            invoice_id: &invoice_id,
            payment_id: &payment_id,
            amount,
            asset: params.asset,
        }
        .hash();

        let issued = self
            .hub_transfer(Transfer {
                endpoint: &params.hub_endpoint,
                payee,
                asset: params.asset,
                amount,
                invoice_id: invoice_id.clone(),
                payment_id: payment_id.clone(),
                max_fee: params.max_fee.unwrap_or(self.options.max_fee_default),
                context_hash,
            })
            .await?;

        let ticket = issued.response.ticket.clone();
        self.record_payment(
            &payment_id,
            PaymentEntry {
                paid_at: UnixTimestamp::now(),
                route: Scheme::Hub.route().to_owned(),
                resource_url: None,
                payee: Some(payee),
                invoice_id: Some(invoice_id),
                ticket_id: Some(ticket.draft.ticket_id.clone()),
                amount: Some(amount),
                receipt: None,
            },
        )
        .await?;
        tracing::info!(payment_id = %payment_id, payee = %payee, fee = %issued.quote.fee, "address payment issued");

        Ok(PaymentOutcome {
            route: Scheme::Hub,
            payment_id,
            payee,
            amount,
            fee: issued.quote.fee,
            state: issued.state,
            quote: Some(issued.quote),
            ticket: Some(ticket),
            channel_ack: Some(issued.response.channel_ack),
            response: None,
        })
    }

    /// Pays over a known channel.
    ///
    /// A hub channel transfers `amount` to `payee` (the agent itself when
    /// unset). A direct channel fetches a fresh invoice from the endpoint it
    /// last paid and pays it, provided the price is at most `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownChannel`] for an id not in the state,
    /// [`AgentError::NoEndpoint`] for a direct channel never used with a URL,
    /// and any error of the payment itself.
    pub async fn pay_channel(
        &self,
        channel_id: B256,
        amount: TokenAmount,
        payee: Option<Address>,
        max_fee: Option<TokenAmount>,
    ) -> Result<PaymentOutcome, AgentError> {
        let (key, endpoint) = {
            let state = self.state.lock().await;
            let (key, ch) = state
                .channel_by_id(channel_id)
                .ok_or(AgentError::UnknownChannel(channel_id))?;
            (key.to_owned(), ch.endpoint.clone())
        };

        if let Some(hub_endpoint) = key.strip_prefix("hub:") {
            let params = AddressPayment {
                hub_endpoint: hub_endpoint.to_owned(),
                max_fee,
                ..AddressPayment::default()
            };
            return self
                .pay_address(payee.unwrap_or_else(|| self.address()), amount, &params)
                .await;
        }
        if key.starts_with("direct:") {
            let endpoint = endpoint.ok_or(AgentError::NoEndpoint(channel_id))?;
            let offers = self.discover_offers(&endpoint).await?;
            let offer = offers
                .iter()
                .find(|o| {
                    o.extensions
                        .direct
                        .as_ref()
                        .is_some_and(|ext| direct_key(ext.payee_address) == key)
                })
                .ok_or_else(|| AgentError::RouteUnavailable {
                    route: Scheme::Direct.route(),
                    available: offers
                        .iter()
                        .map(|o| o.scheme.route())
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            let opts = PayOptions {
                route: Some(Scheme::Direct),
                max_amount: Some(amount),
                ..PayOptions::default()
            };
            return self.pay_via_direct(&endpoint, offer, &opts).await;
        }
        Err(AgentError::UnsupportedChannel(key))
    }

    /// Opens a channel with `participant_b` and records it as
    /// `onchain:<channelId>`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoContract`] without a contract, or the
    /// contract's revert.
    pub async fn open_channel(
        &self,
        participant_b: Address,
        opts: OpenOptions,
    ) -> Result<OpenedChannel, AgentError> {
        let contract = self.contract()?;
        let now = UnixTimestamp::now();
        let challenge_period_sec = opts
            .challenge_period_sec
            .unwrap_or(DEFAULT_CHALLENGE_PERIOD_SECS);
        let channel_expiry = opts
            .channel_expiry
            .unwrap_or(now + DEFAULT_CHANNEL_TTL_SECS);
        let salt = opts.salt.unwrap_or_else(|| {
            let tag = format!("ag-{now}-{}", hex::encode(&participant_b[..3]));
            B256::right_padding_from(tag.as_bytes())
        });
        let opened = contract
            .open_channel(OpenChannelRequest {
                participant_b,
                asset: opts.asset,
                amount: opts.amount,
                challenge_period_sec,
                channel_expiry,
                salt,
            })
            .await?;

        let mut state = self.state.lock().await;
        state.channels.insert(
            onchain_key(opened.channel_id),
            LocalChannel {
                participant_b: Some(participant_b),
                asset: Some(opts.asset),
                total_deposit: Some(opts.amount),
                challenge_period_sec: Some(challenge_period_sec),
                channel_expiry: Some(channel_expiry),
                tx_hash: Some(opened.tx_hash),
                status: Some(ChannelStatus::Open),
                ..LocalChannel::new(opened.channel_id, opts.amount)
            },
        );
        self.persist(&state).await?;
        tracing::info!(
            channel_id = %opened.channel_id,
            participant_b = %participant_b,
            amount = %opts.amount,
            tx_hash = %opened.tx_hash,
            "channel opened"
        );

        Ok(OpenedChannel {
            channel_id: opened.channel_id,
            participant_a: self.address(),
            participant_b,
            asset: opts.asset,
            amount: opts.amount,
            challenge_period_sec,
            tx_hash: opened.tx_hash,
        })
    }

    /// Deposits `amount` into `channel_id` and credits the local balance.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoContract`] without a contract, or the
    /// contract's revert.
    pub async fn fund_channel(
        &self,
        channel_id: B256,
        amount: TokenAmount,
    ) -> Result<FundedChannel, AgentError> {
        let deposited = self.contract()?.deposit(channel_id, amount).await?;

        let mut state = self.state.lock().await;
        if let Some(ch) = state
            .channels
            .values_mut()
            .find(|ch| ch.channel_id == channel_id)
        {
            ch.bal_a = ch.bal_a.checked_add(amount).ok_or(AgentError::Overflow)?;
            ch.total_deposit = Some(
                ch.total_deposit
                    .unwrap_or_default()
                    .checked_add(amount)
                    .ok_or(AgentError::Overflow)?,
            );
            self.persist(&state).await?;
        }
        tracing::info!(channel_id = %channel_id, amount = %amount, tx_hash = %deposited.tx_hash, "channel funded");

        Ok(FundedChannel {
            channel_id,
            deposited: amount,
            new_total_balance: deposited.new_total_balance,
            tx_hash: deposited.tx_hash,
        })
    }

    /// Closes `channel_id` with the latest countersigned state.
    ///
    /// A cooperative close is tried first; if the contract refuses it (for
    /// instance because the state expired) a unilateral close is started
    /// with the counterparty signature alone.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::NoCounterpartySignature`] when no countersigned
    /// state is held, or the contract's revert.
    pub async fn close_channel(&self, channel_id: B256) -> Result<ClosedChannel, AgentError> {
        let contract = self.contract()?;
        let proof = self
            .state
            .lock()
            .await
            .watch
            .by_channel_id
            .get(&channel_id)
            .cloned();
        let Some((proof, sig_b)) = proof.and_then(|p| p.sig_b.clone().map(|sig_b| (p, sig_b)))
        else {
            return Err(AgentError::NoCounterpartySignature);
        };

        let (method, status, tx_hash) = match contract
            .cooperative_close(&proof.state, &proof.sig_a, &sig_b)
            .await
        {
            Ok(tx) => (CloseMethod::Cooperative, ChannelStatus::Closed, tx),
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "cooperative close refused, starting unilateral close");
                let tx = contract.start_close(&proof.state, &sig_b).await?;
                (CloseMethod::Unilateral, ChannelStatus::Closing, tx)
            }
        };

        let mut state = self.state.lock().await;
        if let Some(ch) = state
            .channels
            .values_mut()
            .find(|ch| ch.channel_id == channel_id)
        {
            ch.status = Some(status);
        }
        self.persist(&state).await?;
        tracing::info!(channel_id = %channel_id, ?method, tx_hash = %tx_hash, "channel close sent");

        Ok(ClosedChannel {
            channel_id,
            method,
            tx_hash,
        })
    }

    async fn hub_transfer(&self, transfer: Transfer<'_>) -> Result<Issued, AgentError> {
        let endpoint = transfer.endpoint.trim_end_matches('/');
        let key = hub_key(endpoint);
        let hub = self.hub_client(endpoint)?;
        let known = self.state.lock().await.channels.contains_key(&key);
        if !known {
            self.adopt_hub_channel(&hub, endpoint, &key).await;
        }
        let channel_id = match self.require_channel(&key, Address::ZERO, endpoint).await {
            Err(AgentError::NoChannel(_)) => {
                return Err(self.missing_hub_channel(&hub, endpoint, transfer.amount).await);
            }
            other => other?,
        };

        let request = QuoteRequest {
            invoice_id: transfer.invoice_id,
            payment_id: transfer.payment_id,
            channel_id,
            payee: transfer.payee,
            asset: transfer.asset,
            amount: transfer.amount,
            max_fee: transfer.max_fee,
            quote_expiry: UnixTimestamp::now() + STATE_TTL_SECS,
            context_hash: Some(transfer.context_hash),
            payment_memo: None,
        };
        let quote = hub.quote(&request).await.map_err(|e| {
            tracing::warn!(payment_id = %request.payment_id, error = %e, "quote failed");
            AgentError::Quote(e)
        })?;

        let state = self
            .next_channel_state(&key, quote.total_debit, transfer.context_hash)
            .await?;
        let sig_a = sign_channel_state(&state, &self.signer)?;
        let response = hub
            .issue(&IssueRequest {
                quote: quote.clone(),
                channel_state: state.clone(),
                sig_a: sig_a.clone(),
            })
            .await
            .map_err(|e| {
                tracing::warn!(payment_id = %request.payment_id, nonce = state.state_nonce, error = %e, "issue failed");
                AgentError::Issue(e)
            })?;

        let hub_signer = self.hub_signer(&hub, endpoint).await?;
        verify_channel_ack(&state, &response.channel_ack, hub_signer)?;

        {
            let mut local = self.state.lock().await;
            let stored = local.record_proof(
                state.clone(),
                sig_a.clone(),
                Some(response.channel_ack.sig_b.clone()),
                UnixTimestamp::now(),
            );
            if stored {
                self.persist(&local).await?;
            } else {
                tracing::debug!(channel_id = %state.channel_id, nonce = state.state_nonce, "newer proof already held");
            }
        }

        Ok(Issued {
            quote,
            state,
            sig_a,
            response,
        })
    }

    /// Ensures a channel exists under `key`, creating a virtual one in dev
    /// mode, and remembers `endpoint` as the place it pays through.
    ///
    /// An open on-chain channel with `counterparty` is moved under `key`
    /// first.
    async fn require_channel(
        &self,
        key: &str,
        counterparty: Address,
        endpoint: &str,
    ) -> Result<B256, AgentError> {
        let mut state = self.state.lock().await;
        let mut changed = false;
        if !state.channels.contains_key(key) {
            if counterparty != Address::ZERO && adopt(&mut state, key, counterparty) {
                tracing::info!(key, "on-chain channel bound");
            } else if self.options.dev_mode {
                state
                    .channels
                    .insert(key.to_owned(), LocalChannel::virtual_for(key, self.address()));
            } else {
                return Err(AgentError::NoChannel(format!("no channel under {key}")));
            }
            changed = true;
        }
        let channel = state
            .channels
            .get_mut(key)
            .ok_or_else(|| AgentError::NoChannel(format!("no channel under {key}")))?;
        let channel_id = channel.channel_id;
        if channel.endpoint.is_none() {
            channel.endpoint = Some(endpoint.to_owned());
            changed = true;
        }
        if changed {
            self.persist(&state).await?;
        }
        Ok(channel_id)
    }

    /// The hub's signer address, fetched once per endpoint.
    async fn hub_signer(&self, hub: &HubClient, endpoint: &str) -> Result<Address, AgentError> {
        if let Some(address) = self.hub_signers.get(endpoint) {
            return Ok(*address);
        }
        let address = hub.well_known().await?.address;
        self.hub_signers.insert(endpoint.to_owned(), address);
        Ok(address)
    }

    /// Moves an open on-chain channel with the hub's address under `key`.
    async fn adopt_hub_channel(&self, hub: &HubClient, endpoint: &str, key: &str) {
        let Ok(address) = self.hub_signer(hub, endpoint).await else {
            return;
        };
        let mut state = self.state.lock().await;
        if !state.channels.contains_key(key) && adopt(&mut state, key, address) {
            tracing::info!(key, hub = %address, "on-chain channel bound to hub");
        }
    }

    async fn missing_hub_channel(
        &self,
        hub: &HubClient,
        endpoint: &str,
        amount: TokenAmount,
    ) -> AgentError {
        match hub.well_known().await {
            Ok(info) => AgentError::NoChannel(setup_hint(&info, amount)),
            Err(_) => AgentError::NoChannel(format!(
                "No channel open with hub at {endpoint}. Open one with: scp-agent open <hubAddress> <network> <asset> <deposit>"
            )),
        }
    }

    async fn present(
        &self,
        target: &str,
        payload: &PaymentPayload,
    ) -> Result<Result<PaidResource, (StatusCode, String)>, AgentError> {
        let header = encode_payment_signature(payload)?;
        let response = self
            .http
            .get(target)
            .header(PAYMENT_SIGNATURE_HEADER, header)
            .send()
            .await?;
        let status = response.status();
        if status == StatusCode::OK {
            Ok(Ok(response.json::<PaidResource>().await?))
        } else {
            Ok(Err((status, response.text().await?)))
        }
    }

    async fn record_payment(&self, payment_id: &str, entry: PaymentEntry) -> Result<(), AgentError> {
        let mut state = self.state.lock().await;
        state.payments.insert(payment_id.to_owned(), entry);
        self.persist(&state).await
    }

    async fn persist(&self, state: &AgentState) -> Result<(), AgentError> {
        if self.options.persist {
            self.file.save(state).await?;
        }
        Ok(())
    }

    fn hub_client(&self, endpoint: &str) -> Result<HubClient, AgentError> {
        let mut normalized = endpoint.trim_end_matches('/').to_owned();
        normalized.push('/');
        let client = HubClient::with_client(Url::parse(&normalized)?, self.http.clone())?;
        Ok(client.with_timeout(self.options.timeout))
    }

    fn contract(&self) -> Result<&Arc<dyn ChannelContract>, AgentError> {
        self.contract.as_ref().ok_or(AgentError::NoContract)
    }

    fn check_amount(
        &self,
        amount: TokenAmount,
        max: Option<TokenAmount>,
    ) -> Result<(), AgentError> {
        let max = max.unwrap_or(self.options.max_amount_default);
        if amount > max {
            return Err(AgentError::AmountExceedsMax { amount, max });
        }
        Ok(())
    }
}

/// Moves an open on-chain channel with `counterparty` under `key`.
/// Checks that `ack` countersigns exactly `state` and was signed by `hub`.
fn verify_channel_ack(
    state: &ChannelState,
    ack: &ChannelAck,
    hub: Address,
) -> Result<(), AgentError> {
    if ack.state_nonce != state.state_nonce {
        return Err(AgentError::BadChannelAck(format!(
            "acknowledged nonce {} for state {}",
            ack.state_nonce, state.state_nonce
        )));
    }
    if ack.state_hash != channel_state_digest(state) {
        return Err(AgentError::BadChannelAck("state hash mismatch".to_owned()));
    }
    let signer = recover_channel_state_signer(state, &ack.sig_b)
        .map_err(|e| AgentError::BadChannelAck(format!("invalid sigB: {e}")))?;
    if signer != hub {
        return Err(AgentError::BadChannelAck(format!(
            "sigB recovered {signer}, hub is {hub}"
        )));
    }
    Ok(())
}

fn adopt(state: &mut AgentState, key: &str, counterparty: Address) -> bool {
    let found = state
        .channels
        .iter()
        .find(|(k, ch)| {
            k.starts_with("onchain:")
                && ch.participant_b == Some(counterparty)
                && ch.status.is_none_or(|s| s == ChannelStatus::Open)
        })
        .map(|(k, _)| k.clone());
    let Some(channel) = found.and_then(|k| state.channels.remove(&k)) else {
        return false;
    };
    state.channels.insert(key.to_owned(), channel);
    true
}

/// Picks an offer: the requested route, otherwise hub before direct.
#[must_use]
pub fn choose_offer<'a>(
    offers: &'a [Offer],
    route: Option<Scheme>,
    network: Option<&str>,
    asset: Option<Address>,
) -> Option<&'a Offer> {
    let candidates = || {
        offers.iter().filter(move |o| {
            network.is_none_or(|n| o.network == n) && asset.is_none_or(|a| o.asset == a)
        })
    };
    let find = |scheme: Scheme| candidates().find(|o| o.scheme == scheme);
    match route {
        Some(scheme) => find(scheme),
        None => find(Scheme::Hub).or_else(|| find(Scheme::Direct)),
    }
}

/// Operator hint shown when no channel with a reachable hub exists.
#[must_use]
pub fn setup_hint(info: &HubInfo, amount: TokenAmount) -> String {
    let fee = FeePolicy::from(&info.fee_policy)
        .compute(amount)
        .map_or(TokenAmount::ZERO, |c| c.fee);
    let per_payment = amount.saturating_add(fee);
    let times = |n: u64| TokenAmount::new(per_payment.inner().saturating_mul(U256::from(n)));
    let assets = info
        .supported_assets
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    let policy = &info.fee_policy;
    [
        format!("No channel open with hub {}.", info.hub_name),
        String::new(),
        format!("Hub:     {}", info.address),
        format!(
            "Fee:     base={} + {}bps + gas={}",
            policy.base, policy.bps, policy.gas_surcharge
        ),
        format!("Assets:  {assets}"),
        String::new(),
        format!("Per payment: {amount} + {fee} fee = {per_payment}"),
        format!("  100 payments ~ {}", times(100)),
        format!("  1000 payments ~ {}", times(1000)),
        String::new(),
        "Open a channel:".to_owned(),
        format!("  scp-agent open {} base usdc <amount>", info.address),
    ]
    .join("\n")
}

fn discovery_url(resource_url: &str) -> String {
    let base = resource_url
        .rsplit_once('/')
        .map_or(resource_url, |(base, _)| base);
    format!("{base}{PAY_DISCOVERY_PATH}")
}

fn target_url<'a>(offer: &'a Offer, resource_url: &'a str) -> &'a str {
    if offer.resource.is_empty() {
        resource_url
    } else {
        &offer.resource
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scp::proto::{FeeBreakdown, TicketDraft};
    use scp::store::{MemoryStore, StoreBackend};
    use scp_evm::InMemoryChannelContract;
    use scp_evm::signing::sign_ticket_draft;
    use scp_evm::watch::{FileProofSource, ProofSource, Role};
    use scp_http::server::{PayeeConfig, PayeeState, payee_router};
    use scp_hub::{HubConfig, HubService, hub_router};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const AGENT_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    const PAYEE: Address = Address::repeat_byte(0xbb);

    struct Stack {
        hub: Arc<HubService<StoreBackend>>,
        payee: Arc<PayeeState>,
        resource_url: String,
    }

    async fn serve(router: axum::Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await });
        addr
    }

    async fn stack() -> Stack {
        let config = HubConfig {
            fee_base: 10,
            fee_bps: 30,
            ..HubConfig::default()
        };
        let signer = parse_signer(&config.signer_private_key).unwrap();
        let hub = Arc::new(HubService::new(
            config,
            signer,
            StoreBackend::Memory(MemoryStore::new()),
        ));
        let hub_addr = serve(hub_router(Arc::clone(&hub))).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = PayeeConfig {
            port,
            hub_url: format!("http://{hub_addr}"),
            ..PayeeConfig::default()
        };
        let resource_url = config.resource_url();
        let payee = Arc::new(PayeeState::new(config, PAYEE).unwrap());
        let router = payee_router(Arc::clone(&payee));
        tokio::spawn(async move { axum::serve(listener, router).await });

        Stack {
            hub,
            payee,
            resource_url,
        }
    }

    fn options(dir: &tempfile::TempDir) -> AgentOptions {
        AgentOptions {
            state_dir: dir.path().to_path_buf(),
            ..AgentOptions::default()
        }
    }

    fn funded_options(dir: &tempfile::TempDir) -> AgentOptions {
        AgentOptions {
            state_dir: dir.path().to_path_buf(),
            ..AgentOptions::with_private_key(Some(AGENT_KEY.to_owned()))
        }
    }

    async fn onchain_agent(
        dir: &tempfile::TempDir,
        hub: Address,
    ) -> (ScpAgent, InMemoryChannelContract, B256) {
        let payer = parse_signer(AGENT_KEY).unwrap().address();
        let contract = InMemoryChannelContract::new(payer);
        let agent = ScpAgent::open(funded_options(dir))
            .await
            .unwrap()
            .with_contract(Arc::new(contract.clone()));
        let opened = agent
            .open_channel(
                hub,
                OpenOptions {
                    asset: scp_evm::networks::USDC_BASE,
                    amount: TokenAmount::from(100_000_000u64),
                    ..OpenOptions::default()
                },
            )
            .await
            .unwrap();
        (agent, contract, opened.channel_id)
    }

    fn amount(v: u64) -> TokenAmount {
        TokenAmount::from(v)
    }

    #[tokio::test]
    async fn test_hub_payment_end_to_end() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();

        let outcome = agent
            .pay_resource(&stack.resource_url, &PayOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.route, Scheme::Hub);
        assert_eq!(outcome.fee, amount(3_010));
        assert_eq!(outcome.state.state_nonce, 1);
        assert_eq!(outcome.state.bal_b, amount(1_003_010));
        let paid = outcome.response.unwrap();
        assert!(paid.ok);
        assert_eq!(paid.data.payee, PAYEE);
        let ticket_id = outcome.ticket.unwrap().draft.ticket_id;
        assert_eq!(paid.receipt.ticket_id.as_deref(), Some(ticket_id.as_str()));

        let record = stack.hub.channel(outcome.state.channel_id).await;
        assert_eq!(record.latest_nonce, 1);
        assert_eq!(record.latest_state.as_ref(), Some(&outcome.state));

        let payments = agent.payments().await;
        assert_eq!(payments[&outcome.payment_id].ticket_id.as_deref(), Some(ticket_id.as_str()));

        let proof = FileProofSource::new(Role::Agent, agent.state_path())
            .local_proof(outcome.state.channel_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(proof.state, outcome.state);
        assert_eq!(proof.counterparty_sig, outcome.channel_ack.unwrap().sig_b);
    }

    #[tokio::test]
    async fn test_fee_above_max_fails_before_any_state() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();

        let opts = PayOptions {
            max_fee: Some(amount(1)),
            ..PayOptions::default()
        };
        let err = agent
            .pay_resource(&stack.resource_url, &opts)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("quote failed"), "{err}");
        assert!(err.to_string().contains("SCP_003_FEE_EXCEEDS_MAX"));

        let channels = agent.list_channels().await;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].1.nonce, 0);
        assert!(agent.snapshot().await.watch.by_channel_id.is_empty());
    }

    #[tokio::test]
    async fn test_amount_policy_is_checked_first() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();

        let opts = PayOptions {
            max_amount: Some(amount(10)),
            ..PayOptions::default()
        };
        let err = agent
            .pay_resource(&stack.resource_url, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmountExceedsMax { .. }));
        assert!(agent.list_channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_direct_payments_advance_payee_watermark() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();

        let opts = PayOptions {
            route: Some(Scheme::Direct),
            ..PayOptions::default()
        };
        let first = agent.pay_resource(&stack.resource_url, &opts).await.unwrap();
        assert_eq!(first.route, Scheme::Direct);
        assert_eq!(first.fee, TokenAmount::ZERO);
        let channel_id = first.state.channel_id;
        assert_eq!(
            first.response.unwrap().receipt.direct_channel_id,
            Some(channel_id)
        );

        let second = agent
            .pay_channel(channel_id, amount(1_000_000), None, None)
            .await
            .unwrap();
        assert_eq!(second.state.state_nonce, 2);
        let mark = stack.payee.direct_watermark(channel_id).unwrap();
        assert_eq!(mark.nonce, 2);
        assert_eq!(mark.bal_b, amount(2_000_000));

        let err = agent
            .pay_channel(channel_id, amount(10), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::AmountExceedsMax { .. }));
    }

    #[tokio::test]
    async fn test_missing_channel_reports_setup_hint() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(funded_options(&dir)).await.unwrap();

        let err = agent
            .pay_resource(&stack.resource_url, &PayOptions::default())
            .await
            .unwrap_err();
        let hint = err.to_string();
        assert!(matches!(err, AgentError::NoChannel(_)));
        assert!(hint.contains("Per payment: 1000000 + 3010 fee = 1003010"), "{hint}");
        assert!(hint.contains("100 payments ~ 100301000"));
        assert!(hint.contains(&stack.hub.address().to_string()));
    }

    #[tokio::test]
    async fn test_onchain_channel_pays_then_closes_cooperatively() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let hub = stack.hub.address();
        let (agent, contract, channel_id) = onchain_agent(&dir, hub).await;

        let outcome = agent
            .pay_resource(&stack.resource_url, &PayOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.state.channel_id, channel_id);
        assert_eq!(outcome.state.bal_a, amount(98_996_990));
        assert_eq!(outcome.state.bal_b, amount(1_003_010));

        let channels = agent.list_channels().await;
        assert_eq!(channels.len(), 1);
        assert!(channels[0].0.starts_with("hub:http://127.0.0.1:"));

        let closed = agent.close_channel(channel_id).await.unwrap();
        assert_eq!(closed.method, CloseMethod::Cooperative);
        assert_eq!(contract.paid_to(hub).await, amount(1_003_010));
        assert_eq!(contract.paid_to(agent.address()).await, amount(98_996_990));
        assert!(!contract.get_channel(channel_id).await.unwrap().exists());
    }

    #[tokio::test]
    async fn test_expired_state_falls_back_to_unilateral_close() {
        let stack = stack().await;
        let dir = tempfile::tempdir().unwrap();
        let (agent, contract, channel_id) = onchain_agent(&dir, stack.hub.address()).await;
        agent
            .pay_resource(&stack.resource_url, &PayOptions::default())
            .await
            .unwrap();

        contract.advance(STATE_TTL_SECS + 60);
        let closed = agent.close_channel(channel_id).await.unwrap();
        assert_eq!(closed.method, CloseMethod::Unilateral);
        let onchain = contract.get_channel(channel_id).await.unwrap();
        assert!(onchain.is_closing);
        assert_eq!(onchain.latest_nonce, 1);
    }

    #[tokio::test]
    async fn test_fund_and_close_without_countersignature() {
        let dir = tempfile::tempdir().unwrap();
        let (agent, _contract, channel_id) =
            onchain_agent(&dir, Address::repeat_byte(0x42)).await;

        let funded = agent.fund_channel(channel_id, amount(5)).await.unwrap();
        assert_eq!(funded.new_total_balance, Some(amount(100_000_005)));
        let (key, ch) = &agent.list_channels().await[0];
        assert_eq!(key, &onchain_key(channel_id));
        assert_eq!(ch.bal_a, amount(100_000_005));
        assert_eq!(ch.total_deposit, Some(amount(100_000_005)));

        let err = agent.close_channel(channel_id).await.unwrap_err();
        assert!(matches!(err, AgentError::NoCounterpartySignature));
    }

    #[tokio::test]
    async fn test_onchain_operations_need_contract() {
        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();
        let err = agent
            .open_channel(Address::repeat_byte(0x42), OpenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoContract));
    }

    /// Hub double that signs tickets correctly but countersigns states with
    /// another key.
    struct ForeignCountersigner {
        hub: PrivateKeySigner,
        other: PrivateKeySigner,
    }

    impl wiremock::Respond for ForeignCountersigner {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            let issue: IssueRequest = serde_json::from_slice(&request.body).unwrap();
            let state = issue.channel_state;
            let response = IssueResponse {
                ticket: sign_ticket_draft(issue.quote.ticket_draft, &self.hub).unwrap(),
                channel_ack: ChannelAck {
                    state_nonce: state.state_nonce,
                    state_hash: channel_state_digest(&state),
                    sig_b: sign_channel_state(&state, &self.other).unwrap(),
                },
                hub_channel_ack: None,
            };
            ResponseTemplate::new(200).set_body_json(response)
        }
    }

    #[tokio::test]
    async fn test_foreign_countersignature_is_not_kept_as_proof() {
        let config = HubConfig::default();
        let hub_key = parse_signer(&config.signer_private_key).unwrap();
        let info = HubService::new(
            config,
            hub_key.clone(),
            StoreBackend::Memory(MemoryStore::new()),
        )
        .info();
        let expiry = UnixTimestamp::now() + 120;
        let quote = Quote {
            invoice_id: "inv_1".into(),
            payment_id: "pay_1".into(),
            ticket_draft: TicketDraft {
                ticket_id: "tkt_1".into(),
                hub: hub_key.address(),
                payee: PAYEE,
                invoice_id: "inv_1".into(),
                payment_id: "pay_1".into(),
                asset: scp_evm::networks::USDC_BASE,
                amount: amount(1_000_000),
                fee_charged: amount(3_010),
                total_debit: amount(1_003_010),
                expiry,
                policy_hash: B256::ZERO,
            },
            fee: amount(3_010),
            total_debit: amount(1_003_010),
            expiry,
            fee_breakdown: FeeBreakdown {
                base: amount(10),
                bps: 30,
                variable: amount(3_000),
                gas_surcharge: TokenAmount::ZERO,
            },
        };

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/x402"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&info))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/tickets/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&quote))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/tickets/issue"))
            .respond_with(ForeignCountersigner {
                hub: hub_key,
                other: parse_signer(AGENT_KEY).unwrap(),
            })
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();
        let params = AddressPayment {
            hub_endpoint: server.uri(),
            invoice_id: Some("inv_1".into()),
            payment_id: Some("pay_1".into()),
            ..AddressPayment::default()
        };
        let err = agent
            .pay_address(PAYEE, amount(1_000_000), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::BadChannelAck(_)), "{err}");
        assert!(err.to_string().contains("sigB recovered"));

        let snapshot = agent.snapshot().await;
        assert!(snapshot.watch.by_channel_id.is_empty());
        assert!(snapshot.payments.is_empty());
    }

    #[test]
    fn test_channel_ack_must_match_state() {
        let hub = parse_signer(&HubConfig::default().signer_private_key).unwrap();
        let state = ChannelState {
            channel_id: B256::repeat_byte(0x11),
            state_nonce: 4,
            bal_a: amount(90),
            bal_b: amount(10),
            locks_root: B256::ZERO,
            state_expiry: UnixTimestamp::from_secs(1_700_000_120),
            context_hash: B256::ZERO,
        };
        let ack = ChannelAck {
            state_nonce: 4,
            state_hash: channel_state_digest(&state),
            sig_b: sign_channel_state(&state, &hub).unwrap(),
        };
        verify_channel_ack(&state, &ack, hub.address()).unwrap();

        let stale = ChannelAck {
            state_nonce: 3,
            ..ack.clone()
        };
        let err = verify_channel_ack(&state, &stale, hub.address()).unwrap_err();
        assert!(err.to_string().contains("acknowledged nonce 3 for state 4"));

        let rehashed = ChannelAck {
            state_hash: B256::repeat_byte(0x01),
            ..ack.clone()
        };
        assert!(verify_channel_ack(&state, &rehashed, hub.address()).is_err());

        let garbage = ChannelAck {
            sig_b: Bytes::from(vec![0u8; 12]),
            ..ack
        };
        let err = verify_channel_ack(&state, &garbage, hub.address()).unwrap_err();
        assert!(err.to_string().contains("invalid sigB"));
    }

    fn offer_json(scheme: &str, network: &str) -> serde_json::Value {
        let payee = PAYEE.to_string();
        serde_json::json!({
            "scheme": scheme,
            "network": network,
            "asset": scp_evm::networks::USDC_BASE,
            "maxAmountRequired": "1000000",
            "payTo": payee,
            "resource": "http://payee/v1/data",
            "extensions": {
                "statechannel-direct-v1": {
                    "mode": "direct",
                    "quoteExpiry": 1_700_000_120u64,
                    "invoiceId": "inv_1",
                    "payeeAddress": payee
                }
            }
        })
    }

    #[tokio::test]
    async fn test_discovery_falls_back_to_402() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/pay"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/data"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "accepts": [
                    offer_json("statechannel-direct-v1", "eip155:1"),
                    offer_json("statechannel-direct-v1", "eip155:8453"),
                    offer_json("exact", "eip155:8453")
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();
        let offers = agent
            .discover_offers(&format!("{}/v1/data", server.uri()))
            .await
            .unwrap();
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].network, "eip155:8453");
    }

    #[tokio::test]
    async fn test_discovery_prefers_pay_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/pay"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accepts": [offer_json("statechannel-direct-v1", "eip155:8453")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/data"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();
        let offers = agent
            .discover_offers(&format!("{}/data", server.uri()))
            .await
            .unwrap();
        assert_eq!(offers.len(), 1);
    }

    #[tokio::test]
    async fn test_discovery_requires_402() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/free"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let agent = ScpAgent::open(options(&dir)).await.unwrap();
        let err = agent
            .discover_offers(&format!("{}/free", server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "expected 402, got 200 OK");
    }

    #[test]
    fn test_choose_offer_routes() {
        let direct: Offer =
            serde_json::from_value(offer_json("statechannel-direct-v1", "eip155:8453")).unwrap();
        let hub_offer = Offer {
            scheme: Scheme::Hub,
            ..direct.clone()
        };
        let offers = vec![direct, hub_offer];

        assert_eq!(choose_offer(&offers, None, None, None).unwrap().scheme, Scheme::Hub);
        assert_eq!(
            choose_offer(&offers, Some(Scheme::Direct), None, None).unwrap().scheme,
            Scheme::Direct
        );
        assert!(choose_offer(&offers, None, Some("eip155:1"), None).is_none());
        assert!(choose_offer(&offers[..1], Some(Scheme::Hub), None, None).is_none());
    }

    #[test]
    fn test_discovery_url_replaces_last_segment() {
        assert_eq!(
            discovery_url("http://127.0.0.1:4042/v1/data"),
            "http://127.0.0.1:4042/v1/pay"
        );
        assert_eq!(discovery_url("http://h/weather"), "http://h/pay");
    }
}
