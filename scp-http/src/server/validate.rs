//! Payment checks, in the order a payee applies them.

use alloy_primitives::Address;
use scp::UnixTimestamp;
use scp::proto::{DirectPayment, HubPayment, PaymentStatus, TokenAmount};
use scp_evm::signing::{recover_channel_state_signer, recover_ticket_signer};

use super::{Invoice, PaymentRejection, PayeeState};

impl PayeeState {
    pub(super) async fn validate_hub(
        &self,
        payment: &HubPayment,
        now: UnixTimestamp,
    ) -> Result<(), PaymentRejection> {
        let ticket = &payment.ticket;
        let recovered = recover_ticket_signer(ticket)
            .map_err(|_| PaymentRejection::InvalidTicketSignature)?;
        let hub_address = self.hub_address().await?;
        if recovered != hub_address {
            return Err(PaymentRejection::TicketSignerMismatch);
        }

        let draft = &ticket.draft;
        if draft.payee != self.payee {
            return Err(PaymentRejection::TicketPayeeMismatch);
        }
        if draft.expiry.is_past(now) {
            return Err(PaymentRejection::TicketExpired);
        }
        if draft.invoice_id != payment.invoice_id {
            return Err(PaymentRejection::InvoiceMismatch);
        }
        if draft.payment_id != payment.payment_id {
            return Err(PaymentRejection::PaymentIdMismatch);
        }
        let invoice = self.invoice_for(&payment.invoice_id)?;
        check_price(&invoice, draft.amount, draft.asset)?;

        if self.config.perf_mode {
            return Ok(());
        }
        let record = self
            .hub
            .payment(&payment.payment_id)
            .await
            .map_err(|_| PaymentRejection::HubPaymentUnknown)?;
        if record.status != PaymentStatus::Issued {
            return Err(PaymentRejection::HubPaymentNotIssued);
        }
        if record.ticket_id.as_deref() != Some(draft.ticket_id.as_str()) {
            return Err(PaymentRejection::HubTicketMismatch);
        }
        Ok(())
    }

    pub(super) fn validate_direct(
        &self,
        payment: &DirectPayment,
        now: UnixTimestamp,
    ) -> Result<(), PaymentRejection> {
        let direct = &payment.direct;
        if direct.payee != self.payee {
            return Err(PaymentRejection::DirectPayeeMismatch);
        }
        if direct.invoice_id != payment.invoice_id || direct.payment_id != payment.payment_id {
            return Err(PaymentRejection::DirectIdMismatch);
        }
        if direct.expiry.is_past(now) {
            return Err(PaymentRejection::DirectPaymentExpired);
        }
        let invoice = self.invoice_for(&payment.invoice_id)?;
        check_price(&invoice, direct.amount, direct.asset)?;

        let state = &direct.channel_state;
        match recover_channel_state_signer(state, &direct.sig_a) {
            Ok(signer) if signer == direct.payer => {}
            _ => return Err(PaymentRejection::PayerSignatureMismatch),
        }

        // The watermark is read and advanced under the entry's shard lock so
        // two states with the same nonce cannot both pass.
        let mut watermark = self.direct_channels.entry(state.channel_id).or_default();
        if state.state_nonce <= watermark.nonce {
            return Err(PaymentRejection::StaleDirectNonce);
        }
        let credited = state.bal_b.checked_sub(watermark.bal_b);
        if credited.is_none_or(|delta| delta < direct.amount) {
            return Err(PaymentRejection::InsufficientDirectDelta);
        }
        if state.state_expiry.as_secs() != 0 && state.state_expiry.is_past(now) {
            return Err(PaymentRejection::StateExpired);
        }
        watermark.nonce = state.state_nonce;
        watermark.bal_b = state.bal_b;
        Ok(())
    }

    fn invoice_for(&self, invoice_id: &str) -> Result<Invoice, PaymentRejection> {
        self.invoice(invoice_id)
            .ok_or(PaymentRejection::UnknownInvoice)
    }
}

fn check_price(invoice: &Invoice, amount: TokenAmount, asset: Address) -> Result<(), PaymentRejection> {
    if invoice.amount != amount {
        return Err(PaymentRejection::AmountMismatch);
    }
    if invoice.asset != asset {
        return Err(PaymentRejection::AssetMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::payee::tests::{direct_payment, state_for};
    use super::*;
    use alloy_primitives::B256;
    use alloy_signer_local::PrivateKeySigner;
    use scp::proto::{PaymentPayload, Ticket, TicketDraft};
    use scp_evm::signing::sign_ticket_draft;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn direct(payload: PaymentPayload) -> DirectPayment {
        match payload {
            PaymentPayload::Direct(p) => p,
            PaymentPayload::Hub(_) => unreachable!(),
        }
    }

    fn ticket(hub: &PrivateKeySigner, payee: Address, invoice_id: &str, payment_id: &str) -> Ticket {
        let draft = TicketDraft {
            ticket_id: "tkt_1".into(),
            hub: hub.address(),
            payee,
            invoice_id: invoice_id.into(),
            payment_id: payment_id.into(),
            asset: Address::ZERO,
            amount: TokenAmount::from(1_000u64),
            fee_charged: TokenAmount::from(13u64),
            total_debit: TokenAmount::from(1_013u64),
            expiry: UnixTimestamp::now() + 120,
            policy_hash: B256::ZERO,
        };
        sign_ticket_draft(draft, hub).unwrap()
    }

    async fn mock_hub(hub: &PrivateKeySigner, status: &str, ticket_id: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/x402"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hubName": "pay.eth",
                "address": hub.address(),
                "chainId": 8453,
                "schemes": ["statechannel-hub-v1"],
                "supportedAssets": [Address::ZERO],
                "modes": ["proxy_hold"],
                "signature": { "format": "eth_sign", "keyId": "hub-main-1", "publicKey": hub.address() },
                "feePolicy": { "base": "10", "bps": 30, "gasSurcharge": "0" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/payments/pay_h"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "paymentId": "pay_h",
                "status": status,
                "ticketId": ticket_id
            })))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_hub_ticket_accepted_and_hub_address_cached() {
        let hub = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let server = mock_hub(&hub, "issued", "tkt_1").await;
        let state = state_for(payee, &server.uri());
        let invoice = state.mint_invoice(UnixTimestamp::now());
        let payment = HubPayment {
            payment_id: "pay_h".into(),
            invoice_id: invoice.invoice_id.clone(),
            ticket: ticket(&hub, payee, &invoice.invoice_id, "pay_h"),
            channel_proof: None,
        };
        let now = UnixTimestamp::now();
        state.validate_hub(&payment, now).await.unwrap();
        state.validate_hub(&payment, now).await.unwrap();

        let discovery_calls = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/.well-known/x402")
            .count();
        assert_eq!(discovery_calls, 1);
    }

    #[tokio::test]
    async fn test_hub_status_checks() {
        let hub = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let now = UnixTimestamp::now();

        let server = mock_hub(&hub, "quoted", "tkt_1").await;
        let state = state_for(payee, &server.uri());
        let invoice = state.mint_invoice(now);
        let payment = HubPayment {
            payment_id: "pay_h".into(),
            invoice_id: invoice.invoice_id.clone(),
            ticket: ticket(&hub, payee, &invoice.invoice_id, "pay_h"),
            channel_proof: None,
        };
        assert_eq!(
            state.validate_hub(&payment, now).await,
            Err(PaymentRejection::HubPaymentNotIssued)
        );

        let server = mock_hub(&hub, "issued", "tkt_other").await;
        let state = state_for(payee, &server.uri());
        state.invoices.insert(invoice.invoice_id.clone(), invoice.clone());
        assert_eq!(
            state.validate_hub(&payment, now).await,
            Err(PaymentRejection::HubTicketMismatch)
        );

        let mut perf = state_for(payee, &server.uri());
        perf.config.perf_mode = true;
        perf.invoices.insert(invoice.invoice_id.clone(), invoice);
        perf.validate_hub(&payment, now).await.unwrap();
    }

    #[tokio::test]
    async fn test_hub_ticket_rejections_in_order() {
        let hub = PrivateKeySigner::random();
        let impostor = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let server = mock_hub(&hub, "issued", "tkt_1").await;
        let state = state_for(payee, &server.uri());
        let now = UnixTimestamp::now();
        let invoice = state.mint_invoice(now);
        let make = |signer: &PrivateKeySigner, to: Address, invoice_id: &str| HubPayment {
            payment_id: "pay_h".into(),
            invoice_id: invoice.invoice_id.clone(),
            ticket: ticket(signer, to, invoice_id, "pay_h"),
            channel_proof: None,
        };

        let mut bad_sig = make(&hub, payee, &invoice.invoice_id);
        bad_sig.ticket.sig = alloy_primitives::Bytes::from_static(&[1, 2, 3]);
        assert_eq!(
            state.validate_hub(&bad_sig, now).await,
            Err(PaymentRejection::InvalidTicketSignature)
        );
        assert_eq!(
            state.validate_hub(&make(&impostor, payee, &invoice.invoice_id), now).await,
            Err(PaymentRejection::TicketSignerMismatch)
        );
        assert_eq!(
            state
                .validate_hub(&make(&hub, Address::repeat_byte(0xcc), &invoice.invoice_id), now)
                .await,
            Err(PaymentRejection::TicketPayeeMismatch)
        );
        assert_eq!(
            state
                .validate_hub(&make(&hub, payee, &invoice.invoice_id), now + 3_600)
                .await,
            Err(PaymentRejection::TicketExpired)
        );
        assert_eq!(
            state.validate_hub(&make(&hub, payee, "inv_other"), now).await,
            Err(PaymentRejection::InvoiceMismatch)
        );
    }

    #[test]
    fn test_direct_watermark_rules() {
        let payer = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let state = state_for(payee, "http://127.0.0.1:9");
        let now = UnixTimestamp::now();
        let invoice = state.mint_invoice(now);
        let inv = invoice.invoice_id.as_str();

        let first = direct(direct_payment(&payer, payee, inv, "pay_a", 1, 1_000));
        state.validate_direct(&first, now).unwrap();

        let replayed_nonce = direct(direct_payment(&payer, payee, inv, "pay_b", 1, 2_000));
        assert_eq!(
            state.validate_direct(&replayed_nonce, now),
            Err(PaymentRejection::StaleDirectNonce)
        );

        let short = direct(direct_payment(&payer, payee, inv, "pay_c", 2, 1_500));
        assert_eq!(
            state.validate_direct(&short, now),
            Err(PaymentRejection::InsufficientDirectDelta)
        );

        let expired = direct(direct_payment(&payer, payee, inv, "pay_d", 2, 2_000));
        assert_eq!(
            state.validate_direct(&expired, now + 600),
            Err(PaymentRejection::DirectPaymentExpired)
        );

        let mut forged = direct(direct_payment(&payer, payee, inv, "pay_e", 2, 2_000));
        forged.direct.payer = Address::repeat_byte(0x99);
        assert_eq!(
            state.validate_direct(&forged, now),
            Err(PaymentRejection::PayerSignatureMismatch)
        );

        let next = direct(direct_payment(&payer, payee, inv, "pay_f", 2, 2_000));
        state.validate_direct(&next, now).unwrap();
        let mark = state.direct_watermark(B256::repeat_byte(0xd1)).unwrap();
        assert_eq!(mark.nonce, 2);
        assert_eq!(mark.bal_b, TokenAmount::from(2_000u64));
    }

    #[test]
    fn test_direct_identity_checks() {
        let payer = PrivateKeySigner::random();
        let payee = Address::repeat_byte(0xbb);
        let state = state_for(payee, "http://127.0.0.1:9");
        let now = UnixTimestamp::now();
        let invoice = state.mint_invoice(now);
        let inv = invoice.invoice_id.as_str();

        let other = direct(direct_payment(&payer, Address::repeat_byte(0xcc), inv, "pay_a", 1, 1_000));
        assert_eq!(
            state.validate_direct(&other, now),
            Err(PaymentRejection::DirectPayeeMismatch)
        );
        let mut ids = direct(direct_payment(&payer, payee, inv, "pay_a", 1, 1_000));
        ids.payment_id = "pay_outer".into();
        assert_eq!(
            state.validate_direct(&ids, now),
            Err(PaymentRejection::DirectIdMismatch)
        );
        let unknown = direct(direct_payment(&payer, payee, "inv_x", "pay_a", 1, 1_000));
        assert_eq!(
            state.validate_direct(&unknown, now),
            Err(PaymentRejection::UnknownInvoice)
        );
        let mut asset = direct(direct_payment(&payer, payee, inv, "pay_a", 1, 1_000));
        asset.direct.asset = Address::repeat_byte(0x01);
        assert_eq!(
            state.validate_direct(&asset, now),
            Err(PaymentRejection::AssetMismatch)
        );
        assert!(state.direct_watermark(B256::repeat_byte(0xd1)).is_none());
    }
}
