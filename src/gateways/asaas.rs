//! Asaas: PIX, boleto and card charges against a customer record.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    digits_only, header_str, json_id, send_json, GatewayAdapter, GatewayError, GatewayId,
    PaymentMethod, PaymentRequest, PaymentResult, PixInstructions, StatusReport, WebhookEvent,
};
use crate::circuit_breaker::CircuitBreaker;
use crate::entities::OrderStatus;
use crate::signing::constant_time_eq;

pub const TOKEN_HEADER: &str = "asaas-access-token";
const API_KEY_HEADER: &str = "access_token";

pub fn map_status(raw: &str) -> OrderStatus {
    match raw {
        "RECEIVED" | "CONFIRMED" | "RECEIVED_IN_CASH" | "DUNNING_RECEIVED" => OrderStatus::Paid,
        "OVERDUE" | "DELETED" => OrderStatus::Cancelled,
        "REFUNDED" => OrderStatus::Refunded,
        "CHARGEBACK_REQUESTED" | "CHARGEBACK_DISPUTE" => OrderStatus::Chargeback,
        _ => OrderStatus::Pending,
    }
}

fn billing_type(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Pix => "PIX",
        PaymentMethod::Boleto => "BOLETO",
        PaymentMethod::CreditCard => "CREDIT_CARD",
    }
}

fn to_decimal(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub struct AsaasAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    webhook_token: Option<String>,
    breaker: Arc<CircuitBreaker>,
}

impl AsaasAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        webhook_token: Option<String>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            webhook_token,
            breaker,
        }
    }

    /// Returns the Asaas customer id for the payer, creating it on first use.
    async fn ensure_customer(&self, request: &PaymentRequest) -> Result<String, GatewayError> {
        let document = request
            .payer
            .document
            .as_deref()
            .map(digits_only)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                GatewayError::InvalidPayload("Asaas requires the payer CPF/CNPJ".into())
            })?;

        let lookup = self
            .client
            .get(format!("{}/customers", self.base_url))
            .query(&[("cpfCnpj", document.as_str())])
            .header(API_KEY_HEADER, &self.api_key);
        let found = send_json(GatewayId::Asaas, &self.breaker, lookup).await?;
        if let Some(id) = found["data"]
            .as_array()
            .and_then(|customers| customers.first())
            .and_then(|c| json_id(&c["id"]))
        {
            return Ok(id);
        }

        let create = self
            .client
            .post(format!("{}/customers", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&json!({
                "name": request.payer.name,
                "email": request.payer.email,
                "cpfCnpj": document,
                "phone": request.payer.phone.as_deref().map(digits_only),
            }));
        let created = send_json(GatewayId::Asaas, &self.breaker, create).await?;
        json_id(&created["id"])
            .ok_or_else(|| GatewayError::InvalidPayload("customer response without id".into()))
    }

    async fn pix_qr_code(&self, payment_id: &str) -> Result<PixInstructions, GatewayError> {
        let http = self
            .client
            .get(format!("{}/payments/{}/pixQrCode", self.base_url, payment_id))
            .header(API_KEY_HEADER, &self.api_key);
        let response = send_json(GatewayId::Asaas, &self.breaker, http).await?;
        let qr_code = response["payload"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidPayload("pixQrCode without payload".into()))?;
        Ok(PixInstructions {
            qr_code: qr_code.to_string(),
            qr_code_base64: response["encodedImage"].as_str().map(str::to_string),
            expires_at: response["expirationDate"]
                .as_str()
                .and_then(|raw| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
                .map(|naive| naive.and_utc()),
        })
    }
}

#[async_trait]
impl GatewayAdapter for AsaasAdapter {
    fn id(&self) -> GatewayId {
        GatewayId::Asaas
    }

    fn supports(&self, _method: PaymentMethod) -> bool {
        true
    }

    fn has_status_query(&self) -> bool {
        true
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.method))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, GatewayError> {
        let customer = self.ensure_customer(request).await?;
        let due_date = (Utc::now() + ChronoDuration::days(1))
            .format("%Y-%m-%d")
            .to_string();

        let mut body = json!({
            "customer": customer,
            "billingType": billing_type(request.method),
            "value": to_decimal(request.amount_cents),
            "dueDate": due_date,
            "description": request.description,
            "externalReference": request.order_id.to_string(),
        });
        if request.method == PaymentMethod::CreditCard {
            let card = request.card.as_ref().ok_or_else(|| {
                GatewayError::InvalidPayload("card payments require a card token".into())
            })?;
            body["creditCardToken"] = json!(card.token);
            if card.installments > 1 {
                body["installmentCount"] = json!(card.installments);
                body["totalValue"] = json!(to_decimal(request.amount_cents));
            }
        }
        if let (Some(fee), Some(wallet)) = (
            request.application_fee_cents.filter(|fee| *fee > 0),
            request.split_recipient.as_ref(),
        ) {
            body["split"] = json!([{ "walletId": wallet, "fixedValue": to_decimal(fee) }]);
        }

        let http = self
            .client
            .post(format!("{}/payments", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Idempotency-Key", &request.idempotency_key)
            .json(&body);
        let response = send_json(GatewayId::Asaas, &self.breaker, http).await?;

        let external_id = json_id(&response["id"])
            .ok_or_else(|| GatewayError::InvalidPayload("payment response without id".into()))?;
        let raw_status = response["status"].as_str().unwrap_or("PENDING").to_string();

        let pix = if request.method == PaymentMethod::Pix {
            Some(self.pix_qr_code(&external_id).await?)
        } else {
            None
        };

        debug!(external_id = %external_id, status = %raw_status, "charge created");
        Ok(PaymentResult {
            status: map_status(&raw_status),
            boleto_url: response["bankSlipUrl"].as_str().map(str::to_string),
            external_id,
            raw_status,
            pix,
        })
    }

    #[instrument(skip(self))]
    async fn query_status(
        &self,
        external_id: &str,
    ) -> Result<Option<StatusReport>, GatewayError> {
        let http = self
            .client
            .get(format!("{}/payments/{}", self.base_url, external_id))
            .header(API_KEY_HEADER, &self.api_key);
        let response = send_json(GatewayId::Asaas, &self.breaker, http).await?;
        let raw_status = response["status"]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidPayload("payment lookup without status".into()))?;
        Ok(Some(StatusReport {
            status: map_status(raw_status),
            raw_status: raw_status.to_string(),
        }))
    }

    fn verify_webhook(&self, headers: &HeaderMap, _body: &[u8]) -> Result<(), GatewayError> {
        let expected = self
            .webhook_token
            .as_deref()
            .ok_or_else(|| GatewayError::Unauthorized("webhook token not configured".into()))?;
        let received = header_str(headers, TOKEN_HEADER).unwrap_or_default();
        if !constant_time_eq(received.as_bytes(), expected.as_bytes()) {
            warn!("rejected asaas webhook: token mismatch");
            return Err(GatewayError::Unauthorized("invalid webhook token".into()));
        }
        Ok(())
    }

    fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let event_type = payload["event"].as_str().unwrap_or_default().to_string();
        let payment = &payload["payment"];

        if !event_type.starts_with("PAYMENT_") || !payment.is_object() {
            return Ok(WebhookEvent::Ignored { event_type });
        }

        let external_id = json_id(&payment["id"])
            .ok_or_else(|| GatewayError::InvalidPayload("missing payment.id".into()))?;
        let status = payment["status"].as_str().map(|raw| StatusReport {
            status: map_status(raw),
            raw_status: raw.to_string(),
        });
        Ok(WebhookEvent::Payment {
            external_id,
            status,
        })
    }
}
