//! Mercado Pago: card and PIX payments, status queries and HMAC-signed webhooks.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    digits_only, header_str, json_id, send_json, GatewayAdapter, GatewayError, GatewayId,
    PaymentMethod, PaymentRequest, PaymentResult, PixInstructions, StatusReport, WebhookEvent,
};
use crate::circuit_breaker::CircuitBreaker;
use crate::entities::OrderStatus;
use crate::signing::{constant_time_eq, hmac_sha256_hex};

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FALLBACK_LAST_NAME: &str = "Cliente";

/// Pure mapping from Mercado Pago payment status to order status.
pub fn map_status(raw: &str) -> OrderStatus {
    match raw {
        "approved" => OrderStatus::Paid,
        "rejected" | "cancelled" => OrderStatus::Cancelled,
        "refunded" | "charged_back" => OrderStatus::Refunded,
        // pending, in_process, in_mediation, authorized and anything new
        _ => OrderStatus::Pending,
    }
}

/// Canonical string Mercado Pago signs for webhook notifications.
pub fn signature_manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{};request-id:{};ts:{};", data_id, request_id, ts)
}

/// Splits a full name into Mercado Pago's first/last name fields.
pub fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.collect::<Vec<_>>().join(" ");
    let last = if rest.is_empty() {
        FALLBACK_LAST_NAME.to_string()
    } else {
        rest
    };
    (first, last)
}

/// Individual taxpayer ids (CPF) have at most 11 digits; longer ones are CNPJ.
pub fn document_type(digits: &str) -> &'static str {
    if digits.len() <= 11 {
        "CPF"
    } else {
        "CNPJ"
    }
}

fn to_decimal(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub struct MercadoPagoAdapter {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    webhook_secret: Option<String>,
    signature_tolerance_secs: i64,
    breaker: Arc<CircuitBreaker>,
}

impl MercadoPagoAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        webhook_secret: Option<String>,
        signature_tolerance_secs: i64,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            webhook_secret,
            signature_tolerance_secs,
            breaker,
        }
    }

    fn payment_body(&self, request: &PaymentRequest) -> Result<Value, GatewayError> {
        let (first_name, last_name) = split_name(&request.payer.name);
        let mut payer = json!({
            "email": request.payer.email,
            "first_name": first_name,
            "last_name": last_name,
        });
        if let Some(doc) = request
            .payer
            .document
            .as_deref()
            .map(digits_only)
            .filter(|d| !d.is_empty())
        {
            payer["identification"] = json!({ "type": document_type(&doc), "number": doc });
        }

        let mut body = json!({
            "transaction_amount": to_decimal(request.amount_cents),
            "description": request.description,
            "external_reference": request.order_id.to_string(),
            "payer": payer,
        });

        match request.method {
            PaymentMethod::Pix => {
                body["payment_method_id"] = json!("pix");
            }
            PaymentMethod::CreditCard => {
                let card = request.card.as_ref().ok_or_else(|| {
                    GatewayError::InvalidPayload("card payments require a card token".into())
                })?;
                body["token"] = json!(card.token);
                body["installments"] = json!(card.installments.max(1));
                if let Some(method_id) = &card.payment_method_id {
                    body["payment_method_id"] = json!(method_id);
                }
                if let Some(issuer_id) = &card.issuer_id {
                    body["issuer_id"] = json!(issuer_id);
                }
            }
            PaymentMethod::Boleto => {
                return Err(GatewayError::Unsupported {
                    gateway: GatewayId::MercadoPago,
                    operation: "boleto payments".into(),
                })
            }
        }

        if let Some(url) = &request.notification_url {
            body["notification_url"] = json!(url);
        }
        if let Some(fee) = request.application_fee_cents.filter(|fee| *fee > 0) {
            body["application_fee"] = json!(to_decimal(fee));
        }
        Ok(body)
    }

    /// Signature check with an explicit clock.
    pub fn verify_signature_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), GatewayError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| GatewayError::Unauthorized("webhook secret not configured".into()))?;

        let signature = header_str(headers, SIGNATURE_HEADER)
            .ok_or_else(|| GatewayError::Unauthorized("missing x-signature header".into()))?;
        let request_id = header_str(headers, REQUEST_ID_HEADER)
            .ok_or_else(|| GatewayError::Unauthorized("missing x-request-id header".into()))?;

        let mut ts = None;
        let mut v1 = None;
        for part in signature.split(',') {
            match part.trim().split_once('=') {
                Some(("ts", value)) => ts = Some(value.trim()),
                Some(("v1", value)) => v1 = Some(value.trim()),
                _ => {}
            }
        }
        let (ts, v1) = match (ts, v1) {
            (Some(ts), Some(v1)) if !ts.is_empty() && !v1.is_empty() => (ts, v1),
            _ => {
                return Err(GatewayError::Unauthorized(
                    "malformed x-signature header".into(),
                ))
            }
        };

        let ts_secs: i64 = ts
            .parse()
            .map_err(|_| GatewayError::Unauthorized("non-numeric signature timestamp".into()))?;
        if (now_unix - ts_secs).abs() > self.signature_tolerance_secs {
            return Err(GatewayError::Unauthorized(
                "signature timestamp outside freshness window".into(),
            ));
        }

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::Unauthorized(format!("unreadable body: {}", e)))?;
        let data_id = json_id(&payload["data"]["id"])
            .ok_or_else(|| GatewayError::Unauthorized("missing data.id".into()))?;

        let manifest = signature_manifest(&data_id, request_id, ts);
        let expected = hmac_sha256_hex(secret.as_bytes(), manifest.as_bytes());
        if !constant_time_eq(expected.as_bytes(), v1.to_ascii_lowercase().as_bytes()) {
            return Err(GatewayError::Unauthorized("signature mismatch".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayAdapter for MercadoPagoAdapter {
    fn id(&self) -> GatewayId {
        GatewayId::MercadoPago
    }

    fn supports(&self, method: PaymentMethod) -> bool {
        matches!(method, PaymentMethod::Pix | PaymentMethod::CreditCard)
    }

    fn has_status_query(&self) -> bool {
        true
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id, method = %request.method))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, GatewayError> {
        let body = self.payment_body(request)?;
        let http = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.idempotency_key)
            .json(&body);

        let response = send_json(GatewayId::MercadoPago, &self.breaker, http).await?;

        let external_id = json_id(&response["id"]).ok_or_else(|| {
            GatewayError::InvalidPayload("payment response without id".into())
        })?;
        let raw_status = response["status"].as_str().unwrap_or_default().to_string();
        let transaction = &response["point_of_interaction"]["transaction_data"];
        let pix = transaction["qr_code"].as_str().map(|qr| PixInstructions {
            qr_code: qr.to_string(),
            qr_code_base64: transaction["qr_code_base64"].as_str().map(str::to_string),
            expires_at: response["date_of_expiration"]
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        });

        debug!(external_id = %external_id, status = %raw_status, "payment created");
        Ok(PaymentResult {
            external_id,
            status: map_status(&raw_status),
            raw_status,
            pix,
            boleto_url: None,
        })
    }

    #[instrument(skip(self))]
    async fn query_status(
        &self,
        external_id: &str,
    ) -> Result<Option<StatusReport>, GatewayError> {
        let http = self
            .client
            .get(format!("{}/v1/payments/{}", self.base_url, external_id))
            .bearer_auth(&self.access_token);
        let response = send_json(GatewayId::MercadoPago, &self.breaker, http).await?;

        let raw_status = response["status"].as_str().ok_or_else(|| {
            GatewayError::InvalidPayload("payment lookup without status".into())
        })?;
        Ok(Some(StatusReport {
            status: map_status(raw_status),
            raw_status: raw_status.to_string(),
        }))
    }

    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError> {
        let result = self.verify_signature_at(headers, body, Utc::now().timestamp());
        if let Err(err) = &result {
            warn!(error = %err, "rejected mercadopago webhook");
        }
        result
    }

    fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::InvalidPayload(e.to_string()))?;
        let event_type = payload["type"]
            .as_str()
            .or_else(|| payload["topic"].as_str())
            .unwrap_or_default();
        if event_type != "payment" {
            return Ok(WebhookEvent::Ignored {
                event_type: event_type.to_string(),
            });
        }
        let external_id = json_id(&payload["data"]["id"])
            .ok_or_else(|| GatewayError::InvalidPayload("missing data.id".into()))?;
        // Notifications carry only the id; status comes from the payments API
        Ok(WebhookEvent::Payment {
            external_id,
            status: None,
        })
    }
}
