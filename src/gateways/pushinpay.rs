//! PushinPay: PIX-only provider authenticated by a shared webhook token.
//!
//! PushinPay exposes no payment lookup, so reconciliation skips its orders.
//! Transaction ids are case-insensitive upstream and stored lowercased.

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{
    header_str, json_id, send_json, GatewayAdapter, GatewayError, GatewayId, PaymentMethod,
    PaymentRequest, PaymentResult, PixInstructions, StatusReport, WebhookEvent,
};
use crate::circuit_breaker::CircuitBreaker;
use crate::entities::OrderStatus;
use crate::signing::constant_time_eq;

pub const TOKEN_HEADER: &str = "x-pushinpay-token";

/// `canceled`/`expired` keep the order PENDING so a late payment can still land.
pub fn map_status(raw: &str) -> OrderStatus {
    match raw.to_ascii_lowercase().as_str() {
        "paid" => OrderStatus::Paid,
        _ => OrderStatus::Pending,
    }
}

pub struct PushinPayAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
    webhook_token: Option<String>,
    breaker: Arc<CircuitBreaker>,
}

impl PushinPayAdapter {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        webhook_token: Option<String>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
            webhook_token,
            breaker,
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Value, GatewayError> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        return Ok(value);
    }
    // PushinPay may also post application/x-www-form-urlencoded
    let fields: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect();
    if fields.is_empty() {
        return Err(GatewayError::InvalidPayload("empty webhook body".into()));
    }
    Ok(Value::Object(fields))
}

#[async_trait]
impl GatewayAdapter for PushinPayAdapter {
    fn id(&self) -> GatewayId {
        GatewayId::PushinPay
    }

    fn supports(&self, method: PaymentMethod) -> bool {
        method == PaymentMethod::Pix
    }

    // PushinPay only pushes; there is no payment lookup endpoint
    fn has_status_query(&self) -> bool {
        false
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<PaymentResult, GatewayError> {
        if request.method != PaymentMethod::Pix {
            return Err(GatewayError::Unsupported {
                gateway: GatewayId::PushinPay,
                operation: format!("{} payments", request.method),
            });
        }

        // PushinPay takes the amount in cents
        let mut body = json!({ "value": request.amount_cents });
        if let Some(url) = &request.notification_url {
            body["webhook_url"] = json!(url);
        }
        if let (Some(fee), Some(account)) = (
            request.application_fee_cents.filter(|fee| *fee > 0),
            request.split_recipient.as_ref(),
        ) {
            body["split_rules"] = json!([{ "value": fee, "account_id": account }]);
        }

        let http = self
            .client
            .post(format!("{}/api/pix/cashIn", self.base_url))
            .bearer_auth(&self.api_token)
            .header("Accept", "application/json")
            .header("X-Idempotency-Key", &request.idempotency_key)
            .json(&body);
        let response = send_json(GatewayId::PushinPay, &self.breaker, http).await?;

        let external_id = json_id(&response["id"])
            .map(|id| id.to_lowercase())
            .ok_or_else(|| GatewayError::InvalidPayload("cashIn response without id".into()))?;
        let raw_status = response["status"].as_str().unwrap_or("created").to_string();
        let pix = response["qr_code"].as_str().map(|qr| PixInstructions {
            qr_code: qr.to_string(),
            qr_code_base64: response["qr_code_base64"].as_str().map(str::to_string),
            expires_at: None,
        });

        debug!(external_id = %external_id, "pix charge created");
        Ok(PaymentResult {
            external_id,
            status: map_status(&raw_status),
            raw_status,
            pix,
            boleto_url: None,
        })
    }

    async fn query_status(
        &self,
        _external_id: &str,
    ) -> Result<Option<StatusReport>, GatewayError> {
        Ok(None)
    }

    fn verify_webhook(&self, headers: &HeaderMap, _body: &[u8]) -> Result<(), GatewayError> {
        let expected = self
            .webhook_token
            .as_deref()
            .ok_or_else(|| GatewayError::Unauthorized("webhook token not configured".into()))?;
        let received = header_str(headers, TOKEN_HEADER).unwrap_or_default();
        if !constant_time_eq(received.as_bytes(), expected.as_bytes()) {
            warn!("rejected pushinpay webhook: token mismatch");
            return Err(GatewayError::Unauthorized("invalid webhook token".into()));
        }
        Ok(())
    }

    fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError> {
        let payload = parse_body(body)?;
        let external_id = json_id(&payload["id"])
            .map(|id| id.to_lowercase())
            .ok_or_else(|| GatewayError::InvalidPayload("missing payment id".into()))?;
        let raw_status = payload["status"].as_str().unwrap_or("created").to_string();
        Ok(WebhookEvent::Payment {
            external_id,
            status: Some(StatusReport {
                status: map_status(&raw_status),
                raw_status,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::gateways::{http_client, idempotency_key, Payer};
    use assert_matches::assert_matches;
    use axum::http::HeaderValue;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> PushinPayAdapter {
        PushinPayAdapter::new(
            http_client(Duration::from_secs(5)).unwrap(),
            base_url,
            "pp-token",
            Some("hook-token".into()),
            Arc::new(CircuitBreaker::new("pushinpay", CircuitBreakerConfig::default())),
        )
    }

    #[test]
    fn only_paid_moves_the_order() {
        assert_eq!(map_status("paid"), OrderStatus::Paid);
        assert_eq!(map_status("created"), OrderStatus::Pending);
        assert_eq!(map_status("canceled"), OrderStatus::Pending);
        assert_eq!(map_status("expired"), OrderStatus::Pending);
    }

    #[test]
    fn token_must_match() {
        let adapter = adapter("http://unused");
        let mut headers = HeaderMap::new();
        assert_matches!(
            adapter.verify_webhook(&headers, b"{}"),
            Err(GatewayError::Unauthorized(_))
        );
        headers.insert(TOKEN_HEADER, HeaderValue::from_static("hook-token"));
        assert!(adapter.verify_webhook(&headers, b"{}").is_ok());
    }

    #[test]
    fn parses_form_encoded_webhook_and_lowercases_id() {
        let event = adapter("http://unused")
            .parse_event(b"id=9C1A-ABC&status=paid&value=1000")
            .unwrap();
        assert_matches!(
            event,
            WebhookEvent::Payment { external_id, status: Some(StatusReport { status: OrderStatus::Paid, .. }) }
                if external_id == "9c1a-abc"
        );
    }

    #[tokio::test]
    async fn creates_pix_charge_in_cents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pix/cashIn"))
            .and(body_json(serde_json::json!({"value": 4990})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "9C1A-ABC",
                "status": "created",
                "qr_code": "00020126...",
                "qr_code_base64": "data:image/png;base64,AAAA"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let order_id = Uuid::new_v4();
        let request = PaymentRequest {
            order_id,
            idempotency_key: idempotency_key(order_id, PaymentMethod::Pix),
            amount_cents: 4990,
            method: PaymentMethod::Pix,
            description: "Ebook".into(),
            payer: Payer {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                phone: None,
                document: None,
            },
            card: None,
            application_fee_cents: None,
            split_recipient: None,
            notification_url: None,
        };

        let result = adapter(&server.uri()).create_payment(&request).await.unwrap();
        assert_eq!(result.external_id, "9c1a-abc");
        assert_eq!(result.status, OrderStatus::Pending);
        assert_eq!(result.pix.map(|p| p.qr_code), Some("00020126...".to_string()));
    }

    #[tokio::test]
    async fn has_no_status_query() {
        assert!(adapter("http://unused").query_status("x").await.unwrap().is_none());
    }
}
