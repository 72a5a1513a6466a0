/*!
 * # Gateway adapters
 *
 * One `GatewayAdapter` per payment provider. Adapters translate the
 * provider-neutral `PaymentRequest` into the provider's API, authenticate
 * its inbound webhooks and normalize its status vocabulary into
 * [`OrderStatus`] at the boundary, so nothing downstream knows which
 * provider it is talking to.
 */

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::signing::sha256_hex;

pub mod asaas;
pub mod mercadopago;
pub mod pushinpay;
pub mod registry;
mod types;

pub use registry::GatewayRegistry;
pub use types::{GatewayId, PaymentMethod, UnknownGateway};

/// Buyer data forwarded to the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    /// CPF/CNPJ, digits only
    pub document: Option<String>,
}

/// Tokenized card fields collected by the checkout page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub token: String,
    pub installments: u32,
    pub payment_method_id: Option<String>,
    pub issuer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: Uuid,
    pub idempotency_key: String,
    pub amount_cents: i64,
    pub method: PaymentMethod,
    pub description: String,
    pub payer: Payer,
    pub card: Option<CardDetails>,
    /// Marketplace fee retained for an affiliate split
    pub application_fee_cents: Option<i64>,
    pub split_recipient: Option<String>,
    pub notification_url: Option<String>,
}

/// Copy-and-paste / QR data for instant transfers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PixInstructions {
    pub qr_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    pub external_id: String,
    pub status: OrderStatus,
    pub raw_status: String,
    pub pix: Option<PixInstructions>,
    pub boleto_url: Option<String>,
}

/// Authoritative status reported by a provider, already normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: OrderStatus,
    pub raw_status: String,
}

/// Provider webhook normalized at the boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// A payment changed. `status` is `None` when the provider only sends
    /// the id and the status must be fetched.
    Payment {
        external_id: String,
        status: Option<StatusReport>,
    },
    /// Acknowledged and dropped
    Ignored { event_type: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{gateway} rejected the request ({status}): {message}")]
    Api {
        gateway: GatewayId,
        status: u16,
        message: String,
        payload: Option<Value>,
    },

    #[error("{gateway} request failed: {message}")]
    Transport { gateway: GatewayId, message: String },

    #[error("webhook authentication failed: {0}")]
    Unauthorized(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{gateway} does not support {operation}")]
    Unsupported {
        gateway: GatewayId,
        operation: String,
    },

    #[error("circuit open for {0}")]
    CircuitOpen(GatewayId),
}

impl GatewayError {
    /// Whether the error says the provider itself is unhealthy. Business
    /// rejections (4xx) do not count against the circuit breaker.
    pub fn is_outage(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Api {
                gateway,
                status,
                message,
                payload,
            } => ServiceError::GatewayApiError {
                gateway: gateway.to_string(),
                status,
                message,
                payload,
            },
            GatewayError::Transport { gateway, message } => {
                ServiceError::ServiceUnavailable(format!("{} unreachable: {}", gateway, message))
            }
            GatewayError::Unauthorized(msg) => ServiceError::Unauthorized(msg),
            GatewayError::InvalidPayload(msg) => ServiceError::BadRequest(msg),
            err @ GatewayError::Unsupported { .. } => {
                ServiceError::UnsupportedGateway(err.to_string())
            }
            GatewayError::CircuitOpen(_) => ServiceError::CircuitBreakerOpen,
        }
    }
}

/// Capability every payment provider implements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn id(&self) -> GatewayId;

    fn supports(&self, method: PaymentMethod) -> bool;

    /// Whether `query_status` can ever return a report. Reconciliation only
    /// selects orders of gateways that answer `true`.
    fn has_status_query(&self) -> bool;

    async fn create_payment(&self, request: &PaymentRequest)
        -> Result<PaymentResult, GatewayError>;

    /// `Ok(None)` when the provider has no status query API.
    async fn query_status(&self, external_id: &str)
        -> Result<Option<StatusReport>, GatewayError>;

    /// Authenticates an inbound webhook. Must not mutate anything.
    fn verify_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError>;

    fn parse_event(&self, body: &[u8]) -> Result<WebhookEvent, GatewayError>;
}

/// Deterministic key so a retried creation call never charges twice.
pub fn idempotency_key(order_id: Uuid, method: PaymentMethod) -> String {
    sha256_hex(format!("{}:{}", order_id, method).as_bytes())
}

pub(crate) fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn http_client(timeout: std::time::Duration) -> Result<reqwest::Client, ServiceError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ServiceError::InternalError(format!("failed to build HTTP client: {}", e)))
}

/// Sends `request` through `breaker` and decodes a JSON body.
///
/// Non-2xx responses become [`GatewayError::Api`] carrying the provider's
/// body. Only outages (transport failures, 5xx) move the breaker.
pub(crate) async fn send_json(
    gateway: GatewayId,
    breaker: &CircuitBreaker,
    request: reqwest::RequestBuilder,
) -> Result<Value, GatewayError> {
    let result = breaker
        .call_classified(
            || async move {
                let response = request.send().await.map_err(|e| GatewayError::Transport {
                    gateway,
                    message: e.to_string(),
                })?;
                let status = response.status();
                let bytes = response.bytes().await.map_err(|e| GatewayError::Transport {
                    gateway,
                    message: e.to_string(),
                })?;
                let body: Value = if bytes.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        Value::String(String::from_utf8_lossy(&bytes).into_owned())
                    })
                };

                if !status.is_success() {
                    return Err(GatewayError::Api {
                        gateway,
                        status: status.as_u16(),
                        message: error_message(&body)
                            .unwrap_or_else(|| status.to_string()),
                        payload: Some(body),
                    });
                }
                Ok(body)
            },
            GatewayError::is_outage,
        )
        .await;

    match result {
        Ok(body) => Ok(body),
        Err(CircuitBreakerError::CircuitOpen) => Err(GatewayError::CircuitOpen(gateway)),
        Err(CircuitBreakerError::ServiceFailure(err)) => Err(err),
    }
}

fn error_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    // Asaas: {"errors":[{"code":"...","description":"..."}]}
    body.get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(|e| e.get("description"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Reads a JSON id that providers send either as a number or a string.
pub(crate) fn json_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn idempotency_key_is_deterministic_per_method() {
        let order_id = Uuid::new_v4();
        let pix = idempotency_key(order_id, PaymentMethod::Pix);
        assert_eq!(pix, idempotency_key(order_id, PaymentMethod::Pix));
        assert_ne!(pix, idempotency_key(order_id, PaymentMethod::CreditCard));
        assert_eq!(pix.len(), 64);
    }

    #[test]
    fn only_outages_trip_the_breaker() {
        let rejected = GatewayError::Api {
            gateway: GatewayId::Asaas,
            status: 400,
            message: "invalid".into(),
            payload: None,
        };
        let down = GatewayError::Api {
            gateway: GatewayId::Asaas,
            status: 503,
            message: "down".into(),
            payload: None,
        };
        assert!(!rejected.is_outage());
        assert!(down.is_outage());
    }

    #[test]
    fn gateway_errors_map_to_service_errors() {
        let err: ServiceError = GatewayError::CircuitOpen(GatewayId::MercadoPago).into();
        assert_matches!(err, ServiceError::CircuitBreakerOpen);

        let err: ServiceError = GatewayError::Api {
            gateway: GatewayId::MercadoPago,
            status: 400,
            message: "bad token".into(),
            payload: Some(json!({"message": "bad token"})),
        }
        .into();
        assert_matches!(err, ServiceError::GatewayApiError { status: 400, ref gateway, .. } if gateway == "mercadopago");
    }

    #[tokio::test]
    async fn send_json_keeps_upstream_payload_on_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"message": "invalid card token", "status": 400})),
            )
            .mount(&server)
            .await;

        let breaker = CircuitBreaker::new("mercadopago", CircuitBreakerConfig::default());
        let client = http_client(Duration::from_secs(5)).unwrap();
        let request = client.post(format!("{}/v1/payments", server.uri()));

        let err = send_json(GatewayId::MercadoPago, &breaker, request)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            GatewayError::Api { status: 400, ref message, payload: Some(_), .. } if message == "invalid card token"
        );
    }
}
