use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::url_guard::validate_webhook_url;
use crate::{
    config::WebhookDeliveryConfig,
    entities::{order, outbound_webhook, webhook_delivery, OrderStatus},
    errors::ServiceError,
    gateways::{GatewayId, PaymentMethod},
    repositories::{DeliveryOutcome, DynStore},
    signing::hmac_sha256_hex,
};

/// Event fired once per order, on its first transition to paid
pub const PURCHASE_APPROVED: &str = "purchase_approved";
pub const PURCHASE_REFUNDED: &str = "purchase_refunded";
pub const PURCHASE_CHARGEBACK: &str = "purchase_chargeback";

/// Merchant event announcing that an order reached `status`, if any.
pub fn event_for_status(status: OrderStatus) -> Option<&'static str> {
    match status {
        OrderStatus::Paid => Some(PURCHASE_APPROVED),
        OrderStatus::Refunded => Some(PURCHASE_REFUNDED),
        OrderStatus::Chargeback => Some(PURCHASE_CHARGEBACK),
        OrderStatus::Pending | OrderStatus::Cancelled => None,
    }
}

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";
pub const EVENT_HEADER: &str = "X-Event-Type";

#[derive(Debug, Clone, Serialize)]
pub struct CustomerPayload {
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Body POSTed to merchant endpoints. Stored with the delivery record so a
/// retry resends exactly what the first attempt sent.
#[derive(Debug, Clone, Serialize)]
pub struct OrderEventPayload {
    pub event: String,
    pub order_id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub gateway: GatewayId,
    pub gateway_payment_id: Option<String>,
    pub gross_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub net_amount_cents: i64,
    pub coupon_code: Option<String>,
    pub customer: CustomerPayload,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl OrderEventPayload {
    pub fn new(event: &str, order: &order::Model) -> Self {
        Self {
            event: event.to_string(),
            order_id: order.id,
            vendor_id: order.vendor_id,
            product_id: order.product_id,
            status: order.status,
            payment_method: order.payment_method,
            gateway: order.gateway,
            gateway_payment_id: order.gateway_payment_id.clone(),
            gross_amount_cents: order.gross_amount_cents,
            discount_amount_cents: order.discount_amount_cents,
            net_amount_cents: order.net_amount_cents,
            coupon_code: order.coupon_code.clone(),
            customer: CustomerPayload {
                name: order.customer_name.clone(),
                email: order.customer_email.clone(),
                phone: order.customer_phone.clone(),
            },
            created_at: order.created_at,
            paid_at: order.paid_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DispatchSummary {
    pub webhooks: usize,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct RetrySummary {
    /// Deliveries picked up by this pass
    pub selected: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Claimed by a concurrent pass first
    pub skipped: usize,
}

/// Signs and sends merchant notifications, recording every attempt.
#[derive(Clone)]
pub struct WebhookDispatcher {
    store: DynStore,
    client: reqwest::Client,
    config: WebhookDeliveryConfig,
}

impl WebhookDispatcher {
    pub fn new(store: DynStore, config: WebhookDeliveryConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(Policy::none())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("webhook http client: {e}")))?;
        Ok(Self {
            store,
            client,
            config,
        })
    }

    /// Notifies every active webhook of the order's vendor that subscribes
    /// to `event`.
    ///
    /// Each webhook gets one delivery record, created with its first attempt
    /// already counted. A failing endpoint never fails the caller.
    #[instrument(skip(self, order), fields(order_id = %order.id, vendor_id = %order.vendor_id))]
    pub async fn dispatch_order_event(
        &self,
        order: &order::Model,
        event: &str,
    ) -> Result<DispatchSummary, ServiceError> {
        let hooks = self
            .store
            .active_webhooks_for_event(order.vendor_id, event)
            .await?;
        let mut summary = DispatchSummary {
            webhooks: hooks.len(),
            ..Default::default()
        };
        if hooks.is_empty() {
            debug!("vendor has no webhook subscribed to {event}");
            return Ok(summary);
        }

        let payload = serde_json::to_value(OrderEventPayload::new(event, order))?;

        for hook in hooks {
            match self.deliver_first(&hook, order.id, event, &payload).await {
                Ok(true) => summary.delivered += 1,
                Ok(false) => summary.failed += 1,
                Err(err) => {
                    error!(webhook_id = %hook.id, error = %err, "failed to record webhook delivery");
                    summary.failed += 1;
                }
            }
        }

        info!(
            delivered = summary.delivered,
            failed = summary.failed,
            "{event} dispatched"
        );
        Ok(summary)
    }

    async fn deliver_first(
        &self,
        hook: &outbound_webhook::Model,
        order_id: Uuid,
        event: &str,
        payload: &Value,
    ) -> Result<bool, ServiceError> {
        let now = Utc::now();
        let delivery = self
            .store
            .insert_delivery(webhook_delivery::Model {
                id: Uuid::new_v4(),
                webhook_id: hook.id,
                order_id,
                event_type: event.to_string(),
                payload: payload.clone(),
                success: false,
                response_status: None,
                response_body: None,
                attempts: 1,
                last_attempt_at: Some(now),
                created_at: now,
            })
            .await?;

        let outcome = self.send(hook, event, payload).await;
        self.store
            .complete_delivery_attempt(delivery.id, &outcome)
            .await?;
        record_outcome(&outcome, "initial");
        Ok(outcome.success)
    }

    /// Re-sends failed deliveries that still have attempts left and whose
    /// last attempt is older than the configured backoff.
    ///
    /// Each candidate is claimed before sending, so overlapping passes never
    /// send the same attempt twice. Per-delivery failures are counted, not
    /// propagated.
    #[instrument(skip(self))]
    pub async fn retry_failed(&self) -> Result<RetrySummary, ServiceError> {
        let max_attempts = self.config.max_retries;
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retry_backoff_secs as i64);
        let candidates = self
            .store
            .retryable_deliveries(max_attempts, cutoff, self.config.retry_batch_size)
            .await?;

        let mut summary = RetrySummary {
            selected: candidates.len(),
            ..Default::default()
        };

        for delivery in candidates {
            match self.retry_one(&delivery, max_attempts).await {
                Ok(Some(true)) => summary.delivered += 1,
                Ok(Some(false)) => summary.failed += 1,
                Ok(None) => summary.skipped += 1,
                Err(err) => {
                    error!(delivery_id = %delivery.id, error = %err, "webhook retry failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            selected = summary.selected,
            delivered = summary.delivered,
            failed = summary.failed,
            skipped = summary.skipped,
            "webhook retry pass finished"
        );
        Ok(summary)
    }

    /// `None` when another pass claimed the attempt first.
    async fn retry_one(
        &self,
        delivery: &webhook_delivery::Model,
        max_attempts: i32,
    ) -> Result<Option<bool>, ServiceError> {
        let claimed = self
            .store
            .claim_delivery_attempt(delivery.id, delivery.attempts, max_attempts)
            .await?;
        if !claimed {
            debug!(delivery_id = %delivery.id, "delivery already claimed");
            return Ok(None);
        }

        let outcome = match self.store.find_outbound_webhook(delivery.webhook_id).await? {
            Some(hook) if hook.active => {
                self.send(&hook, &delivery.event_type, &delivery.payload)
                    .await
            }
            _ => DeliveryOutcome {
                success: false,
                response_status: None,
                response_body: Some("webhook no longer active".to_string()),
            },
        };

        self.store
            .complete_delivery_attempt(delivery.id, &outcome)
            .await?;
        record_outcome(&outcome, "retry");
        debug!(
            delivery_id = %delivery.id,
            attempt = delivery.attempts + 1,
            success = outcome.success,
            "webhook retry attempt recorded"
        );
        Ok(Some(outcome.success))
    }

    async fn send(
        &self,
        hook: &outbound_webhook::Model,
        event_type: &str,
        payload: &Value,
    ) -> DeliveryOutcome {
        if let Err(reason) = validate_webhook_url(&hook.url, self.config.allow_insecure_urls) {
            warn!(webhook_id = %hook.id, %reason, "webhook url blocked");
            return DeliveryOutcome {
                success: false,
                response_status: None,
                response_body: Some(format!("blocked: {reason}")),
            };
        }

        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                return DeliveryOutcome {
                    success: false,
                    response_status: None,
                    response_body: Some(err.to_string()),
                }
            }
        };
        let signature = hmac_sha256_hex(hook.secret.as_bytes(), &body);

        let result = self
            .client
            .post(&hook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, Utc::now().timestamp().to_string())
            .header(EVENT_HEADER, event_type)
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                if !status.is_success() {
                    warn!(webhook_id = %hook.id, status = status.as_u16(), "merchant endpoint rejected webhook");
                }
                DeliveryOutcome {
                    success: status.is_success(),
                    response_status: Some(i32::from(status.as_u16())),
                    response_body: Some(truncate_chars(&text, self.config.response_body_limit)),
                }
            }
            Err(err) => {
                warn!(webhook_id = %hook.id, error = %err, "webhook transport failure");
                DeliveryOutcome {
                    success: false,
                    response_status: None,
                    response_body: Some(truncate_chars(
                        &err.to_string(),
                        self.config.response_body_limit,
                    )),
                }
            }
        }
    }
}

fn record_outcome(outcome: &DeliveryOutcome, phase: &'static str) {
    let result = if outcome.success { "delivered" } else { "failed" };
    metrics::counter!(
        "checkout_webhook_deliveries_total",
        1,
        "outcome" => result,
        "phase" => phase
    );
}

fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}
