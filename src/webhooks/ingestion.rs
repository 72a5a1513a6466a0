use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    entities::OrderStatus,
    errors::ServiceError,
    gateways::{GatewayAdapter, GatewayId, GatewayRegistry, WebhookEvent},
    repositories::DynStore,
    services::order_status::{OrderStatusService, StatusChange},
};

/// What an accepted gateway webhook did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Applied { order_id: Uuid, status: OrderStatus },
    Unchanged { order_id: Uuid, status: OrderStatus },
    Ignored { reason: String },
}

impl IngestOutcome {
    fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Applied { .. } => "applied",
            IngestOutcome::Unchanged { .. } => "unchanged",
            IngestOutcome::Ignored { .. } => "ignored",
        }
    }
}

/// Authenticates, normalizes and applies provider webhooks.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: DynStore,
    gateways: Arc<GatewayRegistry>,
    status: OrderStatusService,
}

impl WebhookIngestor {
    pub fn new(store: DynStore, gateways: Arc<GatewayRegistry>, status: OrderStatusService) -> Self {
        Self {
            store,
            gateways,
            status,
        }
    }

    /// Processes one inbound webhook for `raw_gateway`.
    ///
    /// Authentication runs on the raw body before anything is parsed. Events
    /// that are irrelevant or reference unknown payments are acknowledged as
    /// `Ignored` so the provider stops redelivering them.
    #[instrument(skip(self, headers, body), fields(gateway = %raw_gateway, bytes = body.len()))]
    pub async fn ingest(
        &self,
        raw_gateway: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<IngestOutcome, ServiceError> {
        let adapter = self.gateways.resolve(raw_gateway)?;
        let gateway = adapter.id();

        if let Err(err) = adapter.verify_webhook(headers, body) {
            warn!(%gateway, error = %err, "webhook authentication failed");
            record(gateway.as_ref(), "rejected");
            return Err(err.into());
        }

        let outcome = self.process(gateway, adapter.as_ref(), body).await;
        match &outcome {
            Ok(outcome) => record(gateway.as_ref(), outcome.label()),
            Err(_) => record(gateway.as_ref(), "error"),
        }
        outcome
    }

    async fn process(
        &self,
        gateway: GatewayId,
        adapter: &dyn GatewayAdapter,
        body: &[u8],
    ) -> Result<IngestOutcome, ServiceError> {
        let (external_id, reported) = match adapter.parse_event(body)? {
            WebhookEvent::Ignored { event_type } => {
                debug!(%event_type, "event ignored");
                return Ok(IngestOutcome::Ignored {
                    reason: format!("event '{event_type}' not handled"),
                });
            }
            WebhookEvent::Payment {
                external_id,
                status,
            } => (external_id, status),
        };

        let Some(order) = self
            .store
            .find_order_by_external_id(gateway, &external_id)
            .await?
        else {
            info!(%external_id, "webhook for unknown payment");
            return Ok(IngestOutcome::Ignored {
                reason: "unknown payment".to_string(),
            });
        };

        let report = match reported {
            Some(report) => report,
            None => match adapter.query_status(&external_id).await {
                Ok(Some(report)) => report,
                Ok(None) => {
                    return Ok(IngestOutcome::Ignored {
                        reason: "status unavailable".to_string(),
                    })
                }
                Err(err) => {
                    warn!(%external_id, error = %err, "status lookup failed");
                    return Err(err.into());
                }
            },
        };

        debug!(%external_id, raw_status = %report.raw_status, status = %report.status, "gateway status");
        if report.status == OrderStatus::Pending {
            return Ok(IngestOutcome::Unchanged {
                order_id: order.id,
                status: order.status,
            });
        }

        let change = self
            .status
            .apply_status(&order, report.status, gateway.as_ref())
            .await?;
        Ok(match change {
            StatusChange::Applied(updated) => IngestOutcome::Applied {
                order_id: updated.id,
                status: updated.status,
            },
            StatusChange::Unchanged(current) => IngestOutcome::Unchanged {
                order_id: current.id,
                status: current.status,
            },
        })
    }
}

fn record(gateway: &str, outcome: &'static str) {
    metrics::counter!(
        "checkout_webhooks_received_total",
        1,
        "gateway" => gateway.to_string(),
        "outcome" => outcome
    );
}
