use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::ReconciliationConfig,
    entities::{order, OrderStatus},
    errors::ServiceError,
    gateways::{GatewayAdapter, GatewayId, GatewayRegistry},
    repositories::DynStore,
    services::order_status::{OrderStatusService, StatusChange},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Updated,
    Skipped,
    Errored,
}

impl ReconcileOutcome {
    fn label(self) -> &'static str {
        match self {
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Skipped => "skipped",
            ReconcileOutcome::Errored => "errored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderReconciliation {
    pub order_id: Uuid,
    pub gateway: GatewayId,
    pub outcome: ReconcileOutcome,
    pub previous_status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_status: Option<OrderStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errored: usize,
    pub results: Vec<OrderReconciliation>,
}

impl ReconcileSummary {
    fn push(&mut self, result: OrderReconciliation) {
        match result.outcome {
            ReconcileOutcome::Updated => self.updated += 1,
            ReconcileOutcome::Skipped => self.skipped += 1,
            ReconcileOutcome::Errored => self.errored += 1,
        }
        metrics::counter!(
            "checkout_reconcile_orders_total",
            1,
            "outcome" => result.outcome.label()
        );
        self.results.push(result);
    }
}

/// Pull-based recovery for PENDING orders whose webhook never arrived.
#[derive(Clone)]
pub struct ReconciliationService {
    store: DynStore,
    gateways: Arc<GatewayRegistry>,
    status: OrderStatusService,
    config: ReconciliationConfig,
}

impl ReconciliationService {
    pub fn new(
        store: DynStore,
        gateways: Arc<GatewayRegistry>,
        status: OrderStatusService,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            store,
            gateways,
            status,
            config,
        }
    }

    /// Runs one bounded sweep.
    ///
    /// Picks PENDING orders with a gateway payment id whose age lies within
    /// `[min_age_secs, max_age_secs]`, asks each gateway for the authoritative
    /// status and applies it through [`OrderStatusService`]. Orders of
    /// gateways without a status query are never selected, so they cannot
    /// crowd the batch. One order failing never stops the sweep.
    #[instrument(skip(self))]
    pub async fn run(&self, batch_size: Option<u64>) -> Result<ReconcileSummary, ServiceError> {
        let limit = batch_size
            .unwrap_or(self.config.batch_size)
            .clamp(1, self.config.max_batch_size.max(1));
        let now = Utc::now();
        let created_before = now - Duration::seconds(self.config.min_age_secs as i64);
        let created_after = now - Duration::seconds(self.config.max_age_secs as i64);

        let reconcilable = self.gateways.reconcilable();
        if reconcilable.is_empty() {
            debug!("no configured gateway supports status queries");
            return Ok(ReconcileSummary::default());
        }
        let orders = self
            .store
            .list_stale_pending_orders(&reconcilable, created_after, created_before, limit)
            .await?;

        let mut summary = ReconcileSummary {
            scanned: orders.len(),
            ..Default::default()
        };

        for (gateway, orders) in group_by_gateway(orders) {
            let adapter = match self.gateways.get(gateway) {
                Ok(adapter) => adapter,
                Err(err) => {
                    warn!(%gateway, error = %err, "gateway unavailable for reconciliation");
                    for order in orders {
                        summary.push(result(&order, ReconcileOutcome::Errored, None, Some(err.to_string())));
                    }
                    continue;
                }
            };
            for order in orders {
                summary.push(self.reconcile_order(adapter.as_ref(), &order).await);
            }
        }

        info!(
            scanned = summary.scanned,
            updated = summary.updated,
            skipped = summary.skipped,
            errored = summary.errored,
            "reconciliation sweep finished"
        );
        Ok(summary)
    }

    async fn reconcile_order(
        &self,
        adapter: &dyn GatewayAdapter,
        order: &order::Model,
    ) -> OrderReconciliation {
        let Some(external_id) = order.gateway_payment_id.as_deref() else {
            return result(order, ReconcileOutcome::Skipped, None, Some("no gateway payment id".into()));
        };

        let report = match adapter.query_status(external_id).await {
            Ok(Some(report)) => report,
            Ok(None) => {
                return result(
                    order,
                    ReconcileOutcome::Skipped,
                    None,
                    Some("gateway has no status query".into()),
                )
            }
            Err(err) => {
                warn!(order_id = %order.id, %external_id, error = %err, "status query failed");
                return result(order, ReconcileOutcome::Errored, None, Some(err.to_string()));
            }
        };

        if report.status == OrderStatus::Pending {
            debug!(order_id = %order.id, raw_status = %report.raw_status, "still pending at gateway");
            return result(order, ReconcileOutcome::Skipped, None, Some(report.raw_status));
        }

        match self
            .status
            .apply_status(order, report.status, "reconciliation")
            .await
        {
            Ok(StatusChange::Applied(updated)) => {
                result(order, ReconcileOutcome::Updated, Some(updated.status), None)
            }
            Ok(StatusChange::Unchanged(_)) => result(
                order,
                ReconcileOutcome::Skipped,
                None,
                Some("already settled".into()),
            ),
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "failed to apply reconciled status");
                result(order, ReconcileOutcome::Errored, None, Some(err.to_string()))
            }
        }
    }
}

/// Groups orders per gateway, keeping oldest-first order inside each group.
fn group_by_gateway(orders: Vec<order::Model>) -> Vec<(GatewayId, Vec<order::Model>)> {
    let mut groups: HashMap<GatewayId, Vec<order::Model>> = HashMap::new();
    for order in orders {
        groups.entry(order.gateway).or_default().push(order);
    }
    let mut groups: Vec<_> = groups.into_iter().collect();
    groups.sort_by_key(|(gateway, _)| gateway.to_string());
    groups
}

fn result(
    order: &order::Model,
    outcome: ReconcileOutcome,
    new_status: Option<OrderStatus>,
    detail: Option<String>,
) -> OrderReconciliation {
    OrderReconciliation {
        order_id: order.id,
        gateway: order.gateway,
        outcome,
        previous_status: order.status,
        new_status,
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WebhookDeliveryConfig;
    use crate::gateways::{GatewayError, MockGatewayAdapter, PaymentMethod, StatusReport};
    use crate::repositories::{CheckoutStore, InMemoryStore};
    use crate::webhooks::WebhookDispatcher;

    fn stale_order(gateway: GatewayId, external_id: &str, age_secs: i64) -> order::Model {
        let created = Utc::now() - Duration::seconds(age_secs);
        order::Model {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            offer_id: None,
            checkout_id: None,
            customer_name: "Joao".into(),
            customer_email: "joao@example.com".into(),
            customer_phone: None,
            customer_document: None,
            gross_amount_cents: 5000,
            discount_amount_cents: 0,
            net_amount_cents: 5000,
            application_fee_cents: 0,
            coupon_id: None,
            coupon_code: None,
            affiliate_id: None,
            payment_method: PaymentMethod::Pix,
            gateway,
            gateway_payment_id: Some(external_id.to_string()),
            status: OrderStatus::Pending,
            paid_at: None,
            created_at: created,
            updated_at: created,
        }
    }

    fn adapter(id: GatewayId, status: Option<OrderStatus>) -> MockGatewayAdapter {
        let mut mock = MockGatewayAdapter::new();
        mock.expect_id().return_const(id);
        mock.expect_has_status_query().return_const(status.is_some());
        mock.expect_query_status().returning(move |_| {
            Ok(status.map(|status| StatusReport {
                status,
                raw_status: status.to_string().to_lowercase(),
            }))
        });
        mock
    }

    fn service(store: Arc<InMemoryStore>, registry: GatewayRegistry) -> ReconciliationService {
        let dispatcher = Arc::new(
            WebhookDispatcher::new(store.clone(), WebhookDeliveryConfig::default()).unwrap(),
        );
        let status = OrderStatusService::new(store.clone(), dispatcher);
        ReconciliationService::new(store, Arc::new(registry), status, ReconciliationConfig::default())
    }

    #[tokio::test]
    async fn second_sweep_finds_nothing_to_update() {
        let store = Arc::new(InMemoryStore::new());
        let order = stale_order(GatewayId::MercadoPago, "mp-1", 600);
        store.insert_order(order.clone()).await.unwrap();

        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(adapter(GatewayId::MercadoPago, Some(OrderStatus::Paid))));
        let service = service(store.clone(), registry);

        let first = service.run(None).await.unwrap();
        assert_eq!((first.scanned, first.updated), (1, 1));
        assert_eq!(first.results[0].new_status, Some(OrderStatus::Paid));

        let second = service.run(None).await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(second.updated, 0);

        let stored = store.find_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn young_and_ancient_orders_are_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_order(stale_order(GatewayId::MercadoPago, "young", 30))
            .await
            .unwrap();
        store
            .insert_order(stale_order(GatewayId::MercadoPago, "ancient", 3 * 24 * 3600))
            .await
            .unwrap();

        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(adapter(GatewayId::MercadoPago, Some(OrderStatus::Paid))));
        let summary = service(store, registry).run(None).await.unwrap();
        assert_eq!(summary.scanned, 0);
    }

    #[tokio::test]
    async fn per_order_failures_do_not_abort_the_sweep() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_order(stale_order(GatewayId::Asaas, "asaas-down", 600))
            .await
            .unwrap();
        store
            .insert_order(stale_order(GatewayId::MercadoPago, "still-pending", 800))
            .await
            .unwrap();

        let mut failing = MockGatewayAdapter::new();
        failing.expect_id().return_const(GatewayId::Asaas);
        failing.expect_has_status_query().return_const(true);
        failing.expect_query_status().returning(|_| {
            Err(GatewayError::Transport {
                gateway: GatewayId::Asaas,
                message: "connection reset".into(),
            })
        });

        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(failing));
        registry.register(Arc::new(adapter(GatewayId::MercadoPago, Some(OrderStatus::Pending))));

        let summary = service(store, registry).run(None).await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.updated, 0);
    }

    #[tokio::test]
    async fn push_only_orders_never_crowd_out_queryable_ones() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..3 {
            store
                .insert_order(stale_order(GatewayId::PushinPay, &format!("pp-{i}"), 3000 + i))
                .await
                .unwrap();
        }
        // Youngest of the four, so oldest-first alone would never reach it
        let queryable = stale_order(GatewayId::MercadoPago, "mp-late", 600);
        store.insert_order(queryable.clone()).await.unwrap();

        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(adapter(GatewayId::PushinPay, None)));
        registry.register(Arc::new(adapter(GatewayId::MercadoPago, Some(OrderStatus::Paid))));
        let service = service(store.clone(), registry);

        let summary = service.run(Some(3)).await.unwrap();
        assert_eq!((summary.scanned, summary.updated), (1, 1));
        assert_eq!(summary.results[0].order_id, queryable.id);

        let stored = store.find_order(queryable.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Paid);
        let pushed = store
            .orders()
            .into_iter()
            .filter(|o| o.gateway == GatewayId::PushinPay)
            .all(|o| o.status == OrderStatus::Pending);
        assert!(pushed);
    }

    #[tokio::test]
    async fn sweep_is_empty_without_a_queryable_gateway() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert_order(stale_order(GatewayId::PushinPay, "pp-only", 600))
            .await
            .unwrap();
        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(adapter(GatewayId::PushinPay, None)));

        let summary = service(store, registry).run(None).await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
    }

    #[tokio::test]
    async fn batch_override_is_capped() {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..5 {
            store
                .insert_order(stale_order(GatewayId::MercadoPago, &format!("mp-{i}"), 600 + i))
                .await
                .unwrap();
        }
        let mut registry = GatewayRegistry::new(HashMap::new());
        registry.register(Arc::new(adapter(GatewayId::MercadoPago, Some(OrderStatus::Cancelled))));
        let service = service(store, registry);

        let summary = service.run(Some(2)).await.unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.updated, 2);
    }
}
