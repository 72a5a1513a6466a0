use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use uuid::Uuid;

use super::{CheckoutStore, DeliveryOutcome};
use crate::entities::{
    affiliate, checkout, coupon, offer, order, order::OrderStatus, order_bump, outbound_webhook,
    product, webhook_delivery,
};
use crate::errors::ServiceError;
use crate::gateways::GatewayId;

/// Process-local store used for development and tests.
///
/// Conditional updates run under the DashMap shard lock of the row being
/// changed, which gives the same single-winner guarantee as the SQL store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    products: DashMap<Uuid, product::Model>,
    offers: DashMap<Uuid, offer::Model>,
    checkouts: DashMap<Uuid, checkout::Model>,
    order_bumps: DashMap<Uuid, order_bump::Model>,
    affiliates: DashMap<Uuid, affiliate::Model>,
    coupons: DashMap<Uuid, coupon::Model>,
    coupon_products: DashSet<(Uuid, Uuid)>,
    orders: DashMap<Uuid, order::Model>,
    webhooks: DashMap<Uuid, outbound_webhook::Model>,
    deliveries: DashMap<Uuid, webhook_delivery::Model>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, model: product::Model) {
        self.products.insert(model.id, model);
    }

    pub fn insert_offer(&self, model: offer::Model) {
        self.offers.insert(model.id, model);
    }

    pub fn insert_checkout(&self, model: checkout::Model) {
        self.checkouts.insert(model.id, model);
    }

    pub fn insert_order_bump(&self, model: order_bump::Model) {
        self.order_bumps.insert(model.id, model);
    }

    pub fn insert_affiliate(&self, model: affiliate::Model) {
        self.affiliates.insert(model.id, model);
    }

    /// Stores a coupon scoped to `product_ids`.
    pub fn insert_coupon(&self, model: coupon::Model, product_ids: &[Uuid]) {
        for product_id in product_ids {
            self.coupon_products.insert((model.id, *product_id));
        }
        self.coupons.insert(model.id, model);
    }

    pub fn insert_webhook(&self, model: outbound_webhook::Model) {
        self.webhooks.insert(model.id, model);
    }

    pub fn orders(&self) -> Vec<order::Model> {
        self.orders.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn deliveries(&self) -> Vec<webhook_delivery::Model> {
        self.deliveries
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl CheckoutStore for InMemoryStore {
    async fn ping(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        Ok(self.products.get(&id).map(|p| p.clone()))
    }

    async fn find_offer(&self, id: Uuid) -> Result<Option<offer::Model>, ServiceError> {
        Ok(self.offers.get(&id).map(|o| o.clone()))
    }

    async fn find_checkout(&self, id: Uuid) -> Result<Option<checkout::Model>, ServiceError> {
        Ok(self.checkouts.get(&id).map(|c| c.clone()))
    }

    async fn find_order_bump(&self, id: Uuid) -> Result<Option<order_bump::Model>, ServiceError> {
        Ok(self.order_bumps.get(&id).map(|b| b.clone()))
    }

    async fn find_affiliate(&self, id: Uuid) -> Result<Option<affiliate::Model>, ServiceError> {
        Ok(self.affiliates.get(&id).map(|a| a.clone()))
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(self.coupons.get(&id).map(|c| c.clone()))
    }

    async fn find_coupon_by_code(
        &self,
        vendor_id: Uuid,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(self
            .coupons
            .iter()
            .find(|c| c.vendor_id == vendor_id && c.code == code)
            .map(|c| c.value().clone()))
    }

    async fn coupon_linked_to_product(
        &self,
        coupon_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, ServiceError> {
        Ok(self.coupon_products.contains(&(coupon_id, product_id)))
    }

    async fn count_customer_coupon_uses(
        &self,
        coupon_id: Uuid,
        customer_email: &str,
    ) -> Result<u64, ServiceError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| {
                o.coupon_id == Some(coupon_id)
                    && o.customer_email == customer_email
                    && o.status != OrderStatus::Cancelled
            })
            .count() as u64)
    }

    async fn try_increment_coupon_usage(
        &self,
        coupon_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let Some(mut coupon) = self.coupons.get_mut(&coupon_id) else {
            return Ok(None);
        };
        if !coupon.active || !coupon.has_capacity() {
            return Ok(None);
        }
        coupon.uses_count += 1;
        Ok(Some(coupon.clone()))
    }

    async fn insert_order(&self, model: order::Model) -> Result<order::Model, ServiceError> {
        self.orders.insert(model.id, model.clone());
        Ok(model)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn find_order_by_external_id(
        &self,
        gateway: GatewayId,
        external_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(self
            .orders
            .iter()
            .find(|o| {
                o.gateway == gateway && o.gateway_payment_id.as_deref() == Some(external_id)
            })
            .map(|o| o.value().clone()))
    }

    async fn attach_gateway_payment(
        &self,
        order_id: Uuid,
        external_id: &str,
    ) -> Result<(), ServiceError> {
        let mut order = self
            .orders
            .get_mut(&order_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;
        order.gateway_payment_id = Some(external_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Option<order::Model>, ServiceError> {
        let Some(mut order) = self.orders.get_mut(&order_id) else {
            return Ok(None);
        };
        if order.status != expected {
            return Ok(None);
        }
        let now = Utc::now();
        order.status = next;
        order.updated_at = now;
        if next == OrderStatus::Paid {
            order.paid_at = Some(now);
        }
        Ok(Some(order.clone()))
    }

    async fn list_stale_pending_orders(
        &self,
        gateways: &[GatewayId],
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let mut stale: Vec<order::Model> = self
            .orders
            .iter()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && gateways.contains(&o.gateway)
                    && o.gateway_payment_id.is_some()
                    && o.created_at >= created_after
                    && o.created_at <= created_before
            })
            .map(|o| o.value().clone())
            .collect();
        stale.sort_by_key(|o| o.created_at);
        stale.truncate(limit as usize);
        Ok(stale)
    }

    async fn active_webhooks_for_event(
        &self,
        vendor_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<outbound_webhook::Model>, ServiceError> {
        let mut hooks: Vec<outbound_webhook::Model> = self
            .webhooks
            .iter()
            .filter(|w| w.vendor_id == vendor_id && w.active && w.subscribes_to(event_type))
            .map(|w| w.value().clone())
            .collect();
        hooks.sort_by_key(|w| w.created_at);
        Ok(hooks)
    }

    async fn find_outbound_webhook(
        &self,
        id: Uuid,
    ) -> Result<Option<outbound_webhook::Model>, ServiceError> {
        Ok(self.webhooks.get(&id).map(|w| w.clone()))
    }

    async fn insert_delivery(
        &self,
        model: webhook_delivery::Model,
    ) -> Result<webhook_delivery::Model, ServiceError> {
        self.deliveries.insert(model.id, model.clone());
        Ok(model)
    }

    async fn deliveries_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError> {
        let mut found: Vec<webhook_delivery::Model> = self
            .deliveries
            .iter()
            .filter(|d| d.order_id == order_id)
            .map(|d| d.value().clone())
            .collect();
        found.sort_by_key(|d| d.created_at);
        Ok(found)
    }

    async fn retryable_deliveries(
        &self,
        max_attempts: i32,
        attempted_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError> {
        let mut due: Vec<webhook_delivery::Model> = self
            .deliveries
            .iter()
            .filter(|d| {
                !d.success
                    && d.attempts < max_attempts
                    && d.last_attempt_at.map_or(true, |at| at <= attempted_before)
            })
            .map(|d| d.value().clone())
            .collect();
        due.sort_by_key(|d| d.created_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn claim_delivery_attempt(
        &self,
        delivery_id: Uuid,
        expected_attempts: i32,
        max_attempts: i32,
    ) -> Result<bool, ServiceError> {
        let Some(mut delivery) = self.deliveries.get_mut(&delivery_id) else {
            return Ok(false);
        };
        if delivery.success
            || delivery.attempts != expected_attempts
            || delivery.attempts >= max_attempts
        {
            return Ok(false);
        }
        delivery.attempts += 1;
        delivery.last_attempt_at = Some(Utc::now());
        Ok(true)
    }

    async fn complete_delivery_attempt(
        &self,
        delivery_id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), ServiceError> {
        if let Some(mut delivery) = self.deliveries.get_mut(&delivery_id) {
            if !delivery.success {
                delivery.success = outcome.success;
                delivery.response_status = outcome.response_status;
                delivery.response_body = outcome.response_body.clone();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DiscountType;
    use std::sync::Arc;

    fn capped_coupon(max_uses: i32) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            code: "LAUNCH".into(),
            discount_type: DiscountType::Fixed,
            discount_value: 500,
            active: true,
            starts_at: None,
            expires_at: None,
            max_uses: Some(max_uses),
            max_uses_per_customer: None,
            uses_count: 0,
            apply_to_order_bumps: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_increments_never_exceed_cap() {
        let store = Arc::new(InMemoryStore::new());
        let coupon = capped_coupon(3);
        store.insert_coupon(coupon.clone(), &[]);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.try_increment_coupon_usage(coupon.id).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 3);
        let stored = store.find_coupon(coupon.id).await.unwrap().unwrap();
        assert_eq!(stored.uses_count, 3);
    }

    #[tokio::test]
    async fn inactive_coupon_is_not_incremented() {
        let store = InMemoryStore::new();
        let mut coupon = capped_coupon(10);
        coupon.active = false;
        store.insert_coupon(coupon.clone(), &[]);
        assert!(store
            .try_increment_coupon_usage(coupon.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn claim_requires_expected_attempt_count() {
        let store = InMemoryStore::new();
        let delivery = webhook_delivery::Model {
            id: Uuid::new_v4(),
            webhook_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            event_type: "purchase_approved".into(),
            payload: serde_json::json!({}),
            success: false,
            response_status: Some(500),
            response_body: None,
            attempts: 1,
            last_attempt_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        store.insert_delivery(delivery.clone()).await.unwrap();

        assert!(store.claim_delivery_attempt(delivery.id, 1, 3).await.unwrap());
        assert!(!store.claim_delivery_attempt(delivery.id, 1, 3).await.unwrap());
        assert!(store.claim_delivery_attempt(delivery.id, 2, 3).await.unwrap());
        assert!(!store.claim_delivery_attempt(delivery.id, 3, 3).await.unwrap());
    }
}
