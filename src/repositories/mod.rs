//! Persistence seam for the payment engine.
//!
//! Every mutation of shared rows (coupon usage, order status, delivery
//! attempts) is a single conditional update. Implementations report a lost
//! race as `None`/`false` instead of an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::{
    affiliate, checkout, coupon, offer, order, order::OrderStatus, order_bump, outbound_webhook,
    product, webhook_delivery,
};
use crate::config::{AppConfig, StorageBackend};
use crate::errors::ServiceError;
use crate::gateways::GatewayId;

pub mod memory_store;
pub mod sea_orm_store;

pub use memory_store::InMemoryStore;
pub use sea_orm_store::SeaOrmStore;

/// Result of one outbound delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
}

#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Cheap reachability check for health probes
    async fn ping(&self) -> Result<(), ServiceError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError>;

    async fn find_offer(&self, id: Uuid) -> Result<Option<offer::Model>, ServiceError>;

    async fn find_checkout(&self, id: Uuid) -> Result<Option<checkout::Model>, ServiceError>;

    async fn find_order_bump(&self, id: Uuid) -> Result<Option<order_bump::Model>, ServiceError>;

    async fn find_affiliate(&self, id: Uuid) -> Result<Option<affiliate::Model>, ServiceError>;

    async fn find_coupon(&self, id: Uuid) -> Result<Option<coupon::Model>, ServiceError>;

    /// Looks a coupon up by its normalized code within a vendor's catalog.
    async fn find_coupon_by_code(
        &self,
        vendor_id: Uuid,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError>;

    async fn coupon_linked_to_product(
        &self,
        coupon_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, ServiceError>;

    /// Non-cancelled orders by `customer_email` that used the coupon.
    async fn count_customer_coupon_uses(
        &self,
        coupon_id: Uuid,
        customer_email: &str,
    ) -> Result<u64, ServiceError>;

    /// Increments `uses_count` iff the coupon is active and below `max_uses`.
    /// Returns the updated row, or `None` when capacity is exhausted.
    async fn try_increment_coupon_usage(
        &self,
        coupon_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError>;

    async fn insert_order(&self, order: order::Model) -> Result<order::Model, ServiceError>;

    async fn find_order(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError>;

    async fn find_order_by_external_id(
        &self,
        gateway: GatewayId,
        external_id: &str,
    ) -> Result<Option<order::Model>, ServiceError>;

    async fn attach_gateway_payment(
        &self,
        order_id: Uuid,
        external_id: &str,
    ) -> Result<(), ServiceError>;

    /// Moves an order from `expected` to `next` in one conditional update.
    /// Returns `None` when the order was no longer in `expected`.
    async fn transition_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Option<order::Model>, ServiceError>;

    /// PENDING orders of `gateways` with a gateway payment id created inside
    /// `[created_after, created_before]`, oldest first.
    async fn list_stale_pending_orders(
        &self,
        gateways: &[GatewayId],
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError>;

    /// Active merchant endpoints of `vendor_id` subscribed to `event_type`.
    async fn active_webhooks_for_event(
        &self,
        vendor_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<outbound_webhook::Model>, ServiceError>;

    async fn find_outbound_webhook(
        &self,
        id: Uuid,
    ) -> Result<Option<outbound_webhook::Model>, ServiceError>;

    async fn insert_delivery(
        &self,
        delivery: webhook_delivery::Model,
    ) -> Result<webhook_delivery::Model, ServiceError>;

    async fn deliveries_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError>;

    /// Failed deliveries below `max_attempts` whose last attempt is not
    /// newer than `attempted_before`, oldest first.
    async fn retryable_deliveries(
        &self,
        max_attempts: i32,
        attempted_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError>;

    /// Bumps `attempts` from `expected_attempts` by one. `false` means another
    /// sweep already claimed this attempt, or the record is no longer retryable.
    async fn claim_delivery_attempt(
        &self,
        delivery_id: Uuid,
        expected_attempts: i32,
        max_attempts: i32,
    ) -> Result<bool, ServiceError>;

    /// Stores the outcome of the attempt just made. Records that already
    /// succeeded are left untouched.
    async fn complete_delivery_attempt(
        &self,
        delivery_id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), ServiceError>;
}

pub type DynStore = Arc<dyn CheckoutStore>;

/// Opens the configured backend. The database backend runs pending
/// migrations first when `auto_migrate` is set.
pub async fn connect_store(config: &AppConfig) -> Result<DynStore, ServiceError> {
    match config.storage_backend {
        StorageBackend::Database => {
            let pool = crate::db::establish_connection_from_app_config(config).await?;
            if config.auto_migrate {
                crate::db::run_migrations(&pool).await?;
            }
            Ok(Arc::new(SeaOrmStore::new(Arc::new(pool))))
        }
        StorageBackend::InMemory => {
            tracing::warn!("Using the in-memory store; nothing survives a restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}
