use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use super::{CheckoutStore, DeliveryOutcome};
use crate::entities::{
    affiliate, checkout, coupon, coupon_product, offer, order, order::OrderStatus, order_bump,
    outbound_webhook, product, webhook_delivery,
};
use crate::errors::ServiceError;
use crate::gateways::GatewayId;

/// Relational store backed by sea-orm (PostgreSQL in production, SQLite in tests).
#[derive(Debug, Clone)]
pub struct SeaOrmStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl CheckoutStore for SeaOrmStore {
    async fn ping(&self) -> Result<(), ServiceError> {
        crate::db::check_connection(self.get_db()).await
    }

    async fn find_product(&self, id: Uuid) -> Result<Option<product::Model>, ServiceError> {
        Ok(product::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_offer(&self, id: Uuid) -> Result<Option<offer::Model>, ServiceError> {
        Ok(offer::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_checkout(&self, id: Uuid) -> Result<Option<checkout::Model>, ServiceError> {
        Ok(checkout::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_order_bump(&self, id: Uuid) -> Result<Option<order_bump::Model>, ServiceError> {
        Ok(order_bump::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_affiliate(&self, id: Uuid) -> Result<Option<affiliate::Model>, ServiceError> {
        Ok(affiliate::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_coupon(&self, id: Uuid) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_coupon_by_code(
        &self,
        vendor_id: Uuid,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .filter(coupon::Column::VendorId.eq(vendor_id))
            .filter(coupon::Column::Code.eq(code))
            .one(self.get_db())
            .await?)
    }

    async fn coupon_linked_to_product(
        &self,
        coupon_id: Uuid,
        product_id: Uuid,
    ) -> Result<bool, ServiceError> {
        let link = coupon_product::Entity::find_by_id((coupon_id, product_id))
            .one(self.get_db())
            .await?;
        Ok(link.is_some())
    }

    async fn count_customer_coupon_uses(
        &self,
        coupon_id: Uuid,
        customer_email: &str,
    ) -> Result<u64, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::CouponId.eq(coupon_id))
            .filter(order::Column::CustomerEmail.eq(customer_email))
            .filter(order::Column::Status.ne(OrderStatus::Cancelled))
            .count(self.get_db())
            .await?)
    }

    #[instrument(skip(self))]
    async fn try_increment_coupon_usage(
        &self,
        coupon_id: Uuid,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let result = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsesCount,
                Expr::col(coupon::Column::UsesCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::Active.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(
                        Expr::col(coupon::Column::UsesCount)
                            .lt(Expr::col(coupon::Column::MaxUses)),
                    ),
            )
            .exec(self.get_db())
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_coupon(coupon_id).await
    }

    async fn insert_order(&self, model: order::Model) -> Result<order::Model, ServiceError> {
        Ok(order::ActiveModel::from(model)
            .reset_all()
            .insert(self.get_db())
            .await?)
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find_by_id(id).one(self.get_db()).await?)
    }

    async fn find_order_by_external_id(
        &self,
        gateway: GatewayId,
        external_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::Gateway.eq(gateway))
            .filter(order::Column::GatewayPaymentId.eq(external_id))
            .one(self.get_db())
            .await?)
    }

    async fn attach_gateway_payment(
        &self,
        order_id: Uuid,
        external_id: &str,
    ) -> Result<(), ServiceError> {
        let result = order::Entity::update_many()
            .col_expr(
                order::Column::GatewayPaymentId,
                Expr::value(Some(external_id.to_string())),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .exec(self.get_db())
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Order {} not found", order_id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn transition_order_status(
        &self,
        order_id: Uuid,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Option<order::Model>, ServiceError> {
        let now = Utc::now();
        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(next))
            .col_expr(order::Column::UpdatedAt, Expr::value(now));
        if next == OrderStatus::Paid {
            update = update.col_expr(order::Column::PaidAt, Expr::value(Some(now)));
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(expected))
            .exec(self.get_db())
            .await?;

        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_order(order_id).await
    }

    async fn list_stale_pending_orders(
        &self,
        gateways: &[GatewayId],
        created_after: DateTime<Utc>,
        created_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<order::Model>, ServiceError> {
        if gateways.is_empty() {
            return Ok(Vec::new());
        }
        Ok(order::Entity::find()
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::Gateway.is_in(gateways.iter().copied()))
            .filter(order::Column::GatewayPaymentId.is_not_null())
            .filter(order::Column::CreatedAt.gte(created_after))
            .filter(order::Column::CreatedAt.lte(created_before))
            .order_by_asc(order::Column::CreatedAt)
            .limit(limit)
            .all(self.get_db())
            .await?)
    }

    async fn active_webhooks_for_event(
        &self,
        vendor_id: Uuid,
        event_type: &str,
    ) -> Result<Vec<outbound_webhook::Model>, ServiceError> {
        let hooks = outbound_webhook::Entity::find()
            .filter(outbound_webhook::Column::VendorId.eq(vendor_id))
            .filter(outbound_webhook::Column::Active.eq(true))
            .order_by_asc(outbound_webhook::Column::CreatedAt)
            .all(self.get_db())
            .await?;
        // `events` is a JSON array, filtered in process
        Ok(hooks
            .into_iter()
            .filter(|hook| hook.subscribes_to(event_type))
            .collect())
    }

    async fn find_outbound_webhook(
        &self,
        id: Uuid,
    ) -> Result<Option<outbound_webhook::Model>, ServiceError> {
        Ok(outbound_webhook::Entity::find_by_id(id)
            .one(self.get_db())
            .await?)
    }

    async fn insert_delivery(
        &self,
        model: webhook_delivery::Model,
    ) -> Result<webhook_delivery::Model, ServiceError> {
        Ok(webhook_delivery::ActiveModel::from(model)
            .reset_all()
            .insert(self.get_db())
            .await?)
    }

    async fn deliveries_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError> {
        Ok(webhook_delivery::Entity::find()
            .filter(webhook_delivery::Column::OrderId.eq(order_id))
            .order_by_asc(webhook_delivery::Column::CreatedAt)
            .all(self.get_db())
            .await?)
    }

    async fn retryable_deliveries(
        &self,
        max_attempts: i32,
        attempted_before: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<webhook_delivery::Model>, ServiceError> {
        Ok(webhook_delivery::Entity::find()
            .filter(webhook_delivery::Column::Success.eq(false))
            .filter(webhook_delivery::Column::Attempts.lt(max_attempts))
            .filter(
                Condition::any()
                    .add(webhook_delivery::Column::LastAttemptAt.is_null())
                    .add(webhook_delivery::Column::LastAttemptAt.lte(attempted_before)),
            )
            .order_by_asc(webhook_delivery::Column::CreatedAt)
            .limit(limit)
            .all(self.get_db())
            .await?)
    }

    #[instrument(skip(self))]
    async fn claim_delivery_attempt(
        &self,
        delivery_id: Uuid,
        expected_attempts: i32,
        max_attempts: i32,
    ) -> Result<bool, ServiceError> {
        let result = webhook_delivery::Entity::update_many()
            .col_expr(
                webhook_delivery::Column::Attempts,
                Expr::col(webhook_delivery::Column::Attempts).add(1),
            )
            .col_expr(
                webhook_delivery::Column::LastAttemptAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(webhook_delivery::Column::Id.eq(delivery_id))
            .filter(webhook_delivery::Column::Success.eq(false))
            .filter(webhook_delivery::Column::Attempts.eq(expected_attempts))
            .filter(webhook_delivery::Column::Attempts.lt(max_attempts))
            .exec(self.get_db())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn complete_delivery_attempt(
        &self,
        delivery_id: Uuid,
        outcome: &DeliveryOutcome,
    ) -> Result<(), ServiceError> {
        webhook_delivery::Entity::update_many()
            .col_expr(webhook_delivery::Column::Success, Expr::value(outcome.success))
            .col_expr(
                webhook_delivery::Column::ResponseStatus,
                Expr::value(outcome.response_status),
            )
            .col_expr(
                webhook_delivery::Column::ResponseBody,
                Expr::value(outcome.response_body.clone()),
            )
            .filter(webhook_delivery::Column::Id.eq(delivery_id))
            .filter(webhook_delivery::Column::Success.eq(false))
            .exec(self.get_db())
            .await?;
        Ok(())
    }
}
