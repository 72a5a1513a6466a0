use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::gateways::{GatewayId, PaymentMethod};

/// Lifecycle of a purchase attempt.
///
/// `Pending` may move to `Paid` or `Cancelled`; `Paid` may move to
/// `Refunded` or `Chargeback`. Nothing else is a legal transition.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PAID")]
    Paid,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "REFUNDED")]
    Refunded,
    #[sea_orm(string_value = "CHARGEBACK")]
    Chargeback,
}

impl OrderStatus {
    /// The only state an order may be in before moving to `next`.
    pub fn required_predecessor(next: OrderStatus) -> Option<OrderStatus> {
        match next {
            OrderStatus::Paid | OrderStatus::Cancelled => Some(OrderStatus::Pending),
            OrderStatus::Refunded | OrderStatus::Chargeback => Some(OrderStatus::Paid),
            OrderStatus::Pending => None,
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        OrderStatus::required_predecessor(next) == Some(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub product_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub checkout_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub customer_document: Option<String>,
    pub gross_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub net_amount_cents: i64,
    /// Marketplace fee retained for an affiliate split
    pub application_fee_cents: i64,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub affiliate_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    pub gateway: GatewayId,
    pub gateway_payment_id: Option<String>,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product::Entity",
        from = "Column::ProductId",
        to = "super::product::Column::Id"
    )]
    Product,
    #[sea_orm(has_many = "super::webhook_delivery::Entity")]
    WebhookDeliveries,
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Product.def()
    }
}

impl Related<super::webhook_delivery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WebhookDeliveries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::OrderStatus::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Pending, Paid, true)]
    #[case(Pending, Cancelled, true)]
    #[case(Paid, Refunded, true)]
    #[case(Paid, Chargeback, true)]
    #[case(Paid, Paid, false)]
    #[case(Paid, Cancelled, false)]
    #[case(Cancelled, Paid, false)]
    #[case(Pending, Refunded, false)]
    #[case(Refunded, Chargeback, false)]
    #[case(Paid, Pending, false)]
    fn transitions_are_monotonic(
        #[case] from: OrderStatus,
        #[case] to: OrderStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn status_serializes_in_uppercase() {
        assert_eq!(serde_json::to_string(&Paid).unwrap(), "\"PAID\"");
        assert_eq!(Chargeback.to_string(), "CHARGEBACK");
    }
}
