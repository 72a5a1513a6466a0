use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// `discount_value` is a whole percentage
    #[sea_orm(string_value = "percentage")]
    Percentage,
    /// `discount_value` is in minor currency units
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub vendor_id: Uuid,
    /// Normalized: uppercase, punctuation stripped
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub active: bool,
    pub starts_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i32>,
    pub max_uses_per_customer: Option<i32>,
    pub uses_count: i32,
    pub apply_to_order_bumps: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    /// Whether `now` falls inside the optional validity window.
    pub fn is_within_window(&self, now: DateTime<Utc>) -> bool {
        self.starts_at.map_or(true, |start| now >= start)
            && self.expires_at.map_or(true, |end| now <= end)
    }

    pub fn has_capacity(&self) -> bool {
        self.max_uses.map_or(true, |max| self.uses_count < max)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::coupon_product::Entity")]
    CouponProducts,
}

impl Related<super::coupon_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CouponProducts.def()
    }
}

impl Related<super::product::Entity> for Entity {
    fn to() -> RelationDef {
        super::coupon_product::Relation::Product.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::coupon_product::Relation::Coupon.def().rev())
    }
}

impl ActiveModelBehavior for ActiveModel {}
