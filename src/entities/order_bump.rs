use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Extra item offered on the checkout page of `product_id`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "order_bumps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Product whose checkout shows the bump
    pub product_id: Uuid,
    /// Product being sold by the bump
    pub bump_product_id: Uuid,
    /// Optional offer overriding the bump product price
    pub offer_id: Option<Uuid>,
    pub active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
