use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Merchant-configured notification endpoint.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "outbound_webhooks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub name: String,
    pub url: String,
    /// HMAC key for the `X-Signature` header
    #[serde(skip_serializing)]
    pub secret: String,
    /// JSON array of subscribed event types
    pub events: Json,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Model {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events
            .as_array()
            .map(|events| events.iter().any(|e| e.as_str() == Some(event_type)))
            .unwrap_or(false)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::webhook_delivery::Entity")]
    Deliveries,
}

impl Related<super::webhook_delivery::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deliveries.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
