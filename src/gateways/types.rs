use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;

/// Configured payment provider.
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
    strum::EnumString,
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatewayId {
    #[sea_orm(string_value = "mercadopago")]
    MercadoPago,
    #[sea_orm(string_value = "pushinpay")]
    PushinPay,
    #[sea_orm(string_value = "asaas")]
    Asaas,
}

impl GatewayId {
    /// Parses a gateway id, accepting the spellings merchants use in
    /// configuration (`mercado_pago`, `Mercado-Pago`, `pushin pay`, ...).
    pub fn parse(raw: &str) -> Result<Self, UnknownGateway> {
        let normalized: String = raw
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        GatewayId::from_str(&normalized).map_err(|_| UnknownGateway(raw.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown gateway '{0}'")]
pub struct UnknownGateway(pub String);

/// How the buyer pays.
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
    strum::AsRefStr,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "pix")]
    Pix,
    #[sea_orm(string_value = "credit_card")]
    CreditCard,
    #[sea_orm(string_value = "boleto")]
    Boleto,
}
