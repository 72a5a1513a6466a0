use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::AppConfig,
    entities::{order, OrderStatus},
    errors::ServiceError,
    gateways::{
        digits_only, idempotency_key, CardDetails, GatewayId, GatewayRegistry, Payer,
        PaymentMethod, PaymentRequest, PixInstructions,
    },
    repositories::DynStore,
    services::{
        coupons::{CouponService, RedeemCoupon},
        order_status::OrderStatusService,
        order_validator::OrderValidator,
    },
};

/// Checkout submission
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    pub product_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub checkout_id: Option<Uuid>,
    pub coupon_id: Option<Uuid>,
    #[serde(default)]
    pub order_bump_ids: Vec<Uuid>,
    pub affiliate_id: Option<Uuid>,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(max = 32))]
    pub customer_phone: Option<String>,
    /// CPF or CNPJ, punctuation allowed
    #[validate(length(max = 32))]
    pub customer_document: Option<String>,
    /// Card token produced by the gateway's client-side SDK
    pub card_token: Option<String>,
    #[validate(range(min = 1, max = 24))]
    pub installments: Option<u32>,
    pub card_payment_method_id: Option<String>,
    pub card_issuer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CreateOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub gateway: GatewayId,
    pub gateway_payment_id: Option<String>,
    pub gross_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub net_amount_cents: i64,
    pub coupon_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pix: Option<PixInstructions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boleto_url: Option<String>,
}

/// Buyer-facing view of a stored order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub offer_id: Option<Uuid>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub gateway: GatewayId,
    pub gateway_payment_id: Option<String>,
    pub gross_amount_cents: i64,
    pub discount_amount_cents: i64,
    pub net_amount_cents: i64,
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<order::Model> for OrderResponse {
    fn from(model: order::Model) -> Self {
        Self {
            id: model.id,
            product_id: model.product_id,
            offer_id: model.offer_id,
            status: model.status,
            payment_method: model.payment_method,
            gateway: model.gateway,
            gateway_payment_id: model.gateway_payment_id,
            gross_amount_cents: model.gross_amount_cents,
            discount_amount_cents: model.discount_amount_cents,
            net_amount_cents: model.net_amount_cents,
            coupon_code: model.coupon_code,
            created_at: model.created_at,
            paid_at: model.paid_at,
        }
    }
}

/// Marketplace fee for an affiliate split, in minor units.
pub fn affiliate_fee(net_cents: i64, commission_percent: i32) -> i64 {
    let percent = i64::from(commission_percent.clamp(0, 100));
    net_cents.max(0) * percent / 100
}

/// Creates orders and hands them to the routed gateway.
#[derive(Clone)]
pub struct OrderService {
    store: DynStore,
    gateways: Arc<GatewayRegistry>,
    validator: OrderValidator,
    coupons: CouponService,
    status: OrderStatusService,
    config: Arc<AppConfig>,
}

impl OrderService {
    pub fn new(
        store: DynStore,
        gateways: Arc<GatewayRegistry>,
        status: OrderStatusService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            validator: OrderValidator::new(store.clone()),
            coupons: CouponService::new(store.clone()),
            store,
            gateways,
            status,
            config,
        }
    }

    /// Validates the request, prices it, persists a PENDING order and
    /// creates the payment at the gateway routed for the payment method.
    ///
    /// Pricing runs in a fixed order: catalog price plus bumps gives the
    /// gross amount, the coupon discount gives the net amount, and the
    /// affiliate fee is taken from the net amount.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, method = %request.payment_method))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, ServiceError> {
        request.validate()?;

        let validated = self
            .validator
            .validate(request.product_id, request.offer_id, request.checkout_id)
            .await?;
        let product = &validated.product;

        let adapter = self.gateways.for_method(request.payment_method)?;
        let card = match request.payment_method {
            PaymentMethod::CreditCard => {
                let token = request
                    .card_token
                    .as_deref()
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| {
                        ServiceError::BadRequest("card_token is required for credit_card".into())
                    })?;
                Some(CardDetails {
                    token: token.to_string(),
                    installments: request.installments.unwrap_or(1),
                    payment_method_id: request.card_payment_method_id.clone(),
                    issuer_id: request.card_issuer_id.clone(),
                })
            }
            _ => None,
        };

        let bumps = self
            .validator
            .resolve_order_bumps(product.id, &request.order_bump_ids)
            .await?;
        let bump_total: i64 = bumps.iter().map(|b| b.price_cents).sum();
        let gross_amount_cents = validated.final_price_cents + bump_total;

        let customer_email = request.customer_email.trim().to_lowercase();
        let now = Utc::now();

        let redemption = match request.coupon_id {
            Some(coupon_id) => {
                self.coupons
                    .redeem(
                        RedeemCoupon {
                            coupon_id,
                            product_id: product.id,
                            customer_email: &customer_email,
                            gross_cents: gross_amount_cents,
                            primary_price_cents: validated.final_price_cents,
                        },
                        now,
                    )
                    .await?
            }
            None => None,
        };
        let discount_amount_cents = redemption.as_ref().map_or(0, |r| r.discount_cents);
        let net_amount_cents = gross_amount_cents - discount_amount_cents;

        let (affiliate_id, application_fee_cents, split_recipient) =
            self.affiliate_split(request.affiliate_id, product.id, net_amount_cents).await?;

        let document = request
            .customer_document
            .as_deref()
            .map(digits_only)
            .filter(|d| !d.is_empty());

        let order = self
            .store
            .insert_order(order::Model {
                id: Uuid::new_v4(),
                vendor_id: product.vendor_id,
                product_id: product.id,
                offer_id: validated.offer_id,
                checkout_id: validated.checkout_id,
                customer_name: request.customer_name.trim().to_string(),
                customer_email: customer_email.clone(),
                customer_phone: request.customer_phone.clone(),
                customer_document: document.clone(),
                gross_amount_cents,
                discount_amount_cents,
                net_amount_cents,
                application_fee_cents,
                coupon_id: redemption.as_ref().map(|r| r.coupon_id),
                coupon_code: redemption.as_ref().map(|r| r.code.clone()),
                affiliate_id,
                payment_method: request.payment_method,
                gateway: adapter.id(),
                gateway_payment_id: None,
                status: OrderStatus::Pending,
                paid_at: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        metrics::counter!(
            "checkout_orders_created_total",
            1,
            "gateway" => order.gateway.to_string(),
            "method" => order.payment_method.to_string()
        );

        if net_amount_cents == 0 {
            info!(order_id = %order.id, "fully discounted order, no charge needed");
            let change = self
                .status
                .apply_status(&order, OrderStatus::Paid, "checkout")
                .await?;
            return Ok(response_for(change.order().clone(), None, None));
        }

        let description = match &validated.offer_name {
            Some(offer) => format!("{} - {}", product.name, offer),
            None => product.name.clone(),
        };
        let payment = PaymentRequest {
            order_id: order.id,
            idempotency_key: idempotency_key(order.id, request.payment_method),
            amount_cents: net_amount_cents,
            method: request.payment_method,
            description,
            payer: Payer {
                name: order.customer_name.clone(),
                email: customer_email,
                phone: request.customer_phone.as_deref().map(digits_only),
                document,
            },
            card,
            application_fee_cents: (application_fee_cents > 0).then_some(application_fee_cents),
            split_recipient,
            notification_url: self.config.notification_url(order.gateway),
        };

        let result = match adapter.create_payment(&payment).await {
            Ok(result) => result,
            Err(err) => {
                warn!(order_id = %order.id, error = %err, "payment creation failed, cancelling order");
                if let Err(cancel_err) = self
                    .store
                    .transition_order_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
                    .await
                {
                    warn!(order_id = %order.id, error = %cancel_err, "failed to cancel order");
                }
                return Err(err.into());
            }
        };

        self.store
            .attach_gateway_payment(order.id, &result.external_id)
            .await?;
        let mut order = order;
        order.gateway_payment_id = Some(result.external_id.clone());

        info!(
            order_id = %order.id,
            external_id = %result.external_id,
            raw_status = %result.raw_status,
            net_amount_cents,
            "payment created"
        );

        // Card payments may be decided synchronously
        let order = if result.status == OrderStatus::Pending {
            order
        } else {
            self.status
                .apply_status(&order, result.status, "checkout")
                .await?
                .order()
                .clone()
        };

        Ok(response_for(order, result.pix, result.boleto_url))
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderResponse, ServiceError> {
        self.store
            .find_order(order_id)
            .await?
            .map(OrderResponse::from)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
    }

    async fn affiliate_split(
        &self,
        affiliate_id: Option<Uuid>,
        product_id: Uuid,
        net_cents: i64,
    ) -> Result<(Option<Uuid>, i64, Option<String>), ServiceError> {
        let Some(id) = affiliate_id else {
            return Ok((None, 0, None));
        };
        match self.store.find_affiliate(id).await? {
            Some(affiliate) if affiliate.active && affiliate.product_id == product_id => {
                match affiliate.recipient_id {
                    Some(recipient) => Ok((
                        Some(affiliate.id),
                        affiliate_fee(net_cents, affiliate.commission_percent),
                        Some(recipient),
                    )),
                    None => Ok((Some(affiliate.id), 0, None)),
                }
            }
            _ => {
                warn!(affiliate_id = %id, "affiliate unusable for product, ignoring");
                Ok((None, 0, None))
            }
        }
    }
}

fn response_for(
    order: order::Model,
    pix: Option<PixInstructions>,
    boleto_url: Option<String>,
) -> CreateOrderResponse {
    CreateOrderResponse {
        order_id: order.id,
        status: order.status,
        gateway: order.gateway,
        gateway_payment_id: order.gateway_payment_id,
        gross_amount_cents: order.gross_amount_cents,
        discount_amount_cents: order.discount_amount_cents,
        net_amount_cents: order.net_amount_cents,
        coupon_code: order.coupon_code,
        pix,
        boleto_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn affiliate_fee_is_taken_from_net() {
        assert_eq!(affiliate_fee(8910, 30), 2673);
        assert_eq!(affiliate_fee(8910, 0), 0);
        assert_eq!(affiliate_fee(8910, 150), 8910);
        assert_eq!(affiliate_fee(-5, 50), 0);
    }

    proptest! {
        #[test]
        fn affiliate_fee_never_exceeds_net(net in 0i64..10_000_000, pct in -50i32..200) {
            let fee = affiliate_fee(net, pct);
            prop_assert!(fee >= 0);
            prop_assert!(fee <= net);
        }
    }
}
