use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware_helpers::INTERNAL_SECRET_HEADER;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Checkout Payments API",
        version = "0.1.0",
        description = r#"
# Checkout Payments API

Order creation, coupon redemption and multi-gateway payment processing for hosted checkouts.

## Flow

1. `POST /api/v1/orders` prices the checkout (offer, order bumps, coupon), stores a `PENDING`
   order and creates the payment at the gateway routed for the payment method.
2. The gateway calls `POST /webhooks/{gateway}`; the order moves to `PAID`, `CANCELLED`,
   `REFUNDED` or `CHARGEBACK`.
3. Orders whose webhook never arrives are settled by `POST /internal/reconcile`.
4. The first move to `PAID`, `REFUNDED` or `CHARGEBACK` notifies the merchant's webhooks
   with a signed `purchase_approved`, `purchase_refunded` or `purchase_chargeback` event;
   failures are retried by `POST /internal/webhook-retries`.

## Amounts

All amounts are integers in minor currency units (centavos).

## Error Handling

```json
{
  "error": "Bad Gateway",
  "message": "Gateway mercadopago rejected the request (400): invalid card token",
  "details": "{...raw gateway payload...}",
  "request_id": "req-abc123",
  "timestamp": "2025-03-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    tags(
        (name = "Orders", description = "Order creation and lookup"),
        (name = "Coupons", description = "Coupon preview"),
        (name = "Webhooks", description = "Inbound payment gateway callbacks"),
        (name = "Internal", description = "Sweep triggers guarded by the internal secret"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::gateway_webhooks::receive_gateway_webhook,
        crate::handlers::internal::reconcile,
        crate::handlers::internal::retry_webhooks,
        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CreateOrderResponse,
            crate::services::orders::OrderResponse,
            crate::services::coupons::CouponPreviewRequest,
            crate::services::coupons::CouponPreview,
            crate::services::reconciliation::ReconcileSummary,
            crate::handlers::internal::ReconcileRequest,
            crate::webhooks::RetrySummary,
            crate::webhooks::IngestOutcome,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "InternalSecret",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(INTERNAL_SECRET_HEADER))),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
