use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{middleware_helpers::require_internal_secret, AppState};

pub mod coupons;
pub mod gateway_webhooks;
pub mod health;
pub mod internal;
pub mod orders;

/// Buyer-facing checkout API, mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/:id", get(orders::get_order))
        .route("/coupons/validate", post(coupons::validate_coupon))
}

/// Provider callbacks. Never behind CORS; authenticated per gateway.
pub fn gateway_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhooks/:gateway", post(gateway_webhooks::receive_gateway_webhook))
}

/// Sweep triggers guarded by the shared internal secret
pub fn internal_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/internal/reconcile", post(internal::reconcile))
        .route("/internal/webhook-retries", post(internal::retry_webhooks))
        .route_layer(middleware::from_fn_with_state(state, require_internal_secret))
}
