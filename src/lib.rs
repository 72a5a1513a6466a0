//! Checkout Payments
//!
//! Order creation, coupon redemption, multi-gateway payment processing and
//! reconciliation for hosted checkouts.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod gateways;
pub mod handlers;
pub mod middleware_helpers;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod signing;
pub mod tracing;
pub mod webhooks;

use std::{sync::Arc, time::Duration};

use axum::{http::HeaderValue, middleware, response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use utoipa::ToSchema;

use crate::{
    config::AppConfig,
    errors::ServiceError,
    gateways::GatewayRegistry,
    repositories::DynStore,
    services::{CouponService, OrderService, OrderStatusService, ReconciliationService},
    webhooks::{WebhookDispatcher, WebhookIngestor},
};

/// Upper bound for a whole request, gateway round trips included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: DynStore,
    pub gateways: Arc<GatewayRegistry>,
    pub orders: OrderService,
    pub coupons: CouponService,
    pub webhooks: WebhookIngestor,
    pub reconciliation: ReconciliationService,
    pub dispatcher: Arc<WebhookDispatcher>,
}

impl AppState {
    /// Wires every service on top of one store and one gateway registry.
    pub fn new(
        config: Arc<AppConfig>,
        store: DynStore,
        gateways: Arc<GatewayRegistry>,
    ) -> Result<Self, ServiceError> {
        let dispatcher = Arc::new(WebhookDispatcher::new(
            store.clone(),
            config.webhooks.clone(),
        )?);
        let status = OrderStatusService::new(store.clone(), dispatcher.clone());

        Ok(Self {
            orders: OrderService::new(
                store.clone(),
                gateways.clone(),
                status.clone(),
                config.clone(),
            ),
            coupons: CouponService::new(store.clone()),
            webhooks: WebhookIngestor::new(store.clone(), gateways.clone(), status.clone()),
            reconciliation: ReconciliationService::new(
                store.clone(),
                gateways.clone(),
                status,
                config.reconciliation.clone(),
            ),
            dispatcher,
            config,
            store,
            gateways,
        })
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// CORS for the buyer-facing API.
///
/// Explicit origins win. Without them development gets a permissive policy
/// and every other environment allows no cross-origin caller.
pub fn cors_layer(config: &AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = config
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    match configured_origins {
        Some(origins) => CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any),
        None if config.is_development() => CorsLayer::permissive(),
        None => {
            ::tracing::warn!(
                "APP__CORS_ALLOWED_ORIGINS not set; cross-origin checkout calls will be rejected"
            );
            CorsLayer::new()
        }
    }
}

/// Full HTTP surface: health, checkout API, gateway callbacks, internal
/// sweeps and the OpenAPI docs.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", handlers::api_v1_routes().layer(cors))
        .merge(handlers::gateway_webhook_routes())
        .merge(handlers::internal_routes(state.clone()))
        .merge(openapi::swagger_ui())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(crate::tracing::configure_http_tracing())
        // Outermost so the trace span and every handler see the id
        .layer(middleware::from_fn(middleware_helpers::request_id_middleware))
        .with_state(state)
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use chrono::DateTime;

    #[tokio::test]
    async fn success_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-123"), async {
                ApiResponse::success("ok")
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-123"));
        DateTime::parse_from_rfc3339(&meta.timestamp).expect("timestamp should parse");
    }

    #[tokio::test]
    async fn error_response_includes_request_metadata() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("meta-err"), async {
                ApiResponse::<()>::error("oops".into())
            })
            .await;

        let meta = response.meta.expect("metadata expected");
        assert_eq!(meta.request_id.as_deref(), Some("meta-err"));
        assert!(!meta.timestamp.is_empty());
    }
}
