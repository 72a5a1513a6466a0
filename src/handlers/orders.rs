use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    services::orders::{CreateOrderRequest, CreateOrderResponse, OrderResponse},
    ApiResponse, AppState,
};

/// Create an order and start its payment
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Validates the checkout, applies coupon and bumps, stores a PENDING order and creates the payment at the routed gateway",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created, payment pending or decided", body = ApiResponse<CreateOrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 400, description = "Invalid offer, unsupported gateway or invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected the payment", body = crate::errors::ErrorResponse),
        (status = 503, description = "Gateway unreachable", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CreateOrderResponse>>), ServiceError> {
    let created = state.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))))
}

/// Fetch an order, e.g. to poll a PIX payment
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(order)))
}
