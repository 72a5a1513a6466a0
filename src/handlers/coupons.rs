use axum::{extract::State, response::Json};
use chrono::Utc;

use crate::{
    errors::ServiceError,
    services::coupons::{CouponPreview, CouponPreviewRequest},
    ApiResponse, AppState,
};

/// Preview a coupon without consuming it
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    summary = "Validate coupon",
    description = "Normalizes the code and reports the discount it would give on `amount_cents`. Usage is not incremented.",
    request_body = CouponPreviewRequest,
    responses(
        (status = 200, description = "Preview computed; `valid` tells whether the coupon applies", body = ApiResponse<CouponPreview>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<AppState>,
    Json(request): Json<CouponPreviewRequest>,
) -> Result<Json<ApiResponse<CouponPreview>>, ServiceError> {
    let preview = state.coupons.preview(&request, Utc::now()).await?;
    Ok(Json(ApiResponse::success(preview)))
}
