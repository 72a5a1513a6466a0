use axum::{extract::State, response::Json};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::{
    errors::ServiceError, services::reconciliation::ReconcileSummary, webhooks::RetrySummary,
    ApiResponse, AppState,
};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReconcileRequest {
    /// Overrides the configured batch size, capped by `max_batch_size`
    pub batch_size: Option<u64>,
}

/// Run one reconciliation sweep
#[utoipa::path(
    post,
    path = "/internal/reconcile",
    summary = "Reconcile pending orders",
    request_body(content = ReconcileRequest, description = "Optional; overrides the batch size"),
    responses(
        (status = 200, description = "Sweep finished", body = ApiResponse<ReconcileSummary>),
        (status = 401, description = "Missing or invalid internal secret", body = crate::errors::ErrorResponse),
    ),
    security(("InternalSecret" = [])),
    tag = "Internal"
)]
pub async fn reconcile(
    State(state): State<AppState>,
    body: Option<Json<ReconcileRequest>>,
) -> Result<Json<ApiResponse<ReconcileSummary>>, ServiceError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let summary = state.reconciliation.run(request.batch_size).await?;
    Ok(Json(ApiResponse::success(summary)))
}

/// Run one merchant webhook retry pass
#[utoipa::path(
    post,
    path = "/internal/webhook-retries",
    summary = "Retry failed merchant webhooks",
    responses(
        (status = 200, description = "Retry pass finished", body = ApiResponse<RetrySummary>),
        (status = 401, description = "Missing or invalid internal secret", body = crate::errors::ErrorResponse),
    ),
    security(("InternalSecret" = [])),
    tag = "Internal"
)]
pub async fn retry_webhooks(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RetrySummary>>, ServiceError> {
    let summary = state.dispatcher.retry_failed().await?;
    Ok(Json(ApiResponse::success(summary)))
}
