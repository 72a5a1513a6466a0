use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};

use crate::{errors::ServiceError, webhooks::IngestOutcome, ApiResponse, AppState};

/// Receive a payment provider webhook
///
/// The body is taken as raw bytes so signatures are checked over exactly what
/// the provider sent.
#[utoipa::path(
    post,
    path = "/webhooks/{gateway}",
    summary = "Gateway webhook",
    description = "Authenticates the provider call, normalizes the event and applies the resulting order status. Irrelevant events and unknown payments are acknowledged with 200.",
    params(("gateway" = String, Path, description = "Gateway id, e.g. mercadopago, pushinpay, asaas")),
    request_body(content = String, description = "Provider-native event envelope", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted or ignored", body = ApiResponse<IngestOutcome>),
        (status = 400, description = "Unknown gateway or malformed event", body = crate::errors::ErrorResponse),
        (status = 401, description = "Signature or token rejected", body = crate::errors::ErrorResponse),
        (status = 502, description = "Status lookup rejected by the gateway", body = crate::errors::ErrorResponse),
        (status = 503, description = "Gateway unreachable, provider should retry", body = crate::errors::ErrorResponse),
    ),
    tag = "Webhooks"
)]
pub async fn receive_gateway_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<IngestOutcome>>, ServiceError> {
    let outcome = state.webhooks.ingest(&gateway, &headers, &body).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
