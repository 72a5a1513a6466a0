use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::warn;

use crate::{errors::ServiceError, signing::constant_time_eq, AppState};

/// Header carrying the shared secret for internal-only endpoints
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// Rejects requests whose `X-Internal-Secret` does not match the configured secret.
/// With no secret configured every request is rejected.
pub async fn require_internal_secret(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let expected = state
        .config
        .internal_secret
        .as_deref()
        .filter(|s| !s.is_empty());

    let provided = request
        .headers()
        .get(INTERNAL_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());

    match (expected, provided) {
        (Some(expected), Some(provided))
            if constant_time_eq(expected.as_bytes(), provided.as_bytes()) =>
        {
            Ok(next.run(request).await)
        }
        (None, _) => {
            warn!(path = %request.uri().path(), "internal endpoint called but no internal secret is configured");
            Err(ServiceError::Unauthorized("internal secret not configured".into()))
        }
        _ => {
            warn!(path = %request.uri().path(), "internal endpoint called with invalid secret");
            Err(ServiceError::Unauthorized("invalid internal secret".into()))
        }
    }
}
