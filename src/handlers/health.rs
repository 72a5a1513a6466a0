use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{circuit_breaker::CircuitState, gateways::GatewayId, AppState};

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    pub storage: String,
    pub gateways: Vec<GatewayId>,
    /// Circuit state per gateway that has been called at least once
    pub circuits: BTreeMap<String, String>,
}

/// Liveness and storage check
#[utoipa::path(
    get,
    path = "/health",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse),
        (status = 503, description = "Storage unreachable", body = HealthResponse),
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let storage_ok = state.store.ping().await.is_ok();
    let circuits = state
        .gateways
        .breaker_states()
        .into_iter()
        .map(|(name, circuit)| {
            let label = match circuit {
                CircuitState::Closed => "closed",
                CircuitState::Open => "open",
                CircuitState::HalfOpen => "half_open",
            };
            (name, label.to_string())
        })
        .collect();

    let response = HealthResponse {
        status: if storage_ok { "up" } else { "down" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage: if storage_ok { "up" } else { "down" }.to_string(),
        gateways: state.gateways.configured(),
        circuits,
    };
    let code = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}
