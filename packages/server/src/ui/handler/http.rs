//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};

use crate::{
    infrastructure::dto::http::{HealthDto, HubStateDto},
    ui::state::AppState,
};

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_string(),
        connections: state.active_connections(),
    })
}

/// Debug endpoint exposing the registry snapshot and hub counters
pub async fn debug_hub_state(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HubStateDto>, StatusCode> {
    match state.hub.snapshot().await {
        Ok(snapshot) => Ok(Json(HubStateDto::new(
            &snapshot,
            state.config.max_connections,
            state.admission.available_permits(),
        ))),
        Err(e) => {
            tracing::warn!("Cannot read hub state: {}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
