//! WebSocket upgrade handler.

use std::sync::Arc;

use axum::{
    extract::{State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::Response,
};

use crate::ui::{connection::run_connection, state::AppState};

/// Admission-checked upgrade.
///
/// The admission permit is taken before the handshake; when the hub is at capacity the request
/// is answered with `503 Service Unavailable` and no upgrade happens.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Result<Response, StatusCode> {
    let permit = match state.admission.clone().try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            tracing::warn!(
                max_connections = state.config.max_connections,
                "Connection limit reached, rejecting upgrade"
            );
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let max_frame_bytes = state.config.max_frame_bytes;
    Ok(ws
        .max_message_size(max_frame_bytes)
        .max_frame_size(max_frame_bytes)
        .on_upgrade(move |socket| run_connection(socket, state, permit)))
}
