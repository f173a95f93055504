use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::state::AppState;
use crate::ws::transport::split_socket;

/// GET /{prefix}/telemetry/ws
/// Upgrades to a WebSocket and hands the socket to the hub.
///
/// A hub that is already full answers 503 without upgrading. A connection
/// that loses the race for the last slot is upgraded and then closed with
/// code 1013 by the hub itself.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max = state.max_connections;
    if max > 0 && state.hub.len().await >= max {
        tracing::warn!(max_connections = max, "Refusing WebSocket upgrade, hub is full");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = split_socket(socket);
        if let Err(err) = state.hub.connect(sink, stream).await {
            tracing::debug!(error = %err, kind = err.as_label(), "Upgraded connection refused");
        }
    })
}
