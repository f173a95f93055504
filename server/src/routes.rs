use axum::{extract::State, routing::get, Json, Router};

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// GET /health: liveness plus the current connection count.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": state.hub.len().await,
    }))
}

/// Build the axum Router. The telemetry socket is mounted under `/{prefix}`.
pub fn build_router(state: AppState, prefix: &str) -> Router {
    let prefix = prefix.trim_matches('/');
    let ws_path = if prefix.is_empty() {
        "/telemetry/ws".to_string()
    } else {
        format!("/{}/telemetry/ws", prefix)
    };

    Router::new()
        .route("/health", get(health))
        .route(&ws_path, get(ws_handler::ws_upgrade))
        .with_state(state)
}
