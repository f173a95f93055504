use crate::ws::Hub;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Broadcast hub owning every live WebSocket connection
    pub hub: Hub,
    /// Connection limit the hub was started with (0 = unbounded)
    pub max_connections: usize,
}
