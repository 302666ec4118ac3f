use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::voice;
use crate::state::AppState;

/// Carrier webhook routes and the media-stream WebSocket endpoint.
///
/// Signaling webhooks authenticate through the carrier's request signature;
/// the stream endpoint is unsigned by protocol design.
pub fn create_voice_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/voice/inbound", post(voice::inbound_call_handler))
        .route("/voice/status", post(voice::status_callback_handler))
        .route("/voice/gather", post(voice::gather_callback_handler))
        .route("/voice/stream", get(voice::stream_handler))
        .layer(TraceLayer::new_for_http())
}
