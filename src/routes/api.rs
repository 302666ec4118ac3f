use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;

/// REST control API plus the health check
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/call", post(api::place_call_handler))
        .route("/api/speak", post(api::speak_handler))
        .route("/api/end", post(api::end_call_handler))
        .route("/api/call/{call_sid}", get(api::get_call_handler))
        .route("/api/calls", get(api::list_calls_handler))
        .route("/health", get(api::health_check))
        .layer(TraceLayer::new_for_http())
}
