use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Operational HTTP API
///
/// - `GET /` health check with the number of active calls
/// - `GET /calls` active call sessions
/// - `GET /calls/{connection_id}` one active session
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route("/calls", get(api::list_calls))
        .route("/calls/{connection_id}", get(api::get_call))
        .layer(TraceLayer::new_for_http())
}
