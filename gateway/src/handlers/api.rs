use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::core::call::SessionSnapshot;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_calls: usize,
}

/// Health check handler
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        active_calls: state.registry.len(),
    })
}

/// List active call sessions, oldest first
pub async fn list_calls(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSnapshot>> {
    Json(state.registry.list())
}

/// Look up one active session by connection id
pub async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(connection_id): Path<String>,
) -> Response {
    match state.registry.get(&connection_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No active call for connection {connection_id}") })),
        )
            .into_response(),
    }
}
