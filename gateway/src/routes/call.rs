//! Telephony media-stream route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::call::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream WebSocket router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for one telephony call leg.
/// `call_id` and `stream_token` may be passed as query parameters when the
/// provider knows them before the `start` event.
///
/// # Protocol
///
/// ```json
/// // Provider sends
/// {"event": "start", "streamToken": "MZ..", "start": {"callId": "CA.."}}
/// {"event": "media", "streamToken": "MZ..", "sequence": "3", "media": {"payload": "<base64>"}}
/// {"event": "stop", "streamToken": "MZ.."}
///
/// // Server sends
/// {"event": "media", "streamToken": "MZ..", "media": {"payload": "<base64>"}}
/// {"event": "mark", "streamToken": "MZ..", "mark": {"name": "turn-1"}}
/// ```
///
/// The connection-limit middleware is applied in `main.rs`.
pub fn create_call_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
