//! Connection limit middleware for media-stream upgrades
//!
//! Caps concurrent calls globally and per client address.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use callbridge_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/media-stream", get(media_stream_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of an admitted upgrade; the handler releases the slot
/// when the call ends.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Reject media-stream upgrades beyond the configured call limits.
///
/// Returns 503 when the server-wide call limit is reached and 429 when the
/// caller's address is at its limit. Requests without an `Upgrade:
/// websocket` header pass through untouched.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                active_calls = state.active_connections(),
                "Rejecting call: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Call capacity reached. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting call: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many concurrent calls from this address.",
            )
                .into_response()
        }
    }
}
