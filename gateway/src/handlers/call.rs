//! Telephony media-stream WebSocket handler
//!
//! Accepts the provider's bidirectional media stream, starts one call
//! session per connection, and shuttles wire events between the socket and
//! the session task. Outbound traffic goes through a dedicated sender task
//! draining a bounded channel so the session never writes to the socket.

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::call::{
    InboundEvent, MAX_INBOUND_MESSAGE_SIZE, MediaRoute, SessionParams, SessionSummary,
    spawn_session,
};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Buffer between the socket reader, the session and the sender task
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// How long the sender task may take to flush the final close frame
const SENDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Optional identity supplied on the upgrade URL.
#[derive(Debug, Default, Deserialize)]
pub struct MediaStreamQuery {
    #[serde(default, alias = "callId", alias = "call_sid")]
    pub call_id: Option<String>,
    #[serde(default, alias = "streamToken", alias = "stream_sid")]
    pub stream_token: Option<String>,
}

/// Returns the connection-limit slot when the socket task ends.
struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

/// Media-stream WebSocket handler
///
/// `GET /media-stream[?call_id=..&stream_token=..]`
///
/// The telephony provider then sends `connected`, `start`, `media`, `mark`,
/// `dtmf` and `stop` JSON events; the server answers with `media` and
/// `mark` events tagged with the stream token.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<MediaStreamQuery>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let connection_id = Uuid::new_v4().to_string();
    let slot = client_ip.map(|Extension(ClientIp(ip))| ConnectionSlot {
        state: state.clone(),
        ip,
    });

    info!(
        connection_id = %connection_id,
        call_id = ?query.call_id,
        "Media stream upgrade requested"
    );

    ws.max_message_size(MAX_INBOUND_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state, query, connection_id, slot))
}

async fn handle_media_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    query: MediaStreamQuery,
    connection_id: String,
    slot: Option<ConnectionSlot>,
) {
    let _slot = slot;
    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<MediaRoute>(CHANNEL_BUFFER_SIZE);
    let (event_tx, event_rx) = mpsc::channel::<InboundEvent>(CHANNEL_BUFFER_SIZE);

    let sender_connection_id = connection_id.clone();
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                MediaRoute::Outgoing(json) => sender.send(Message::Text(json.into())).await,
                MediaRoute::Close => {
                    debug!(connection_id = %sender_connection_id, "Closing media stream");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                warn!(connection_id = %sender_connection_id, error = %e, "Failed to send media stream message");
                break;
            }
        }
    });

    let params = SessionParams {
        connection_id: connection_id.clone(),
        call_id: query.call_id,
        stream_token: query.stream_token,
    };
    let mut session = spawn_session(
        state.services.clone(),
        params,
        event_rx,
        route_tx,
        state.shutdown.clone(),
    );

    let mut summary: Option<SessionSummary> = None;

    loop {
        tokio::select! {
            result = &mut session => {
                summary = result
                    .map_err(|e| error!(connection_id = %connection_id, error = %e, "Session task failed"))
                    .ok();
                break;
            }
            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => match InboundEvent::parse(text.as_str()) {
                    Ok(event) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "Skipping malformed media stream message");
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    debug!(connection_id = %connection_id, bytes = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!(connection_id = %connection_id, "Media stream closed by peer");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(connection_id = %connection_id, error = %e, "Media stream transport error");
                    break;
                }
            },
        }
    }

    // Closing the event channel is how the session learns the transport is gone
    drop(event_tx);

    let summary = match summary {
        Some(summary) => Some(summary),
        None => session
            .await
            .map_err(|e| error!(connection_id = %connection_id, error = %e, "Session task failed"))
            .ok(),
    };

    if tokio::time::timeout(SENDER_DRAIN_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        sender_task.abort();
    }

    if let Some(summary) = summary {
        info!(
            connection_id = %connection_id,
            session_id = %summary.session_id,
            reason = %summary.close_reason,
            turns = summary.turns,
            "Media stream finished"
        );
    }
}
