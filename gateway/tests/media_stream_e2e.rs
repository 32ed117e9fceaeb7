//! Media stream end-to-end tests
//!
//! Boots the real router on a local port with mock collaborators and talks
//! to it as a telephony provider would, over a WebSocket.

mod fixtures;
mod mock_providers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use callbridge_gateway::core::call::{CallRecordStore, StaticCallRecordStore};
use callbridge_gateway::middleware::connection_limit_middleware;
use callbridge_gateway::{ServerConfig, routes, state::AppState};

use fixtures::*;
use mock_providers::*;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const REPLY: &str = "Your balance is ten dollars.";

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.session = test_session_config();
    // keep real-time waits short
    config.session.silence_threshold_ms = 300;
    config
}

async fn start_server(
    config: ServerConfig,
    stack: &MockStack,
    records: Arc<dyn CallRecordStore>,
) -> (SocketAddr, Arc<AppState>) {
    let state = AppState::with_collaborators(config, stack.collaborators(), records);

    let call_routes = routes::call::create_call_router().layer(middleware::from_fn_with_state(
        state.clone(),
        connection_limit_middleware,
    ));
    let app = routes::api::create_api_router()
        .merge(call_routes)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    (addr, state)
}

fn text_message(s: &str) -> Message {
    Message::Text(s.to_string().into())
}

async fn connect(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/media-stream{query}");
    let (ws, _) = timeout(Duration::from_secs(5), connect_async(&url))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    ws
}

/// Next outbound event as `(event, streamToken, detail)`; `None` once closed.
async fn next_event(ws: &mut Client) -> Option<(String, String, String)> {
    loop {
        let message = timeout(Duration::from_secs(10), ws.next())
            .await
            .expect("timed out waiting for the server")?;
        match message {
            Ok(Message::Text(text)) => return Some(describe_outbound(text.as_str())),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Media payload lengths up to the mark named `name`.
async fn frames_until_mark(ws: &mut Client, name: &str, token: &str) -> Vec<usize> {
    let mut frames = Vec::new();
    loop {
        let (event, event_token, detail) = next_event(ws)
            .await
            .unwrap_or_else(|| panic!("closed before mark {name}"));
        assert_eq!(event_token, token);
        match event.as_str() {
            "media" => frames.push(detail.parse().unwrap()),
            "mark" if detail == name => return frames,
            _ => {}
        }
    }
}

async fn speak(ws: &mut Client, token: &str, total_bytes: usize) {
    for (i, frame) in voiced_frames(total_bytes).iter().enumerate() {
        ws.send(text_message(&media_event(token, i as u64 + 1, frame)))
            .await
            .unwrap();
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_full_call_over_websocket() {
    let stack = MockStack::new(MockTranscriber::new("what's my balance"), MockReasoner::new(REPLY));
    let records = Arc::new(StaticCallRecordStore::new());
    let (addr, state) = start_server(test_config(), &stack, records.clone()).await;
    let greeting = state.config.session.greeting.clone();
    let filler = state.config.session.filler_phrase.clone();

    let mut ws = connect(addr, "?call_id=e2e-1&stream_token=MZE2E").await;
    ws.send(text_message(r#"{"event":"connected"}"#)).await.unwrap();

    assert_eq!(
        frames_until_mark(&mut ws, "greeting", "MZE2E").await,
        vec![clip_len(&greeting)]
    );

    speak(&mut ws, "MZE2E", 6400).await;
    assert_eq!(
        frames_until_mark(&mut ws, "turn-1", "MZE2E").await,
        vec![clip_len(&filler), clip_len(REPLY)]
    );
    assert_eq!(stack.transcriber.calls(), vec![6400]);

    let calls: serde_json::Value = reqwest::get(format!("http://{addr}/calls"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let calls = calls.as_array().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["stream_token"], "MZE2E");

    ws.send(text_message(&stop_event("MZE2E"))).await.unwrap();
    assert!(next_event(&mut ws).await.is_none());

    wait_until(|| state.registry.is_empty()).await;
    wait_until(|| state.active_connections() == 0).await;

    let saved = records.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].call_id, "e2e-1");
    assert_eq!(saved[0].turns.len(), 3);
    assert_eq!(saved[0].turns[2].text, REPLY);
}

#[tokio::test]
async fn test_malformed_messages_do_not_end_call() {
    let stack = MockStack::new(MockTranscriber::new("hello"), MockReasoner::new(REPLY));
    let (addr, state) =
        start_server(test_config(), &stack, Arc::new(StaticCallRecordStore::new())).await;

    let mut ws = connect(addr, "?call_id=e2e-2&stream_token=MZBAD").await;
    frames_until_mark(&mut ws, "greeting", "MZBAD").await;

    ws.send(text_message("not json")).await.unwrap();
    ws.send(text_message(r#"{"event":"media","media":{"payload":"***"}}"#))
        .await
        .unwrap();
    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    speak(&mut ws, "MZBAD", 3200).await;
    let frames = frames_until_mark(&mut ws, "turn-1", "MZBAD").await;
    assert_eq!(frames.last(), Some(&clip_len(REPLY)));
    assert_eq!(state.registry.len(), 1);

    ws.close(None).await.unwrap();
    wait_until(|| state.registry.is_empty()).await;
}

#[tokio::test]
async fn test_handshake_start_event_supplies_identity() {
    let stack = MockStack::new(MockTranscriber::new("hello"), MockReasoner::new(REPLY));
    let records = Arc::new(StaticCallRecordStore::new());
    let (addr, state) = start_server(test_config(), &stack, records.clone()).await;

    let mut ws = connect(addr, "").await;
    ws.send(text_message(&start_event("MZSTART", Some("e2e-3"))))
        .await
        .unwrap();
    frames_until_mark(&mut ws, "greeting", "MZSTART").await;

    let snapshot = state.registry.list().pop().unwrap();
    assert_eq!(snapshot.stream_token.as_deref(), Some("MZSTART"));

    drop(ws);
    wait_until(|| state.registry.is_empty()).await;
    wait_until(|| !records.saved().is_empty()).await;
    assert_eq!(records.saved()[0].call_id, "e2e-3");
}

#[tokio::test]
async fn test_per_ip_limit_rejects_second_call() {
    let stack = MockStack::new(MockTranscriber::new("hello"), MockReasoner::new(REPLY));
    let mut config = test_config();
    config.max_calls_per_ip = 1;
    let (addr, state) = start_server(config, &stack, Arc::new(StaticCallRecordStore::new())).await;

    let first = connect(addr, "?call_id=limit-1&stream_token=MZL1").await;
    wait_until(|| state.registry.len() == 1).await;

    let url = format!("ws://{addr}/media-stream?call_id=limit-2");
    match connect_async(&url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 429),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("second call should have been rejected"),
    }

    drop(first);
    wait_until(|| state.active_connections() == 0).await;
    let _again = connect(addr, "?call_id=limit-3&stream_token=MZL3").await;
}
