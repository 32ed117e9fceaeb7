//! Test fixtures for CallBridge Gateway integration tests
//!
//! - Audio fixtures (programmatically generated telephony frames)
//! - Wire protocol message builders

// Not every test binary uses every fixture
#![allow(dead_code)]

pub mod audio_fixtures;

pub use audio_fixtures::*;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

/// `start` event carrying a stream token and optional call id.
pub fn start_event(stream_token: &str, call_id: Option<&str>) -> String {
    let mut start = json!({ "streamToken": stream_token });
    if let Some(call_id) = call_id {
        start["callId"] = json!(call_id);
    }
    json!({ "event": "start", "streamToken": stream_token, "start": start }).to_string()
}

/// Inbound `media` event with the payload base64 encoded.
pub fn media_event(stream_token: &str, sequence: u64, audio: &[u8]) -> String {
    json!({
        "event": "media",
        "streamToken": stream_token,
        "sequenceNumber": sequence.to_string(),
        "media": { "track": "inbound", "payload": BASE64.encode(audio) }
    })
    .to_string()
}

pub fn stop_event(stream_token: &str) -> String {
    json!({ "event": "stop", "streamToken": stream_token }).to_string()
}

/// Outbound frame fields: `(event, streamToken, decoded payload length or mark name)`.
pub fn describe_outbound(json: &str) -> (String, String, String) {
    let value: Value = serde_json::from_str(json).unwrap();
    let event = value["event"].as_str().unwrap_or_default().to_string();
    let token = value["streamToken"].as_str().unwrap_or_default().to_string();
    let detail = match event.as_str() {
        "media" => BASE64
            .decode(value["media"]["payload"].as_str().unwrap_or_default())
            .map(|b| b.len().to_string())
            .unwrap_or_default(),
        "mark" => value["mark"]["name"].as_str().unwrap_or_default().to_string(),
        _ => String::new(),
    };
    (event, token, detail)
}
