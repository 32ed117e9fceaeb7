//! Telephony media-stream wire protocol
//!
//! JSON text frames tagged by `event`. The provider's correlation id is
//! accepted as `streamToken`, `stream_sid` or `streamSid`; outbound frames
//! always use `streamToken`.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum accepted size of one inbound text frame (1 MB)
pub const MAX_INBOUND_MESSAGE_SIZE: usize = 1024 * 1024;

// =============================================================================
// Inbound (provider -> gateway)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Transport hello; carries nothing the session needs
    Connected,

    /// Stream handshake
    Start {
        #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
        stream_token: Option<String>,
        #[serde(default)]
        start: Option<StartPayload>,
    },

    /// One audio frame
    Media {
        #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
        stream_token: Option<String>,
        #[serde(
            default,
            alias = "sequence_number",
            alias = "sequenceNumber",
            deserialize_with = "de_opt_u64"
        )]
        sequence: Option<u64>,
        media: MediaPayload,
    },

    /// Playback acknowledgement for a mark we sent
    Mark {
        #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
        stream_token: Option<String>,
        #[serde(default)]
        mark: Option<MarkPayload>,
    },

    /// Keypad digit
    Dtmf {
        #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
        stream_token: Option<String>,
        #[serde(default)]
        dtmf: Option<DtmfPayload>,
    },

    /// Explicit end of call
    Stop {
        #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
        stream_token: Option<String>,
    },
}

impl InboundEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::Connected => "connected",
            InboundEvent::Start { .. } => "start",
            InboundEvent::Media { .. } => "media",
            InboundEvent::Mark { .. } => "mark",
            InboundEvent::Dtmf { .. } => "dtmf",
            InboundEvent::Stop { .. } => "stop",
        }
    }

    /// Token carried at the top level or, for `start`, inside the payload.
    pub fn stream_token(&self) -> Option<&str> {
        let token = match self {
            InboundEvent::Connected => None,
            InboundEvent::Start {
                stream_token,
                start,
            } => stream_token
                .as_deref()
                .or_else(|| start.as_ref().and_then(|s| s.stream_token.as_deref())),
            InboundEvent::Media { stream_token, .. }
            | InboundEvent::Mark { stream_token, .. }
            | InboundEvent::Dtmf { stream_token, .. }
            | InboundEvent::Stop { stream_token } => stream_token.as_deref(),
        };
        token.filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartPayload {
    #[serde(default, rename = "streamToken", alias = "stream_sid", alias = "streamSid")]
    pub stream_token: Option<String>,
    #[serde(default, rename = "callId", alias = "call_sid", alias = "callSid", alias = "call_id")]
    pub call_id: Option<String>,
    #[serde(default, rename = "customParameters", alias = "custom_parameters")]
    pub custom_parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    /// "inbound" or "outbound"; absent means inbound
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub chunk: Option<u64>,
    #[serde(default, rename = "timestampMs", alias = "timestamp", deserialize_with = "de_opt_u64")]
    pub timestamp_ms: Option<u64>,
    /// Base64 audio in the wire format
    pub payload: String,
}

impl MediaPayload {
    pub fn is_outbound_track(&self) -> bool {
        self.track
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case("outbound"))
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(self.payload.trim())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DtmfPayload {
    #[serde(default)]
    pub digit: Option<String>,
}

/// Providers send counters either as strings or numbers.
fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Number(u64),
        String(String),
    }

    Ok(
        match Option::<StringOrNumber>::deserialize(deserializer)? {
            Some(StringOrNumber::Number(n)) => Some(n),
            Some(StringOrNumber::String(s)) => s.trim().parse().ok(),
            None => None,
        },
    )
}

// =============================================================================
// Outbound (gateway -> provider)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamToken")]
        stream_token: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamToken")]
        stream_token: String,
        mark: MarkPayload,
    },
    /// Ask the provider to drop audio it has buffered but not played
    Clear {
        #[serde(rename = "streamToken")]
        stream_token: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundEvent {
    pub fn media(stream_token: &str, audio: &[u8]) -> Self {
        OutboundEvent::Media {
            stream_token: stream_token.to_string(),
            media: OutboundMedia {
                payload: BASE64.encode(audio),
            },
        }
    }

    pub fn mark(stream_token: &str, name: impl Into<String>) -> Self {
        OutboundEvent::Mark {
            stream_token: stream_token.to_string(),
            mark: MarkPayload { name: name.into() },
        }
    }

    pub fn clear(stream_token: &str) -> Self {
        OutboundEvent::Clear {
            stream_token: stream_token.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Work item for the WebSocket sender task.
#[derive(Debug)]
pub enum MediaRoute {
    Outgoing(String),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_with_string_counters() {
        let json = r#"{
            "event": "media",
            "streamToken": "MZ123",
            "sequence": "7",
            "media": {"chunk": "6", "timestampMs": "120", "payload": "AAABAA=="}
        }"#;
        match InboundEvent::parse(json).unwrap() {
            InboundEvent::Media {
                stream_token,
                sequence,
                media,
            } => {
                assert_eq!(stream_token.as_deref(), Some("MZ123"));
                assert_eq!(sequence, Some(7));
                assert_eq!(media.chunk, Some(6));
                assert_eq!(media.timestamp_ms, Some(120));
                assert_eq!(media.decode().unwrap(), vec![0, 0, 1, 0]);
                assert!(!media.is_outbound_track());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_token_aliases() {
        let exotel = r#"{"event":"media","stream_sid":"S1","media":{"payload":""}}"#;
        let twilio = r#"{"event":"stop","streamSid":"S2"}"#;
        assert_eq!(InboundEvent::parse(exotel).unwrap().stream_token(), Some("S1"));
        assert_eq!(InboundEvent::parse(twilio).unwrap().stream_token(), Some("S2"));
    }

    #[test]
    fn test_media_without_token() {
        let json = r#"{"event":"media","sequence":1,"media":{"payload":"AAA="}}"#;
        let event = InboundEvent::parse(json).unwrap();
        assert_eq!(event.stream_token(), None);
        assert_eq!(event.name(), "media");
    }

    #[test]
    fn test_start_payload_token_and_call_id() {
        let json = r#"{
            "event": "start",
            "start": {
                "stream_sid": "S9",
                "call_sid": "CA42",
                "custom_parameters": {"agent_id": "sales"}
            }
        }"#;
        let event = InboundEvent::parse(json).unwrap();
        assert_eq!(event.stream_token(), Some("S9"));
        let InboundEvent::Start { start, .. } = event else {
            panic!("expected start");
        };
        let start = start.unwrap();
        assert_eq!(start.call_id.as_deref(), Some("CA42"));
        assert_eq!(start.custom_parameters["agent_id"], "sales");
    }

    #[test]
    fn test_outbound_track_detection() {
        let json = r#"{"event":"media","media":{"track":"outbound","payload":""}}"#;
        let InboundEvent::Media { media, .. } = InboundEvent::parse(json).unwrap() else {
            panic!("expected media");
        };
        assert!(media.is_outbound_track());
    }

    #[test]
    fn test_connected_and_unknown_events() {
        assert_eq!(
            InboundEvent::parse(r#"{"event":"connected","protocol":"Call"}"#).unwrap(),
            InboundEvent::Connected
        );
        assert!(InboundEvent::parse(r#"{"event":"bogus"}"#).is_err());
    }

    #[test]
    fn test_outbound_shapes() {
        let media = OutboundEvent::media("S1", &[0, 1]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&media).unwrap();
        assert_eq!(value["event"], "media");
        assert_eq!(value["streamToken"], "S1");
        assert_eq!(value["media"]["payload"], "AAE=");

        let mark = OutboundEvent::mark("S1", "turn-1").to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&mark).unwrap();
        assert_eq!(value["event"], "mark");
        assert_eq!(value["mark"]["name"], "turn-1");

        let clear = OutboundEvent::clear("S1").to_json().unwrap();
        assert_eq!(clear, r#"{"event":"clear","streamToken":"S1"}"#);
    }
}
