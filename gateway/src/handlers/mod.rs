//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and active call listing
//! - `call` - Telephony media-stream WebSocket

pub mod api;
pub mod call;

pub use call::media_stream_handler;
