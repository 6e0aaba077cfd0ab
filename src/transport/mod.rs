//! Streaming Transport
//!
//! Minimal SSE framing for chat streams (no `id`, no `retry`, no
//! reconnection):
//!
//! ```text
//! event: meta
//! data: {"mode":"standard","provider":"mock",...}
//!
//! data: {<chat message chunk>}        one per chunk
//!
//! event: end                          or `event: error` + {code, message}
//! data: {}
//! ```

pub mod client;
pub mod server;

pub use client::{decode_messages, ChatClient, SseDecoder, SseFrame};
pub use server::{into_sse, SseStream};

use serde::{Deserialize, Serialize};

pub const META_EVENT: &str = "meta";
pub const END_EVENT: &str = "end";
pub const ERROR_EVENT: &str = "error";

/// Payload of the `meta` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMeta {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub provider: String,
    /// ISO 8601
    pub started_at: String,
}

impl StreamMeta {
    pub fn new(mode: impl Into<String>, session_id: Option<String>, provider: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            session_id,
            provider: provider.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
