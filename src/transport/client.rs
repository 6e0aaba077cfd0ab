//! Client side: SSE bytes back to chat messages

use super::{StreamMeta, END_EVENT, ERROR_EVENT, META_EVENT};
use crate::chat::ChatRequestBody;
use crate::error::{ChatError, ErrorCode, ErrorPayload};
use crate::message::ChatMessage;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Client;
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, warn};

/// A decoded SSE frame
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Meta(StreamMeta),
    Message(ChatMessage),
    End,
    Error(ErrorPayload),
}

/// Incremental SSE decoder
///
/// Feed it arbitrary byte slices; lines may be split anywhere, including
/// inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the frames completed by `bytes`
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                if let Some(frame) = self.process_line(&line) {
                    frames.push(frame);
                }
            } else {
                self.line.push(byte);
            }
        }
        frames
    }

    /// Flush a trailing frame not terminated by a blank line
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.line.is_empty() {
            let line = std::mem::take(&mut self.line);
            if let Some(frame) = self.process_line(&line) {
                return Some(frame);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = String::from_utf8_lossy(raw);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            other => debug!("Ignoring SSE field '{}'", other),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");

        let frame = match event.as_deref() {
            Some(META_EVENT) => serde_json::from_str(&data).map(SseFrame::Meta),
            Some(END_EVENT) => Ok(SseFrame::End),
            Some(ERROR_EVENT) => serde_json::from_str(&data).map(SseFrame::Error),
            _ => serde_json::from_str(&data).map(SseFrame::Message),
        };

        match frame {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!("Skipping malformed SSE frame ({:?}): {}", event, e);
                None
            }
        }
    }
}

/// Rebuild a typed error from an `error` frame
pub fn payload_error(payload: ErrorPayload) -> ChatError {
    let message = payload.message;
    match payload.code {
        ErrorCode::Network => ChatError::Network(message),
        ErrorCode::Auth => ChatError::Auth(message),
        ErrorCode::RateLimit => ChatError::RateLimited(message),
        ErrorCode::AiProvider => ChatError::Provider(message),
        ErrorCode::Validation => ChatError::Validation(message),
        ErrorCode::Timeout => ChatError::Timeout(message),
        ErrorCode::Unknown => ChatError::Internal(message),
    }
}

struct DecodeState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<SseFrame>,
    eof: bool,
    done: bool,
}

/// Chat messages from an SSE byte stream
///
/// Ends after a chunk flagged complete or an `end` frame. An `error` frame
/// yields one `Err` and ends the stream.
pub fn decode_messages<S, B, E>(bytes: S) -> impl Stream<Item = Result<ChatMessage, ChatError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<ChatError>,
{
    let state = DecodeState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        eof: false,
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.done {
                return None;
            }

            while let Some(frame) = state.pending.pop_front() {
                match frame {
                    SseFrame::Meta(meta) => debug!("Chat stream started: mode={}", meta.mode),
                    SseFrame::Message(message) => {
                        state.done = message.is_complete();
                        return Some((Ok(message), state));
                    }
                    SseFrame::End => return None,
                    SseFrame::Error(payload) => {
                        state.done = true;
                        return Some((Err(payload_error(payload)), state));
                    }
                }
            }

            if state.eof {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    let frames = state.decoder.feed(chunk.as_ref());
                    state.pending.extend(frames);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    // Connection closed; flush whatever was buffered
                    state.eof = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

/// HTTP client for the chat endpoint
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a chat request and stream back its messages
    pub async fn send(
        &self,
        body: &ChatRequestBody,
    ) -> Result<BoxStream<'static, Result<ChatMessage, ChatError>>, ChatError> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Network(format!("chat endpoint returned {}: {}", status, text)));
        }

        Ok(decode_messages(response.bytes_stream()).boxed())
    }

    /// Stop a realtime session; false if it was not live
    pub async fn cancel_realtime(&self, session_id: &str) -> Result<bool, ChatError> {
        let response = self
            .client
            .post(format!("{}/api/chat/realtime/{}/cancel", self.base_url, session_id))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}
