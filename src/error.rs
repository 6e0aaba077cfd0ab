//! Error Taxonomy
//!
//! Coarse error classes shared by the vendor client, the recovery wrapper and
//! the chat facade. Classification is substring based so that errors coming
//! from anywhere (reqwest, SQLite, vendor JSON) end up in the same buckets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse error code attached to error-flagged chat messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Network,
    Auth,
    RateLimit,
    AiProvider,
    Validation,
    Timeout,
    Unknown,
}

impl ErrorCode {
    /// Classify an error from its message
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
            || lower.contains("429")
        {
            Self::RateLimit
        } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("deadline") {
            Self::Timeout
        } else if lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("permission")
            || lower.contains("401")
            || lower.contains("403")
        {
            Self::Auth
        } else if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("fetch")
            || lower.contains("dns")
        {
            Self::Network
        } else if lower.contains("invalid") || lower.contains("validation") || lower.contains("required") {
            Self::Validation
        } else if lower.contains("gemini")
            || lower.contains("model")
            || lower.contains("candidate")
            || lower.contains("safety")
            || lower.contains("provider")
        {
            Self::AiProvider
        } else {
            Self::Unknown
        }
    }

    /// Whether a retry can plausibly succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth | Self::Validation)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::AiProvider => "ai_provider",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// User-facing text for an error-flagged message
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network => "I couldn't reach the assistant service. Please check your connection and try again.",
            Self::Auth => "The assistant service rejected our credentials. Please contact support.",
            Self::RateLimit => "We're receiving a lot of requests right now. Please wait a moment and try again.",
            Self::AiProvider => "The AI provider had trouble answering that. Please try rephrasing your question.",
            Self::Validation => "That request couldn't be processed. Please check your input and try again.",
            Self::Timeout => "The assistant took too long to respond. Please try again.",
            Self::Unknown => "Something went wrong while generating a response. Please try again.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while serving a chat request
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Gemini provider error: {0}")]
    Provider(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stream cancelled")]
    Cancelled,

    #[error("{0}")]
    Internal(String),
}

impl ChatError {
    /// Error code for this error
    ///
    /// Typed variants map directly; `Storage` and `Internal` fall back to
    /// substring classification of their message.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network(_) => ErrorCode::Network,
            Self::Auth(_) => ErrorCode::Auth,
            Self::RateLimited(_) => ErrorCode::RateLimit,
            Self::Provider(_) => ErrorCode::AiProvider,
            Self::Validation(_) => ErrorCode::Validation,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Cancelled => ErrorCode::Unknown,
            Self::Storage(msg) | Self::Internal(msg) => ErrorCode::classify(msg),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Self::Network(e.to_string())
        } else if e.is_decode() {
            Self::Provider(format!("undecodable response: {}", e))
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

/// JSON body of an `event: error` SSE frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&ChatError> for ErrorPayload {
    fn from(e: &ChatError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}
