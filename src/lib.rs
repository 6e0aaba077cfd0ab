//! Consultant Chat
//!
//! Streaming chat backend for a business-consulting assistant.
//!
//! # Features
//!
//! - **Provider Adapter**: Gemini, or a deterministic mock when no key is set
//! - **Response Cache**: TTL cache keyed by the tail of the conversation
//! - **Error Recovery**: Exponential backoff plus a circuit breaker
//! - **Chat Modes**: standard, realtime, admin, multimodal, automation
//! - **SSE Transport**: axum server framing and a matching client parser
//! - **Persistence**: Session context and admin history in SQLite, with an
//!   in-memory fallback
//!
//! # Architecture
//!
//! ```text
//! Client ──► POST /api/chat ──► UnifiedChatProvider ──► ChatProvider ──► Gemini
//!   ▲                                  │                     │
//!   │                                  ├── ContextStore      ├── ResponseCache
//!   │                                  ├── AdminStore        └── ErrorRecovery
//!   │                                  └── RealtimeSessions
//!   └──── SSE (meta, data..., end) ◄── transport::server
//! ```

pub mod admin_store;
pub mod app;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod gemini;
pub mod message;
pub mod provider;
pub mod recovery;
pub mod server;
pub mod transport;

pub use admin_store::{AdminConversationStore, AdminMessage, SessionSummary};
pub use app::{App, StatusReport};
pub use cache::{CacheStats, ResponseCache};
pub use chat::{
    AutomationTask, ChatMode, ChatRequest, ChatRequestBody, ChatSettings, RealtimeSessions,
    StreamHandle, UnifiedChatProvider,
};
pub use config::{Config, Persistence};
pub use context::{ContextStore, SessionContext};
pub use embeddings::{embedding_from_bytes, embedding_to_bytes, Embedder, GeminiEmbedder};
pub use error::{ChatError, ErrorCode, ErrorPayload};
pub use gemini::GeminiClient;
pub use message::{Attachment, ChatMessage, MessageMetadata, Role};
pub use provider::{get_provider, ChatProvider, ChunkOrigin, GenerateRequest, MockProvider, ProviderChunk};
pub use recovery::{CircuitBreaker, CircuitState, ErrorRecovery, RecoveryError, RetryPolicy};
pub use server::ChatServer;
pub use transport::{decode_messages, into_sse, ChatClient, SseDecoder, SseFrame, StreamMeta};
