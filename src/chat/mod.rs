//! Unified Chat Provider
//!
//! Mode-dispatching facade over the Provider Adapter:
//! - Resolves session context (stored + request) and sends it as a
//!   structured side-channel, never inside message text
//! - One handler per [`ChatMode`] variant
//! - Streams growing-content chunks, then one `isComplete` chunk
//! - Converts handler errors into a single error-flagged chunk
//!
//! Generation runs in a spawned task writing into a bounded channel, so a
//! client that goes away stops generation at the next send.

mod prompts;
pub mod realtime;
mod request;

pub use realtime::{RealtimeSessions, StreamHandle};
pub use request::{AutomationTask, ChatMode, ChatRequest, ChatRequestBody};

use crate::admin_store::AdminConversationStore;
use crate::config::Config;
use crate::context::{ContextStore, SessionContext};
use crate::embeddings::Embedder;
use crate::error::ChatError;
use crate::message::{last_user_message, Attachment, ChatMessage, MessageMetadata, Role};
use crate::provider::{ChatProvider, ChunkOrigin, GenerateRequest, ProviderChunk};
use base64::Engine;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Chunks buffered between the generator task and the transport
const CHANNEL_CAPACITY: usize = 32;

/// Limits applied per mode
#[derive(Debug, Clone, Copy)]
pub struct ChatSettings {
    pub max_output_tokens: u32,
    pub admin_max_output_tokens: u32,
    pub max_message_chars: usize,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_output_tokens: config.max_output_tokens,
            admin_max_output_tokens: config.admin_max_output_tokens,
            max_message_chars: config.max_message_chars,
        }
    }
}

/// Assembles and sends the chunks of one assistant message
struct ChunkWriter {
    tx: mpsc::Sender<ChatMessage>,
    message: ChatMessage,
}

impl ChunkWriter {
    fn new(tx: mpsc::Sender<ChatMessage>, mode: &str, session_id: Option<String>) -> Self {
        let message = ChatMessage::assistant(String::new()).with_metadata(MessageMetadata {
            mode: Some(mode.to_string()),
            session_id,
            ..Default::default()
        });
        Self { tx, message }
    }

    async fn send(&self) -> Result<(), ChatError> {
        self.tx
            .send(self.message.clone())
            .await
            .map_err(|_| ChatError::Cancelled)
    }

    /// Append a piece and send the grown message
    async fn push(&mut self, chunk: ProviderChunk) -> Result<(), ChatError> {
        match chunk.origin {
            ChunkOrigin::Cache => self.message.metadata.cached = true,
            ChunkOrigin::Fallback => self.message.metadata.degraded = true,
            ChunkOrigin::Vendor | ChunkOrigin::Mock => {}
        }
        self.message.content.push_str(&chunk.text);
        self.message.metadata.is_streaming = true;
        self.send().await
    }

    /// Send the final chunk; returns the full text
    async fn finish(&mut self, cancelled: bool) -> Result<String, ChatError> {
        let meta = &mut self.message.metadata;
        meta.is_streaming = false;
        meta.is_complete = true;
        meta.cancelled = cancelled;
        self.send().await?;
        Ok(self.message.content.clone())
    }

    /// Replace the message with an error-flagged final chunk
    async fn fail(&mut self, error: &ChatError) {
        let code = error.code();
        self.message.content = code.user_message().to_string();
        let meta = &mut self.message.metadata;
        meta.is_streaming = false;
        meta.is_complete = true;
        meta.error = true;
        meta.error_code = Some(code);
        if self.send().await.is_err() {
            debug!("Receiver gone before error chunk could be sent");
        }
    }

    fn is_complete(&self) -> bool {
        self.message.metadata.is_complete
    }

    fn is_degraded(&self) -> bool {
        self.message.metadata.degraded
    }
}

/// Mode-dispatching chat facade
pub struct UnifiedChatProvider {
    provider: Arc<dyn ChatProvider>,
    context_store: Arc<ContextStore>,
    admin_store: Arc<AdminConversationStore>,
    embedder: Option<Arc<dyn Embedder>>,
    realtime: Arc<RealtimeSessions>,
    settings: ChatSettings,
}

impl UnifiedChatProvider {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        context_store: Arc<ContextStore>,
        admin_store: Arc<AdminConversationStore>,
        embedder: Option<Arc<dyn Embedder>>,
        realtime: Arc<RealtimeSessions>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            provider,
            context_store,
            admin_store,
            embedder,
            realtime,
            settings,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Stream the assistant's reply to a request
    pub fn stream(self: &Arc<Self>, request: ChatRequest) -> ReceiverStream<ChatMessage> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(request, tx).await });
        ReceiverStream::new(rx)
    }

    async fn run(&self, request: ChatRequest, tx: mpsc::Sender<ChatMessage>) {
        let mode = request.mode.name();
        let mut out = ChunkWriter::new(tx, mode, request.session_id.clone());
        debug!(
            "Chat request: mode={}, messages={}, provider={}",
            mode,
            request.messages.len(),
            self.provider.name()
        );

        let ChatRequest {
            messages,
            context,
            session_id,
            mode,
        } = request;

        let dispatch = async {
            match mode {
                ChatMode::Standard => self.handle_standard(messages, context, session_id, &mut out).await,
                ChatMode::Realtime { session_id } => {
                    self.handle_realtime(messages, context, session_id, &mut out).await
                }
                ChatMode::Admin { session_id } => self.handle_admin(messages, context, session_id, &mut out).await,
                ChatMode::Multimodal { attachments } => {
                    self.handle_multimodal(messages, context, session_id, attachments, &mut out)
                        .await
                }
                ChatMode::Automation { task } => {
                    self.handle_automation(messages, context, session_id, task, &mut out)
                        .await
                }
            }
        };

        // A panicking provider or handler still ends in an error chunk
        let result = match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(ChatError::Internal(format!(
                "chat handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        match result {
            Ok(()) => {}
            Err(ChatError::Cancelled) => debug!("Client disconnected, {} stream stopped", mode_label(&out)),
            Err(e) if out.is_complete() => warn!("Post-completion error in {} mode: {}", mode_label(&out), e),
            Err(e) => {
                warn!("Chat handler failed ({}): {}", e.code(), e);
                out.fail(&e).await;
            }
        }
    }

    async fn handle_standard(
        &self,
        messages: Vec<ChatMessage>,
        context: Option<SessionContext>,
        session_id: Option<String>,
        out: &mut ChunkWriter,
    ) -> Result<(), ChatError> {
        let mut request = GenerateRequest::new(messages, prompts::STANDARD);
        request.context = self.resolve_context(session_id.as_deref(), context);
        request.max_output_tokens = self.settings.max_output_tokens;
        self.pipe(request, out, None).await.map(|_| ())
    }

    async fn handle_realtime(
        &self,
        messages: Vec<ChatMessage>,
        context: Option<SessionContext>,
        session_id: String,
        out: &mut ChunkWriter,
    ) -> Result<(), ChatError> {
        let mut request = GenerateRequest::new(messages, prompts::REALTIME);
        request.context = self.resolve_context(Some(&session_id), context);
        request.max_output_tokens = self.settings.max_output_tokens;

        let handle = self.realtime.register(&session_id);
        let result = AssertUnwindSafe(self.pipe(request, out, Some(&handle)))
            .catch_unwind()
            .await;
        self.realtime.remove(&handle);
        match result {
            Ok(result) => result.map(|_| ()),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn handle_admin(
        &self,
        messages: Vec<ChatMessage>,
        context: Option<SessionContext>,
        session_id: String,
        out: &mut ChunkWriter,
    ) -> Result<(), ChatError> {
        let question = last_user_message(&messages)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.persist_admin_turn(&session_id, Role::User, &question);

        let mut request = GenerateRequest::new(messages, prompts::ADMIN);
        request.context = context.filter(|c| !c.is_empty()).map(|c| c.to_value());
        request.max_output_tokens = self.settings.admin_max_output_tokens;

        let answer = self.pipe(request, out, None).await?;
        if out.is_degraded() {
            debug!("Not persisting degraded admin answer for session {}", session_id);
        } else if !answer.is_empty() {
            self.persist_admin_turn(&session_id, Role::Assistant, &answer);
        }
        Ok(())
    }

    async fn handle_multimodal(
        &self,
        messages: Vec<ChatMessage>,
        context: Option<SessionContext>,
        session_id: Option<String>,
        attachments: Vec<Attachment>,
        out: &mut ChunkWriter,
    ) -> Result<(), ChatError> {
        let submitted = attachments.len();
        let attachments: Vec<Attachment> = attachments.into_iter().filter_map(normalize_attachment).collect();
        if attachments.len() < submitted {
            warn!(
                "Dropped {} of {} attachments that were not valid base64",
                submitted - attachments.len(),
                submitted
            );
        }

        let mut request = GenerateRequest::new(messages, prompts::MULTIMODAL);
        request.context = self.resolve_context(session_id.as_deref(), context);
        request.attachments = attachments;
        request.max_output_tokens = self.settings.max_output_tokens;
        self.pipe(request, out, None).await.map(|_| ())
    }

    async fn handle_automation(
        &self,
        messages: Vec<ChatMessage>,
        context: Option<SessionContext>,
        session_id: Option<String>,
        task: AutomationTask,
        out: &mut ChunkWriter,
    ) -> Result<(), ChatError> {
        info!("Running automation task '{}'", task.name);

        let mut context = self
            .resolve_context(session_id.as_deref(), context)
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        if let Some(map) = context.as_object_mut() {
            map.insert(
                "automationTask".to_string(),
                serde_json::to_value(&task).unwrap_or_default(),
            );
        }

        let mut request = GenerateRequest::new(messages, prompts::AUTOMATION);
        request.context = Some(context);
        request.max_output_tokens = self.settings.max_output_tokens;
        self.pipe(request, out, None).await.map(|_| ())
    }

    /// Forward provider pieces as growing chunks, then the final chunk
    async fn pipe(
        &self,
        request: GenerateRequest,
        out: &mut ChunkWriter,
        handle: Option<&StreamHandle>,
    ) -> Result<String, ChatError> {
        let mut pieces = self.provider.generate(request);

        loop {
            let next = match handle {
                Some(handle) => tokio::select! {
                    biased;
                    _ = handle.cancelled() => {
                        info!("Realtime session {} cancelled", handle.session_id);
                        return out.finish(true).await;
                    }
                    next = pieces.next() => next,
                },
                None => pieces.next().await,
            };

            match next {
                Some(chunk) => out.push(chunk).await?,
                None => break,
            }
        }

        out.finish(false).await
    }

    /// Merge stored and incoming context, save it back, and render it
    fn resolve_context(
        &self,
        session_id: Option<&str>,
        incoming: Option<SessionContext>,
    ) -> Option<serde_json::Value> {
        let Some(session_id) = session_id else {
            return incoming.filter(|c| !c.is_empty()).map(|c| c.to_value());
        };

        let mut merged = match self.context_store.load(session_id) {
            Ok(stored) => stored.unwrap_or_default(),
            Err(e) => {
                warn!("Failed to load context for session {}: {}", session_id, e);
                SessionContext::default()
            }
        };

        if let Some(incoming) = incoming.filter(|c| !c.is_empty()) {
            merged.merge(&incoming);
            merged.session_id = Some(session_id.to_string());
            if let Err(e) = self.context_store.save(session_id, &merged) {
                warn!("Failed to save context for session {}: {}", session_id, e);
            }
        }

        (!merged.is_empty()).then(|| merged.to_value())
    }

    fn persist_admin_turn(&self, session_id: &str, role: Role, content: &str) {
        if content.is_empty() {
            return;
        }
        match self.admin_store.add_message(session_id, role, content) {
            Ok(message_id) => self.spawn_embedding(message_id, content.to_string()),
            Err(e) => warn!("Failed to persist admin {} turn for {}: {}", role, session_id, e),
        }
    }

    fn spawn_embedding(&self, message_id: String, text: String) {
        let Some(embedder) = self.embedder.clone() else {
            return;
        };
        let store = Arc::clone(&self.admin_store);
        tokio::spawn(async move {
            if let Err(e) = embed_turn(embedder.as_ref(), &store, &message_id, &text).await {
                warn!("Embedding for admin turn {} skipped: {}", message_id, e);
            }
        });
    }
}

/// Compute and store the embedding of an admin turn
pub async fn embed_turn(
    embedder: &dyn Embedder,
    store: &AdminConversationStore,
    message_id: &str,
    text: &str,
) -> anyhow::Result<bool> {
    let embedding = embedder.embed(text).await?;
    store.attach_embedding(message_id, &embedding)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

fn mode_label(out: &ChunkWriter) -> &str {
    out.message.metadata.mode.as_deref().unwrap_or("chat")
}

/// Accept plain base64 or a `data:<mime>;base64,` URL; None if undecodable
fn normalize_attachment(mut attachment: Attachment) -> Option<Attachment> {
    if let Some(rest) = attachment.data.strip_prefix("data:") {
        let (header, payload) = rest.split_once(',')?;
        if let Some(mime) = header.strip_suffix(";base64") {
            if attachment.mime_type.is_empty() {
                attachment.mime_type = mime.to_string();
            }
        }
        attachment.data = payload.to_string();
    }

    attachment.data.retain(|c| !c.is_ascii_whitespace());
    if attachment.mime_type.trim().is_empty() || attachment.data.is_empty() {
        return None;
    }

    match base64::engine::general_purpose::STANDARD.decode(&attachment.data) {
        Ok(_) => Some(attachment),
        Err(e) => {
            debug!(
                "Attachment {} is not valid base64: {}",
                attachment.name.as_deref().unwrap_or("<unnamed>"),
                e
            );
            None
        }
    }
}
