//! Gemini-backed provider with response caching and error recovery

use super::{ChatProvider, ChunkOrigin, GenerateRequest, ProviderChunk};
use crate::cache::ResponseCache;
use crate::gemini::{GeminiClient, GenerateContentRequest, GenerationConfig, Part};
use crate::recovery::{ErrorRecovery, RecoveryError};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

/// Shown when the circuit breaker is open
pub const UNAVAILABLE_MESSAGE: &str =
    "Our AI assistant is temporarily unavailable due to repeated errors. Please try again in a minute.";

/// Shown when every retry failed
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I'm having trouble generating a response right now. Please try again shortly.";

/// Provider that calls Gemini once per turn
#[derive(Clone)]
pub struct GeminiProvider {
    client: GeminiClient,
    cache: Arc<ResponseCache>,
    recovery: Arc<ErrorRecovery>,
    temperature: f32,
}

impl GeminiProvider {
    pub fn new(
        client: GeminiClient,
        cache: Arc<ResponseCache>,
        recovery: Arc<ErrorRecovery>,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            cache,
            recovery,
            temperature,
        }
    }

    fn build_request(&self, request: &GenerateRequest) -> GenerateContentRequest {
        let mut system_parts = Vec::new();
        if !request.system_prompt.is_empty() {
            system_parts.push(Part::text(request.system_prompt.clone()));
        }
        if let Some(ref ctx) = request.context {
            let rendered = serde_json::to_string_pretty(ctx).unwrap_or_default();
            system_parts.push(Part::text(format!("Session context (JSON):\n{}", rendered)));
        }

        let mut body = GenerateContentRequest::from_messages(
            &request.messages,
            system_parts,
            GenerationConfig {
                max_output_tokens: request.max_output_tokens,
                temperature: self.temperature,
            },
        );
        body.attach_to_last_user(
            request
                .attachments
                .iter()
                .map(|a| Part::inline(a.mime_type.clone(), a.data.clone()))
                .collect(),
        );
        body
    }

    /// Produce the whole reply for one turn
    pub async fn complete(&self, request: GenerateRequest) -> ProviderChunk {
        // Attachments are not part of the key, so those turns bypass the cache
        let cacheable = request.attachments.is_empty();
        let key = ResponseCache::compute_key(&request.messages, &request.cache_scope());

        if cacheable {
            if let Some(hit) = self.cache.get(&key) {
                return ProviderChunk::new(hit, ChunkOrigin::Cache);
            }
        }

        let body = self.build_request(&request);
        let operation_id = format!("generate-{}", uuid::Uuid::new_v4());

        match self
            .recovery
            .execute(&operation_id, || self.client.generate_content(&body))
            .await
        {
            Ok(result) => {
                if cacheable {
                    self.cache.set(&key, result.content.clone());
                }
                ProviderChunk::new(result.content, ChunkOrigin::Vendor)
            }
            Err(RecoveryError::CircuitOpen) => {
                debug!("Gemini circuit open, returning unavailability message");
                ProviderChunk::new(UNAVAILABLE_MESSAGE, ChunkOrigin::Fallback)
            }
            Err(e) => {
                warn!("Gemini generation failed ({}): {}", e.code(), e);
                ProviderChunk::new(APOLOGY_MESSAGE, ChunkOrigin::Fallback)
            }
        }
    }
}

impl ChatProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn generate(&self, request: GenerateRequest) -> BoxStream<'static, ProviderChunk> {
        let this = self.clone();
        stream::once(async move { this.complete(request).await }).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Attachment, ChatMessage};
    use crate::recovery::{CircuitBreaker, RetryPolicy};
    use std::time::Duration;

    fn provider() -> GeminiProvider {
        let client = GeminiClient::new(
            "key",
            "http://127.0.0.1:9",
            "gemini-test",
            "embed-test",
            Duration::from_secs(1),
        )
        .unwrap();
        GeminiProvider::new(
            client,
            Arc::new(ResponseCache::new(100, Duration::from_secs(60), true)),
            Arc::new(ErrorRecovery::new(RetryPolicy::default(), CircuitBreaker::new("test"))),
            0.3,
        )
    }

    #[test]
    fn test_context_goes_to_system_instruction() {
        let mut request = GenerateRequest::new(vec![ChatMessage::user("Hi")], "You are a consultant.");
        request.context = Some(serde_json::json!({"company": "Acme"}));

        let body = provider().build_request(&request);
        let system = body.system_instruction.unwrap();
        assert_eq!(system.parts.len(), 2);
        assert!(system.parts[1].text.as_ref().unwrap().contains("Acme"));
        // User text is untouched
        assert_eq!(body.contents[0].parts[0].text.as_deref(), Some("Hi"));
    }

    #[test]
    fn test_attachments_become_inline_parts() {
        let mut request = GenerateRequest::new(vec![ChatMessage::user("What is this?")], "");
        request.attachments.push(Attachment {
            mime_type: "image/jpeg".to_string(),
            data: "aGVsbG8=".to_string(),
            name: None,
        });

        let body = provider().build_request(&request);
        assert!(body.system_instruction.is_none());
        assert_eq!(body.contents[0].parts.len(), 2);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_vendor() {
        let provider = provider();
        let request = GenerateRequest::new(vec![ChatMessage::user("cached question")], "");
        provider.cache.set(
            &ResponseCache::compute_key(&request.messages, &request.cache_scope()),
            "cached answer",
        );

        let chunk = provider.complete(request).await;
        assert_eq!(chunk.origin, ChunkOrigin::Cache);
        assert_eq!(chunk.text, "cached answer");
    }

    #[test]
    fn test_cache_scope_covers_persona_and_context() {
        let plain = GenerateRequest::new(vec![ChatMessage::user("Run it")], "standard persona");
        let mut weekly = GenerateRequest::new(vec![ChatMessage::user("Run it")], "automation persona");
        weekly.context = Some(serde_json::json!({"automationTask": {"name": "weekly_report"}}));
        let mut purge = weekly.clone();
        purge.context = Some(serde_json::json!({"automationTask": {"name": "delete_all_leads"}}));

        let keys: Vec<String> = [&plain, &weekly, &purge]
            .iter()
            .map(|r| ResponseCache::compute_key(&r.messages, &r.cache_scope()))
            .collect();
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
    }

    #[tokio::test]
    async fn test_open_circuit_yields_unavailable_message() {
        let provider = provider();
        for _ in 0..5 {
            provider.recovery.breaker().record_failure();
        }

        let chunk = provider
            .complete(GenerateRequest::new(vec![ChatMessage::user("hello")], ""))
            .await;
        assert_eq!(chunk.origin, ChunkOrigin::Fallback);
        assert_eq!(chunk.text, UNAVAILABLE_MESSAGE);
    }
}
