//! Deterministic mock provider for local development and tests

use super::{ChatProvider, ChunkOrigin, GenerateRequest, ProviderChunk};
use crate::message::{last_user_message, ChatMessage};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::time::Duration;

/// Emits a fixed transcript word by word
#[derive(Debug, Clone)]
pub struct MockProvider {
    delay: Duration,
}

impl MockProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Full mock reply for a conversation
    pub fn transcript(messages: &[ChatMessage]) -> String {
        match last_user_message(messages) {
            Some(msg) => format!(
                "Thanks for your message: \"{}\". This is a mock consulting response \
                 generated locally because no Gemini API key is configured. \
                 In a live session I would analyse your question and suggest concrete next steps.",
                msg.content.trim()
            ),
            None => "Hello! This is a mock consulting assistant. Ask me anything about growing your business."
                .to_string(),
        }
    }
}

impl ChatProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn generate(&self, request: GenerateRequest) -> BoxStream<'static, ProviderChunk> {
        let words: Vec<String> = Self::transcript(&request.messages)
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let delay = self.delay;

        stream::iter(words)
            .then(move |word| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                ProviderChunk::new(word, ChunkOrigin::Mock)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_stream_reassembles_transcript() {
        let provider = MockProvider::new(Duration::ZERO);
        let messages = vec![ChatMessage::user("Hi")];

        let chunks: Vec<ProviderChunk> = provider
            .generate(GenerateRequest::new(messages.clone(), "system"))
            .collect()
            .await;

        assert!(chunks.len() > 5);
        assert!(chunks.iter().all(|c| c.origin == ChunkOrigin::Mock));

        let text: String = chunks.into_iter().map(|c| c.text).collect();
        assert_eq!(text, MockProvider::transcript(&messages));
        assert!(text.contains("Hi"));
    }

    #[test]
    fn test_transcript_is_deterministic() {
        let messages = vec![ChatMessage::user("How do I cut costs?")];
        assert_eq!(MockProvider::transcript(&messages), MockProvider::transcript(&messages));
    }

    #[test]
    fn test_transcript_without_user_message() {
        let text = MockProvider::transcript(&[]);
        assert!(text.starts_with("Hello!"));
    }
}
