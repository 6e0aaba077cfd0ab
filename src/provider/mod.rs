//! Provider Adapter
//!
//! Picks the text generator for a deployment:
//!
//! ```text
//! get_provider(config)
//!   ├── no API key / mock toggle ──► MockProvider   (word-by-word, fixed delay)
//!   └── API key ───────────────────► GeminiProvider (cache → breaker → retry → vendor)
//! ```

mod gemini;
mod mock;

pub use gemini::{GeminiProvider, APOLOGY_MESSAGE, UNAVAILABLE_MESSAGE};
pub use mock::MockProvider;

use crate::cache::ResponseCache;
use crate::config::Config;
use crate::error::ChatError;
use crate::gemini::GeminiClient;
use crate::message::{Attachment, ChatMessage};
use crate::recovery::ErrorRecovery;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use tracing::info;

/// Where a piece of generated text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrigin {
    Vendor,
    Cache,
    Mock,
    /// Canned text standing in for a failed vendor call
    Fallback,
}

/// A piece of generated text
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderChunk {
    pub text: String,
    pub origin: ChunkOrigin,
}

impl ProviderChunk {
    pub fn new(text: impl Into<String>, origin: ChunkOrigin) -> Self {
        Self {
            text: text.into(),
            origin,
        }
    }
}

/// Input to a provider
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Ordered history; the last message is the user's current turn
    pub messages: Vec<ChatMessage>,
    pub system_prompt: String,
    /// Structured session context, sent as its own system part
    pub context: Option<serde_json::Value>,
    pub attachments: Vec<Attachment>,
    pub max_output_tokens: u32,
}

impl GenerateRequest {
    pub fn new(messages: Vec<ChatMessage>, system_prompt: impl Into<String>) -> Self {
        Self {
            messages,
            system_prompt: system_prompt.into(),
            context: None,
            attachments: Vec::new(),
            max_output_tokens: 2048,
        }
    }

    /// Persona and rendered context, the part of a turn outside the messages
    /// that shapes the reply
    pub fn cache_scope(&self) -> String {
        match self.context {
            Some(ref ctx) => format!("{}\n{}", self.system_prompt, ctx),
            None => self.system_prompt.clone(),
        }
    }
}

/// Text generator
///
/// Never fails: vendor errors surface as `Fallback` text.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, request: GenerateRequest) -> BoxStream<'static, ProviderChunk>;
}

/// Build the provider for this configuration
pub fn get_provider(
    config: &Config,
    cache: Arc<ResponseCache>,
    recovery: Arc<ErrorRecovery>,
) -> Result<Arc<dyn ChatProvider>, ChatError> {
    if config.mock_mode {
        info!("Mock mode enabled - using mock provider");
        return Ok(Arc::new(MockProvider::new(config.mock_delay)));
    }

    match GeminiClient::from_config(config)? {
        Some(client) => {
            info!("Using Gemini provider: model={}", client.model());
            Ok(Arc::new(GeminiProvider::new(client, cache, recovery, config.temperature)))
        }
        None => {
            info!("No Gemini API key configured - using mock provider");
            Ok(Arc::new(MockProvider::new(config.mock_delay)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn deps(config: &Config) -> (Arc<ResponseCache>, Arc<ErrorRecovery>) {
        (
            Arc::new(ResponseCache::new(100, Duration::from_secs(60), true)),
            Arc::new(ErrorRecovery::from_config(config)),
        )
    }

    #[test]
    fn test_no_key_selects_mock() {
        let config = Config::for_tests();
        let (cache, recovery) = deps(&config);
        let provider = get_provider(&config, cache, recovery).unwrap();
        assert_eq!(provider.name(), "mock");
    }

    #[test]
    fn test_key_selects_gemini() {
        let config = Config {
            gemini_api_key: Some("test-key".to_string()),
            ..Config::for_tests()
        };
        let (cache, recovery) = deps(&config);
        let provider = get_provider(&config, cache, recovery).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn test_mock_toggle_wins() {
        let config = Config {
            gemini_api_key: Some("test-key".to_string()),
            mock_mode: true,
            ..Config::for_tests()
        };
        let (cache, recovery) = deps(&config);
        let provider = get_provider(&config, cache, recovery).unwrap();
        assert_eq!(provider.name(), "mock");
    }
}
