//! Application composition root
//!
//! Owns every piece of shared state (cache, recovery, stores, provider,
//! realtime sessions). Nothing here is global: two `App`s in one process
//! don't share a cache or a circuit breaker.

use crate::admin_store::AdminConversationStore;
use crate::cache::{CacheStats, ResponseCache};
use crate::chat::{ChatSettings, RealtimeSessions, UnifiedChatProvider};
use crate::config::{Config, Persistence};
use crate::context::ContextStore;
use crate::embeddings::{Embedder, GeminiEmbedder};
use crate::gemini::GeminiClient;
use crate::provider::{get_provider, ChatProvider};
use crate::recovery::{ErrorRecovery, RecoveryStats};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Runtime snapshot served by `/api/status`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub version: &'static str,
    pub uptime_secs: u64,
    pub provider: &'static str,
    pub persistent: bool,
    pub embeddings: bool,
    pub realtime_sessions: usize,
    pub cache: CacheStats,
    pub recovery: RecoveryStats,
}

pub struct App {
    pub config: Config,
    pub cache: Arc<ResponseCache>,
    pub recovery: Arc<ErrorRecovery>,
    pub provider: Arc<dyn ChatProvider>,
    pub context_store: Arc<ContextStore>,
    pub admin_store: Arc<AdminConversationStore>,
    pub realtime: Arc<RealtimeSessions>,
    pub chat: Arc<UnifiedChatProvider>,
    embeddings_enabled: bool,
    started_at: Instant,
}

impl App {
    /// Wire up all components from configuration
    pub fn init(config: Config) -> Result<Self> {
        let cache = Arc::new(ResponseCache::new(
            config.cache_max_entries,
            config.cache_ttl,
            config.cache_enabled,
        ));
        let recovery = Arc::new(ErrorRecovery::from_config(&config));
        let provider = get_provider(&config, Arc::clone(&cache), Arc::clone(&recovery))?;

        let (context_store, admin_store) = match &config.persistence {
            Persistence::Sqlite(path) => (
                ContextStore::open_or_memory(path),
                AdminConversationStore::open_or_memory(path),
            ),
            Persistence::Memory => (ContextStore::in_memory(), AdminConversationStore::in_memory()),
        };
        let context_store = Arc::new(context_store);
        let admin_store = Arc::new(admin_store);

        let embedder: Option<Arc<dyn Embedder>> = if config.embeddings_enabled && !config.uses_mock() {
            GeminiClient::from_config(&config)?.map(|client| Arc::new(GeminiEmbedder::new(client)) as Arc<dyn Embedder>)
        } else {
            None
        };
        let embeddings_enabled = embedder.is_some();

        let realtime = Arc::new(RealtimeSessions::new());
        let chat = Arc::new(UnifiedChatProvider::new(
            Arc::clone(&provider),
            Arc::clone(&context_store),
            Arc::clone(&admin_store),
            embedder,
            Arc::clone(&realtime),
            ChatSettings::from_config(&config),
        ));

        info!(
            "App initialised: provider={}, persistent={}, embeddings={}",
            provider.name(),
            context_store.is_persistent(),
            embeddings_enabled
        );

        Ok(Self {
            config,
            cache,
            recovery,
            provider,
            context_store,
            admin_store,
            realtime,
            chat,
            embeddings_enabled,
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: self.uptime_secs(),
            provider: self.provider.name(),
            persistent: self.context_store.is_persistent() && self.admin_store.is_persistent(),
            embeddings: self.embeddings_enabled,
            realtime_sessions: self.realtime.active(),
            cache: self.cache.stats(),
            recovery: self.recovery.stats(),
        }
    }

    /// Release in-memory state; live realtime streams are cancelled
    pub fn dispose(&self) {
        let cancelled = self.realtime.cancel_all();
        self.cache.clear();
        self.recovery.breaker().reset();
        info!("App disposed ({} realtime streams cancelled)", cancelled);
    }
}
