//! Configuration management

use anyhow::Result;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables checked, in order, for the Gemini API key
pub const API_KEY_VARS: &[&str] = &[
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "GOOGLE_GENERATIVE_AI_API_KEY",
    "NEXT_PUBLIC_GEMINI_API_KEY",
];

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Where conversation context and admin history are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    Sqlite(PathBuf),
    Memory,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (None = mock provider)
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub embedding_model: String,
    /// Force the mock provider even when a key is present
    pub mock_mode: bool,
    /// Delay between mock words
    pub mock_delay: Duration,
    pub embeddings_enabled: bool,
    pub vendor_timeout: Duration,

    pub max_output_tokens: u32,
    pub admin_max_output_tokens: u32,
    pub temperature: f32,
    /// Longest accepted user message, in characters
    pub max_message_chars: usize,

    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,

    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub circuit_failure_threshold: u32,
    pub circuit_timeout: Duration,

    pub bind_addr: IpAddr,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub log_requests: bool,

    pub persistence: Persistence,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: "gemini-1.5-flash".to_string(),
            embedding_model: "text-embedding-004".to_string(),
            mock_mode: false,
            mock_delay: Duration::from_millis(50),
            embeddings_enabled: true,
            vendor_timeout: Duration::from_secs(60),
            max_output_tokens: 2048,
            admin_max_output_tokens: 4096,
            temperature: 0.7,
            max_message_chars: 20_000,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 100,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(1000),
            circuit_failure_threshold: 5,
            circuit_timeout: Duration::from_secs(60),
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 3001,
            cors_origins: vec!["http://localhost:3000".to_string()],
            log_requests: true,
            persistence: Persistence::Memory,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let gemini_api_key = API_KEY_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty());

        let persistence = match std::env::var("CHAT_PERSISTENCE").as_deref() {
            Ok("memory") => Persistence::Memory,
            _ => Persistence::Sqlite(db_path_from_env()),
        };

        Ok(Self {
            gemini_api_key,
            gemini_base_url: std::env::var("GEMINI_BASE_URL")
                .unwrap_or(defaults.gemini_base_url),
            gemini_model: std::env::var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            embedding_model: std::env::var("GEMINI_EMBEDDING_MODEL")
                .unwrap_or(defaults.embedding_model),
            mock_mode: env_flag("CHAT_MOCK_MODE")
                .or_else(|| env_flag("ENABLE_GEMINI_MOCKING"))
                .unwrap_or(defaults.mock_mode),
            mock_delay: env_parse("CHAT_MOCK_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.mock_delay),
            embeddings_enabled: env_flag("CHAT_EMBEDDINGS_ENABLED")
                .unwrap_or(defaults.embeddings_enabled),
            vendor_timeout: env_parse("GEMINI_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.vendor_timeout),
            max_output_tokens: env_parse("GEMINI_MAX_OUTPUT_TOKENS")
                .unwrap_or(defaults.max_output_tokens),
            admin_max_output_tokens: env_parse("ADMIN_MAX_OUTPUT_TOKENS")
                .unwrap_or(defaults.admin_max_output_tokens),
            temperature: env_parse("GEMINI_TEMPERATURE").unwrap_or(defaults.temperature),
            max_message_chars: env_parse("CHAT_MAX_MESSAGE_CHARS")
                .unwrap_or(defaults.max_message_chars),
            cache_enabled: env_flag("CHAT_CACHE_ENABLED").unwrap_or(defaults.cache_enabled),
            cache_ttl: env_parse("CHAT_CACHE_TTL")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_max_entries: env_parse("CHAT_CACHE_MAX_ENTRIES")
                .unwrap_or(defaults.cache_max_entries),
            retry_max_attempts: env_parse("CHAT_RETRY_MAX_ATTEMPTS")
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay: env_parse("CHAT_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            circuit_failure_threshold: env_parse("CHAT_CIRCUIT_THRESHOLD")
                .unwrap_or(defaults.circuit_failure_threshold),
            circuit_timeout: env_parse("CHAT_CIRCUIT_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.circuit_timeout),
            bind_addr: env_parse("CHAT_BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: env_parse("CHAT_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CHAT_CORS_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.cors_origins),
            log_requests: env_flag("CHAT_LOG_REQUESTS").unwrap_or(defaults.log_requests),
            persistence,
        })
    }

    /// Whether chat requests go to the mock provider
    pub fn uses_mock(&self) -> bool {
        self.mock_mode || self.gemini_api_key.is_none()
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Config for tests: mock provider, no delays, in-memory stores
    pub fn for_tests() -> Self {
        Self {
            mock_delay: Duration::ZERO,
            retry_base_delay: Duration::from_millis(1),
            embeddings_enabled: false,
            log_requests: false,
            ..Default::default()
        }
    }
}

fn db_path_from_env() -> PathBuf {
    std::env::var("CHAT_DB_PATH")
        .map(|p| PathBuf::from(shellexpand::tilde(&p).into_owned()))
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("consultant-chat")
                .join("chat.db")
        })
}

fn env_flag(var: &str) -> Option<bool> {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}
