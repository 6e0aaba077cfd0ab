//! Response Cache
//!
//! Short-lived cache of full vendor responses keyed by the tail of the
//! conversation. The key is a cheap near-duplicate detector, not a
//! collision-resistant fingerprint of the whole conversation.

use crate::message::{char_prefix, ChatMessage};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Messages from the end of the conversation that feed the key
const KEY_MESSAGES: usize = 3;
/// Characters taken from each message
const KEY_PREFIX_CHARS: usize = 100;

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// TTL map from conversation-tail hash to response text
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    max_entries: usize,
    default_ttl: Duration,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    /// Create new cache
    ///
    /// `max_entries` only triggers the expiry sweep; live entries are never
    /// evicted for size.
    pub fn new(max_entries: usize, default_ttl: Duration, enabled: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries,
            default_ttl,
            enabled,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Compute cache key from a scope and the last three messages
    ///
    /// Key = SHA256(scope + role + first 100 chars, for each of the last 3 messages).
    /// `scope` separates replies produced under different personas or session
    /// context; pass the same scope for turns that may share an answer.
    pub fn compute_key(messages: &[ChatMessage], scope: &str) -> String {
        let start = messages.len().saturating_sub(KEY_MESSAGES);
        let mut hasher = Sha256::new();

        hasher.update(Sha256::digest(scope.as_bytes()));
        hasher.update(b"\n");

        for msg in &messages[start..] {
            hasher.update(msg.role.as_str().as_bytes());
            hasher.update(b":");
            hasher.update(char_prefix(&msg.content, KEY_PREFIX_CHARS).as_bytes());
            hasher.update(b"\n");
        }

        hex::encode(hasher.finalize())
    }

    /// Get cached response, evicting it if expired
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();

        let hit = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                debug!("Cache EXPIRED: {}", short(key));
                None
            }
            Some(entry) => Some(entry.response.clone()),
            None => None,
        };
        drop(entries);

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache HIT: {}", short(key));
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Cache MISS: {}", short(key));
        }
        hit
    }

    /// Store response with the default TTL
    pub fn set(&self, key: &str, response: impl Into<String>) {
        self.set_with_ttl(key, response, self.default_ttl);
    }

    /// Store response with an explicit TTL
    pub fn set_with_ttl(&self, key: &str, response: impl Into<String>, ttl: Duration) {
        if !self.enabled {
            return;
        }

        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                response: response.into(),
                stored_at: Instant::now(),
                ttl,
            },
        );

        if entries.len() > self.max_entries {
            let now = Instant::now();
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            debug!("Cache sweep removed {} expired entries", before - entries.len());
        }
        drop(entries);

        debug!("Cache SET: {}", short(key));
    }

    /// Number of stored entries, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            entries: self.len(),
            hits,
            misses,
            hit_rate_percent: if total > 0 {
                (hits as f64 / total as f64) * 100.0
            } else {
                0.0
            },
        }
    }

    /// Drop one entry; true if it was present
    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    /// Clear all entries
    pub fn clear(&self) {
        self.entries.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

fn short(key: &str) -> &str {
    &key[..key.len().min(16)]
}
