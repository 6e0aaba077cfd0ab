//! Vector Embeddings
//!
//! Best-effort embeddings for admin conversation turns via Gemini
//! `embedContent`. Includes a moka cache for repeated texts so that replayed
//! admin questions don't hit the API twice.

use crate::gemini::GeminiClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

/// Longest text sent for embedding, in characters
const MAX_EMBED_CHARS: usize = 8000;

/// Something that turns text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Gemini embedder with a query cache
pub struct GeminiEmbedder {
    client: GeminiClient,
    /// Cache for embeddings (max 1000 entries, 1 hour TTL)
    cache: Cache<String, Vec<f32>>,
}

impl GeminiEmbedder {
    pub fn new(client: GeminiClient) -> Self {
        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Self {
            client,
            cache,
        }
    }

    fn cache_key(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = crate::message::char_prefix(text.trim(), MAX_EMBED_CHARS);
        if text.is_empty() {
            anyhow::bail!("Cannot embed empty text");
        }

        let key = Self::cache_key(text);
        if let Some(cached) = self.cache.get(&key).await {
            debug!("Embedding cache HIT");
            return Ok(cached);
        }

        let embedding = self
            .client
            .embed_content(text)
            .await
            .context("Gemini embedContent failed")?;

        debug!("Embedded {} chars into {} dims", text.len(), embedding.len());
        self.cache.insert(key, embedding.clone()).await;
        Ok(embedding)
    }
}

/// Serialize embedding to little-endian bytes for BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from BLOB storage
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes() {
        let embedding = vec![0.5f32, -1.25, 3.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(embedding_from_bytes(&bytes), embedding);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = embedding_to_bytes(&[1.0]);
        bytes.push(0xff);
        assert_eq!(embedding_from_bytes(&bytes), vec![1.0]);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let client = GeminiClient::new("key", "http://127.0.0.1:9", "m", "e", Duration::from_secs(1)).unwrap();
        let embedder = GeminiEmbedder::new(client);
        assert!(embedder.embed("   ").await.is_err());
        assert_eq!(embedder.cache.entry_count(), 0);
    }
}
