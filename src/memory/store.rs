//! In-memory implementation of the [`Memory`] trait.
//!
//! [`InMemoryStore`] keeps all entries in a `RwLock<HashMap>` and performs
//! hybrid retrieval: 70 % vector similarity + 30 % keyword frequency.
//!
//! This implementation is suitable for development, testing, and lightweight
//! production use.  For large-scale persistent storage, a future
//! `SqliteMemory` implementation can replace this behind the same trait.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    embeddings::{EmbeddingProvider, MockEmbeddingProvider, cosine_similarity},
    traits::{Memory, MemoryCategory, MemoryEntry},
};

// ─── InternalEntry ───────────────────────────────────────────────────────────

/// Storage unit: a [`MemoryEntry`] plus its pre-computed embedding.
struct InternalEntry {
    entry: MemoryEntry,
    embedding: Vec<f32>,
}

// ─── InMemoryStore ───────────────────────────────────────────────────────────

/// HashMap-backed, thread-safe memory store.
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, InternalEntry>>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
}

impl InMemoryStore {
    /// Create a store backed by the given embedding provider.
    pub fn new(embedding_provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            embedding_provider,
        }
    }

    /// Convenience constructor using the [`MockEmbeddingProvider`] (no external API calls).
    pub fn new_mock() -> Self {
        Self::new(Arc::new(MockEmbeddingProvider::new()))
    }
}

// ─── Memory implementation ────────────────────────────────────────────────────

#[async_trait]
impl Memory for InMemoryStore {
    async fn store(
        &self,
        key: &str,
        content: &str,
        category: MemoryCategory,
    ) -> Result<(), String> {
        let embedding = self.embedding_provider.embed(content).await?;
        let now = Utc::now().to_rfc3339();

        let mut entries = self.entries.write().map_err(|e| e.to_string())?;

        let entry = if let Some(existing) = entries.get(key) {
            // Overwrite — preserve id and created_at.
            MemoryEntry {
                id: existing.entry.id.clone(),
                key: key.to_owned(),
                content: content.to_owned(),
                category,
                score: 0.0,
                created_at: existing.entry.created_at.clone(),
                updated_at: now,
            }
        } else {
            MemoryEntry {
                id: Uuid::new_v4().to_string(),
                key: key.to_owned(),
                content: content.to_owned(),
                category,
                score: 0.0,
                created_at: now.clone(),
                updated_at: now,
            }
        };

        entries.insert(
            key.to_owned(),
            InternalEntry { entry, embedding },
        );
        Ok(())
    }

    async fn recall(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, String> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedding_provider.embed(query).await?;
        let query_words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();

        let entries = self.entries.read().map_err(|e| e.to_string())?;

        let mut scored: Vec<MemoryEntry> = entries
            .values()
            .map(|ie| {
                let vector_score = cosine_similarity(&query_embedding, &ie.embedding);
                let bm25_score = keyword_score(query_words.as_slice(), &ie.entry.content);
                let final_score = 0.7 * vector_score + 0.3 * bm25_score;
                let mut e = ie.entry.clone();
                e.score = final_score;
                e
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn forget(&self, key: &str) -> Result<bool, String> {
        let mut entries = self.entries.write().map_err(|e| e.to_string())?;
        Ok(entries.remove(key).is_some())
    }

    async fn store_daily(&self, content: &str) -> Result<(), String> {
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let key = format!("daily:{date}");

        let existing = {
            let entries = self.entries.read().map_err(|e| e.to_string())?;
            entries.get(&key).map(|ie| ie.entry.content.clone())
        };

        // Append to existing daily entry (separated by newlines).
        let full_content = match existing {
            Some(prev) if !prev.is_empty() => format!("{prev}\n\n{content}"),
            _ => content.to_owned(),
        };

        self.store(&key, &full_content, MemoryCategory::Daily).await
    }

    async fn recall_daily(&self, date: &str) -> Result<Option<String>, String> {
        let key = format!("daily:{date}");
        let entries = self.entries.read().map_err(|e| e.to_string())?;
        Ok(entries.get(&key).map(|ie| ie.entry.content.clone()))
    }
}

// ─── keyword_score ───────────────────────────────────────────────────────────

/// Simple normalised term-frequency score: fraction of query words that appear
/// in `content` (case-insensitive).  Returns a value in `[0, 1]`.
fn keyword_score(query_words: &[String], content: &str) -> f32 {
    if query_words.is_empty() {
        return 0.0;
    }
    let content_lower = content.to_lowercase();
    let matches = query_words
        .iter()
        .filter(|w| content_lower.contains(w.as_str()))
        .count();
    matches as f32 / query_words.len() as f32
}

// ─── Tests ───────────────────────────────────────────────────────────────────
