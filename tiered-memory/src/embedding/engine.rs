//! Embedding engine
//!
//! High-level API for generating and caching embeddings.

use std::sync::Arc;

use dashmap::DashMap;

use super::{Embedder, HashingEmbedder};
use crate::error::Result;
use crate::record::{MemoryId, MemoryRecord};

/// Query strings cached before the query cache is reset
const QUERY_CACHE_LIMIT: usize = 1024;

/// Embedding engine with caching
///
/// Wraps a pluggable [`Embedder`] with DashMap caches: one for query text,
/// one per record id. Record entries must be evicted whenever the record's
/// content changes or the record is deleted.
pub struct EmbeddingEngine {
    embedder: Arc<dyn Embedder>,
    query_cache: DashMap<String, Vec<f32>>,
    record_cache: DashMap<MemoryId, Vec<f32>>,
}

impl EmbeddingEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        log::debug!("EmbeddingEngine ready ({}d)", embedder.dimension());
        Self {
            embedder,
            query_cache: DashMap::new(),
            record_cache: DashMap::new(),
        }
    }

    /// Embed free text (query side) with caching
    pub fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.query_cache.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.embedder.embed(text)?;
        if self.query_cache.len() >= QUERY_CACHE_LIMIT {
            self.query_cache.clear();
        }
        self.query_cache.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Embedding for a record: the stored vector if present, otherwise one
    /// computed from the searchable text and cached by id
    pub fn embedding_for(&self, record: &MemoryRecord) -> Result<Vec<f32>> {
        if let Some(stored) = &record.embedding {
            return Ok(stored.clone());
        }
        if let Some(cached) = self.record_cache.get(&record.id) {
            return Ok(cached.clone());
        }

        let embedding = self.embedder.embed(&record.searchable_text())?;
        self.record_cache.insert(record.id, embedding.clone());
        Ok(embedding)
    }

    /// Drop the cached embedding for a record
    pub fn evict(&self, id: &MemoryId) {
        self.record_cache.remove(id);
    }

    /// Get embedding dimension
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Number of cached record embeddings
    pub fn cache_size(&self) -> usize {
        self.record_cache.len()
    }

    /// Whether a record's embedding is cached
    pub fn is_cached(&self, id: &MemoryId) -> bool {
        self.record_cache.contains_key(id)
    }

    /// Clear both caches
    pub fn clear_cache(&self) {
        self.query_cache.clear();
        self.record_cache.clear();
    }
}

impl Default for EmbeddingEngine {
    fn default() -> Self {
        Self::new(Arc::new(HashingEmbedder::default()))
    }
}

impl std::fmt::Debug for EmbeddingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingEngine")
            .field("dimension", &self.dimension())
            .field("cached_records", &self.record_cache.len())
            .finish()
    }
}

/// Cosine similarity between two embeddings, in [-1, 1]
///
/// Mismatched lengths and zero vectors score 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemoryDraft, MemoryTier};
    use chrono::Utc;

    #[test]
    fn test_cosine_similarity() {
        let a = [1.0_f32, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_similarity_orthogonal() {
        let a = [1.0_f32, 0.0, 0.0];
        let b = [0.0_f32, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = [0.3_f32, -0.2, 0.9];
        let b = [0.1_f32, 0.7, -0.4];
        assert_eq!(cosine_similarity(&a, &b), cosine_similarity(&b, &a));
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
    }

    #[test]
    fn test_record_cache_and_eviction() {
        let engine = EmbeddingEngine::default();
        let record = MemoryRecord::from_draft(
            MemoryDraft::new(MemoryTier::Semantic, "cached content"),
            None,
            Utc::now(),
        );

        let first = engine.embedding_for(&record).unwrap();
        assert!(engine.is_cached(&record.id));
        assert_eq!(engine.embedding_for(&record).unwrap(), first);

        engine.evict(&record.id);
        assert!(!engine.is_cached(&record.id));
    }

    #[test]
    fn test_stored_embedding_wins() {
        let engine = EmbeddingEngine::default();
        let mut draft = MemoryDraft::new(MemoryTier::Semantic, "vector payload");
        draft.embedding = Some(vec![0.5, 0.5]);
        let record = MemoryRecord::from_draft(draft, None, Utc::now());

        assert_eq!(engine.embedding_for(&record).unwrap(), vec![0.5, 0.5]);
        assert_eq!(engine.cache_size(), 0);
    }
}
