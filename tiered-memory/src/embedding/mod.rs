//! Embedding module for semantic scoring
//!
//! Semantic similarity is a pluggable strategy: anything implementing
//! [`Embedder`] can back the engine. [`HashingEmbedder`] is the default.

mod engine;
mod hashing;

pub use engine::{cosine_similarity, EmbeddingEngine};
pub use hashing::{HashingEmbedder, DEFAULT_DIMENSION};

use crate::error::Result;

/// Turns text into a fixed-width vector
pub trait Embedder: Send + Sync {
    /// Width of every vector this embedder produces
    fn dimension(&self) -> usize;

    /// Embed a single text
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}
