//! Mock embedding provider for tests.
//!
//! Produces deterministic embeddings from text hashes, ensuring:
//! - Same text → same embedding (reproducible tests)
//! - Different texts → different embeddings (dedup/search tests work)
//! - Optional preset vectors for exact-similarity scenarios

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use anyhow::Result;
use async_trait::async_trait;

use super::EmbeddingProvider;

/// Deterministic mock embedding provider for tests.
///
/// Generates embeddings by hashing the input text and spreading the hash
/// across the configured number of dimensions, L2-normalized. Specific
/// texts can be given preset vectors with [`with_vector`](Self::with_vector)
/// so similarity tests control the exact scores they assert on.
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddings {
    dimensions: usize,
    presets: HashMap<String, Vec<f32>>,
}

impl MockEmbeddings {
    /// Create a mock provider with the given embedding dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            presets: HashMap::new(),
        }
    }

    /// Register a fixed vector to return for an exact text.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.presets.insert(text.to_string(), vector);
        self
    }

    /// Deterministic embedding via chained hashing, L2-normalized.
    fn hash_to_embedding(&self, text: &str) -> Vec<f32> {
        if let Some(preset) = self.presets.get(text) {
            return preset.clone();
        }

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut hash = hasher.finish();

        let mut embedding = Vec::with_capacity(self.dimensions);
        for _ in 0..self.dimensions {
            let value = (hash as f64 / u64::MAX as f64) * 2.0 - 1.0;
            embedding.push(value as f32);

            let mut h = DefaultHasher::new();
            hash.hash(&mut h);
            hash = h.finish();
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.hash_to_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.hash_to_embedding(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
