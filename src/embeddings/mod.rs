//! Embedding generation for semantic retrieval.
//!
//! The knowledge store is polymorphic over the [`EmbeddingProvider`]
//! capability; the concrete backend is selected once at startup from
//! configuration. Vectors from different providers/models are not
//! comparable, so the store assumes a single provider and dimensionality
//! for its lifetime.
//!
//! Architecture follows the trait + impl + mock pattern:
//! - `EmbeddingProvider` trait: async interface for embedding generation
//! - `HttpEmbeddings`: real implementation for the Voyage and OpenAI
//!   `/v1/embeddings` endpoints (same wire format)
//! - `MockEmbeddings`: deterministic mock for tests

pub mod codec;
pub mod mock;
pub mod provider;

pub use mock::MockEmbeddings;
pub use provider::HttpEmbeddings;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::KnowledgeConfig;

/// Abstract interface for generating vector embeddings from text.
///
/// Implementations must be thread-safe (`Send + Sync`) to be shared
/// via `Arc<dyn EmbeddingProvider>`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate a vector embedding for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// Returns one embedding per input text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// The dimensionality of the vectors produced by this provider.
    ///
    /// Fixed for a given model; the knowledge store pins this value at
    /// construction and rejects vectors of any other length.
    fn dimensions(&self) -> usize;
}

/// Build the configured embedding provider.
///
/// An unknown provider name fails here, at startup, not at first use.
pub fn provider_from_config(config: &KnowledgeConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "voyage" => Ok(Arc::new(HttpEmbeddings::voyage(
            &config.api_key,
            config.model.as_deref(),
            config.dimension,
        ))),
        "openai" => Ok(Arc::new(HttpEmbeddings::openai(
            &config.api_key,
            config.model.as_deref(),
            config.dimension,
        ))),
        other => bail!("unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(provider: &str) -> KnowledgeConfig {
        KnowledgeConfig {
            provider: provider.to_string(),
            api_key: "test-key".to_string(),
            model: None,
            dimension: 8,
        }
    }

    #[test]
    fn test_factory_builds_known_providers() {
        assert!(provider_from_config(&config_for("voyage")).is_ok());
        assert!(provider_from_config(&config_for("openai")).is_ok());
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let err = provider_from_config(&config_for("cohere")).err().unwrap();
        assert!(err.to_string().contains("unknown embedding provider"));
    }
}
