//! HTTP embedding provider implementation.
//!
//! Voyage and OpenAI expose the same `/v1/embeddings` wire format
//! (a JSON body with `model` + `input`, a `data[].embedding` response),
//! so a single client covers both; the factory in `mod.rs` picks the
//! endpoint and default model per provider name.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingProvider;

const VOYAGE_URL: &str = "https://api.voyageai.com/v1/embeddings";
const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";

const VOYAGE_DEFAULT_MODEL: &str = "voyage-3-lite";
const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedding client for Voyage/OpenAI-style `/v1/embeddings` endpoints.
///
/// Thread-safe and cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpEmbeddings {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl HttpEmbeddings {
    /// Create a client for the Voyage embeddings API.
    pub fn voyage(api_key: &str, model: Option<&str>, dimensions: usize) -> Self {
        Self::new(
            VOYAGE_URL,
            model.unwrap_or(VOYAGE_DEFAULT_MODEL),
            api_key,
            dimensions,
        )
    }

    /// Create a client for the OpenAI embeddings API.
    pub fn openai(api_key: &str, model: Option<&str>, dimensions: usize) -> Self {
        Self::new(
            OPENAI_URL,
            model.unwrap_or(OPENAI_DEFAULT_MODEL),
            api_key,
            dimensions,
        )
    }

    /// Create a client against an explicit endpoint (used by tests to
    /// point at a local mock server).
    pub fn new(url: &str, model: &str, api_key: &str, dimensions: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            dimensions,
        }
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: self.model.clone(),
            input,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to connect to embedding API at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API returned {} — {}", status.as_u16(), text);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding API response")?;

        // Sort by index to ensure correct ordering
        let mut data = resp.data;
        data.sort_by_key(|d| d.index);

        let embeddings: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        for (i, emb) in embeddings.iter().enumerate() {
            if emb.len() != self.dimensions {
                anyhow::bail!(
                    "Embedding dimension mismatch at index {}: expected {}, got {} (model: {})",
                    i,
                    self.dimensions,
                    emb.len(),
                    self.model
                );
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_embeddings(vec![text.to_string()]).await?;

        embeddings
            .into_iter()
            .next()
            .context("Embedding API returned empty response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Voyage caps request size; chunk large batches
        const BATCH_SIZE: usize = 50;
        let mut all = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let mut embeddings = self.request_embeddings(chunk.to_vec()).await?;
            all.append(&mut embeddings);
        }

        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedding_body(vectors: &[Vec<f32>]) -> serde_json::Value {
        let data: Vec<serde_json::Value> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| serde_json::json!({ "embedding": v, "index": i }))
            .collect();
        serde_json::json!({ "data": data })
    }

    #[tokio::test]
    async fn test_embed_single_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(embedding_body(&[vec![0.1, 0.2, 0.3]])),
            )
            .mount(&server)
            .await;

        let provider = HttpEmbeddings::new(
            &format!("{}/v1/embeddings", server.uri()),
            "voyage-3-lite",
            "test-key",
            3,
        );

        let embedding = provider.embed("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_batch_preserves_order() {
        let server = MockServer::start().await;
        // Response deliberately out of order; the client re-sorts by index
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "embedding": [2.0, 2.0], "index": 1 },
                    { "embedding": [1.0, 1.0], "index": 0 },
                ]
            })))
            .mount(&server)
            .await;

        let provider = HttpEmbeddings::new(
            &format!("{}/v1/embeddings", server.uri()),
            "voyage-3-lite",
            "test-key",
            2,
        );

        let batch = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(batch, vec![vec![1.0, 1.0], vec![2.0, 2.0]]);
    }

    #[tokio::test]
    async fn test_embed_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.1, 0.2]])),
            )
            .mount(&server)
            .await;

        let provider = HttpEmbeddings::new(
            &format!("{}/v1/embeddings", server.uri()),
            "voyage-3-lite",
            "test-key",
            3,
        );

        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("dimension mismatch"));
    }

    #[tokio::test]
    async fn test_embed_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let provider = HttpEmbeddings::new(
            &format!("{}/v1/embeddings", server.uri()),
            "voyage-3-lite",
            "bad-key",
            3,
        );

        let err = provider.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_request() {
        // No mock server at all — an empty batch must not hit the network
        let provider = HttpEmbeddings::new("http://127.0.0.1:1/v1/embeddings", "m", "k", 3);
        let batch = provider.embed_batch(&[]).await.unwrap();
        assert!(batch.is_empty());
    }
}
