//! Embedding client abstraction and the HTTP implementation.
//!
//! Defines the [`Embedder`] trait that turns text into fixed-dimension
//! vectors, plus [`HttpEmbedder`], a client for OpenAI-compatible
//! `POST /embeddings` endpoints with batching, retry, and backoff.
//!
//! Also provides [`cosine_similarity`] and [`similarity_score`], the
//! similarity measures used by the vector index.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Network errors and timeouts → retry
//! - HTTP 401/403 and other 4xx → fail immediately as a provider error
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Retries are bounded by `max_retries`; once exhausted, the last transient
//! error surfaces to the caller, which may apply its own retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, EngineResult};

/// Turns batches of text into embedding vectors.
///
/// Implementations are stateless from the caller's perspective and safe for
/// unsynchronized concurrent use. `embed` is order-preserving: one vector
/// per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>>;

    /// Vector dimensionality this embedder produces.
    fn dims(&self) -> usize;

    /// Model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`Embedder::embed`] for query-side use.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> EngineResult<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::provider("empty embedding response"))
}

/// Embedding client for OpenAI-compatible endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
}

impl HttpEmbedder {
    /// Build a client from configuration.
    ///
    /// Fails with a provider error if the configured API-key environment
    /// variable is not set.
    pub fn new(config: &EmbeddingConfig) -> EngineResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EngineError::provider(format!("{} environment variable not set", config.api_key_env))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);

        let mut last_err = EngineError::transient("embedding request was never attempted");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbeddingsResponse = response.json().await.map_err(|e| {
                            EngineError::provider(format!("invalid embeddings response: {e}"))
                        })?;
                        return extract_vectors(parsed, texts.len(), self.dims);
                    }

                    let detail = response.text().await.unwrap_or_default();
                    match classify_status(status, &detail) {
                        err @ EngineError::Transient(_) => last_err = err,
                        err => return Err(err),
                    }
                }
                Err(e) => {
                    last_err = EngineError::transient(format!("embedding request failed: {e}"));
                }
            }
        }

        Err(last_err)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> EngineResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Map an HTTP error status onto the engine taxonomy.
///
/// 429 and 5xx are transient (retried); everything else is a provider
/// error the client will not retry.
fn classify_status(status: StatusCode, detail: &str) -> EngineError {
    if status.as_u16() == 429 || status.is_server_error() {
        EngineError::transient(format!("embedding API error {status}: {detail}"))
    } else {
        EngineError::provider(format!("embedding API error {status}: {detail}"))
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Order the response items by index and validate count and dimensionality.
fn extract_vectors(
    mut response: EmbeddingsResponse,
    expected_count: usize,
    expected_dims: usize,
) -> EngineResult<Vec<Vec<f32>>> {
    if response.data.len() != expected_count {
        return Err(EngineError::provider(format!(
            "embedding count mismatch: got {}, expected {}",
            response.data.len(),
            expected_count
        )));
    }

    response.data.sort_by_key(|item| item.index);

    for item in &response.data {
        if item.embedding.len() != expected_dims {
            return Err(EngineError::provider(format!(
                "embedding dimension mismatch: got {}, expected {}",
                item.embedding.len(),
                expected_dims
            )));
        }
    }

    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine similarity clamped to the `[0.0, 1.0]` score range used for
/// relevance thresholds. Negative cosine means "unrelated or worse" and
/// maps to 0.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).max(0.0)
}
