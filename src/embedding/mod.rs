//! Embedding generation
//!
//! One embedding provider per process. The OpenAI client talks to any
//! OpenAI-compatible endpoint; tests inject a deterministic mock through
//! the `Embedder` trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RecallError, Result};

/// Retry schedule for embedder calls: two retries with backoff
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(2)];

/// Per-request deadline; in-flight I/O is abandoned past this
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embeddings for a batch of texts, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| RecallError::External("embedder returned no vectors".to_string()))
    }

    /// Embedding dimensions
    fn dimensions(&self) -> usize;

    /// Model name
    fn model_name(&self) -> &str;
}

/// OpenAI embeddings client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        // text-embedding-3-large is 3072-dim; -small and ada-002 are 1536
        let dimensions = if model.contains("3-large") { 3072 } else { 1536 };
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            dimensions,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": texts,
                "model": self.model,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::External(format!(
                "embeddings API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let embeddings: Vec<Vec<f32>> = data["data"]
            .as_array()
            .ok_or_else(|| RecallError::External("invalid embeddings response".to_string()))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        if embeddings.len() != texts.len() {
            return Err(RecallError::External(format!(
                "embeddings API returned {} vectors for {} inputs",
                embeddings.len(),
                texts.len()
            )));
        }

        Ok(embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embed a batch with up to two retries on failure
pub async fn embed_with_retry(
    embedder: &Arc<dyn Embedder>,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let mut last_err = None;
    for attempt in 0..=RETRY_BACKOFF.len() {
        if attempt > 0 {
            tokio::time::sleep(RETRY_BACKOFF[attempt - 1]).await;
        }
        match embedder.embed_batch(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "embedder batch failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| RecallError::External("embedder failed".to_string())))
}

/// Cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_mismatched_or_zero() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_cosine_clamped() {
        // Accumulated float error can nudge past 1.0; the clamp holds it
        let a = vec![0.123_f32; 512];
        let sim = cosine_similarity(&a, &a);
        assert!(sim <= 1.0 && sim > 0.999);
    }
}
