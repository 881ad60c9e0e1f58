use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Source of embedding vectors for descriptor and query text.
///
/// The remote implementation talks to an Ollama-style embeddings endpoint;
/// the hash implementation is deterministic and offline, used in tests and
/// degraded operation.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn mode_id(&self) -> &'static str;
}

/// Remote embedding client (Ollama `/api/embeddings`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VectorStoreError::ServiceUnavailable(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    async fn request(&self, text: &str) -> std::result::Result<Vec<f32>, RequestFailure> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(RequestFailure::transport)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RequestFailure::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(RequestFailure::Fatal(format!("HTTP {status}")));
        }

        let body: EmbeddingsResponse = response
            .json()
            .await
            .map_err(|e| RequestFailure::Malformed(e.to_string()))?;
        if body.embedding.is_empty() {
            return Err(RequestFailure::Malformed("empty embedding".to_string()));
        }
        Ok(body.embedding)
    }
}

enum RequestFailure {
    /// Worth one retry: timeouts, connection errors, 5xx.
    Transient(String),
    /// Not retried: 4xx and similar.
    Fatal(String),
    /// Not retried: the service answered but the payload is unusable.
    Malformed(String),
}

impl RequestFailure {
    fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        // One retry for transient transport failures, none for malformed
        // responses.
        match self.request(text).await {
            Ok(vector) => Ok(vector),
            Err(RequestFailure::Transient(first)) => {
                log::warn!("Embedding request failed ({first}), retrying once");
                match self.request(text).await {
                    Ok(vector) => Ok(vector),
                    Err(RequestFailure::Malformed(reason)) => {
                        Err(VectorStoreError::MalformedResponse(reason))
                    }
                    Err(RequestFailure::Transient(reason)) | Err(RequestFailure::Fatal(reason)) => {
                        Err(VectorStoreError::ServiceUnavailable(reason))
                    }
                }
            }
            Err(RequestFailure::Fatal(reason)) => Err(VectorStoreError::ServiceUnavailable(reason)),
            Err(RequestFailure::Malformed(reason)) => {
                Err(VectorStoreError::MalformedResponse(reason))
            }
        }
    }

    fn mode_id(&self) -> &'static str {
        "http"
    }
}

/// Deterministic hashed bag-of-words embedder.
///
/// Each lowercased alphanumeric token is hashed into a bucket; the bucket
/// counts are L2-normalized. Texts sharing tokens get proportionally higher
/// cosine similarity, which is all the routing tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let bucket = (fnv1a_64(token.as_bytes()) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn mode_id(&self) -> &'static str {
        "hash"
    }
}

pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
