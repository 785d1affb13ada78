use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::EmbeddingCache;
use crate::retry::RetryPolicy;
use crate::upstream::{UpstreamError, check_status};

/// The external embedding API: one vector per input text, same order.
#[async_trait]
pub trait EmbeddingApi: Send + Sync {
    fn model(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding service unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: usize,
        #[source]
        source: UpstreamError,
    },
    #[error("embedding request rejected: {0}")]
    Rejected(#[source] UpstreamError),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
}

#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            model,
            client,
        }
    }
}

impl Default for EmbeddingClient {
    fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "nomic-embed-text".to_string(),
            Duration::from_secs(30),
        )
    }
}

#[async_trait]
impl EmbeddingApi for EmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        let url = format!("{}/api/embed", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self.client.post(&url).json(&request).send().await?;
        let response = check_status(response).await?;

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;

        Ok(embedding_response.embeddings)
    }
}

/// Batching, retrying, caching front of an `EmbeddingApi`.
#[derive(Clone)]
pub struct Embedder {
    api: Arc<dyn EmbeddingApi>,
    retry: RetryPolicy,
    batch_size: usize,
    dimension: Option<usize>,
    cache: Option<EmbeddingCache>,
}

impl Embedder {
    pub fn new(api: Arc<dyn EmbeddingApi>, retry: RetryPolicy) -> Self {
        Self {
            api,
            retry,
            batch_size: 32,
            dimension: None,
            cache: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Reject vectors whose length differs from `dimension`
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Embed `texts`; output[i] corresponds to texts[i]
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model = self.api.model().to_string();
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.as_ref().and_then(|c| c.get(&model, text)) {
                Some(vector) => results[i] = Some(vector),
                None => misses.push(i),
            }
        }

        debug!(
            total = texts.len(),
            cached = texts.len() - misses.len(),
            "Embedding texts"
        );

        for batch in misses.chunks(self.batch_size) {
            let inputs: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embed_with_retry(&inputs).await?;

            if vectors.len() != inputs.len() {
                return Err(EmbeddingError::Malformed(format!(
                    "expected {} vectors, got {}",
                    inputs.len(),
                    vectors.len()
                )));
            }

            for (&i, vector) in batch.iter().zip(vectors) {
                self.check_dimension(&vector)?;
                if let Some(cache) = &self.cache {
                    cache.set(&model, &texts[i], vector.clone());
                }
                results[i] = Some(vector);
            }
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| EmbeddingError::Malformed("missing vector in batch output".into()))
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty embedding output".into()))
    }

    async fn embed_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.retry
            .retry_if(
                "embed_batch",
                || self.api.embed_batch(inputs),
                UpstreamError::is_transient,
            )
            .await
            .map_err(|source| {
                if source.is_transient() {
                    EmbeddingError::Unavailable {
                        attempts: self.retry.max_attempts(),
                        source,
                    }
                } else {
                    EmbeddingError::Rejected(source)
                }
            })
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        match self.dimension {
            Some(expected) if expected != vector.len() => Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic bag-of-words embedder: each word hashes into one of `dim` buckets.
    pub struct HashEmbeddings {
        pub dim: usize,
        pub calls: AtomicUsize,
    }

    impl HashEmbeddings {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn vector(&self, text: &str) -> Vec<f32> {
            let mut v = vec![0.0; self.dim];
            for word in text.split_whitespace() {
                let digest = Sha256::digest(word.to_lowercase().as_bytes());
                v[digest[0] as usize % self.dim] += 1.0;
            }
            v
        }
    }

    #[async_trait]
    impl EmbeddingApi for HashEmbeddings {
        fn model(&self) -> &str {
            "hash"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector(t)).collect())
        }
    }

    /// Fails with `error` for the first `failures` calls.
    struct FlakyEmbeddings {
        failures: usize,
        error: UpstreamError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingApi for FlakyEmbeddings {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(self.error.clone());
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_preserves_order_across_batches() {
        let api = Arc::new(HashEmbeddings::new(8));
        let embedder = Embedder::new(api.clone(), RetryPolicy::new(0, 0, 0)).with_batch_size(2);
        let inputs = texts(&["alpha", "beta", "gamma delta", "epsilon", "zeta"]);

        let vectors = embedder.embed(&inputs).await.unwrap();

        assert_eq!(vectors.len(), 5);
        for (text, vector) in inputs.iter().zip(&vectors) {
            assert_eq!(vector, &api.vector(text));
        }
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_identical_text_identical_vector() {
        let api = Arc::new(HashEmbeddings::new(16));
        let embedder = Embedder::new(api, RetryPolicy::new(0, 0, 0));

        let a = embedder.embed_one("the same sentence").await.unwrap();
        let b = embedder.embed_one("the same sentence").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_cache_skips_upstream() {
        let api = Arc::new(HashEmbeddings::new(8));
        let embedder = Embedder::new(api.clone(), RetryPolicy::new(0, 0, 0))
            .with_cache(EmbeddingCache::new(100));

        embedder.embed_one("cached text").await.unwrap();
        embedder.embed_one("cached text").await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let api = Arc::new(FlakyEmbeddings {
            failures: 2,
            error: UpstreamError::Status {
                status: 503,
                message: "busy".into(),
            },
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(api.clone(), RetryPolicy::new(2, 0, 0));

        let vector = embedder.embed_one("abc").await.unwrap();
        assert_eq!(vector, vec![3.0, 1.0]);
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_unavailable() {
        let api = Arc::new(FlakyEmbeddings {
            failures: usize::MAX,
            error: UpstreamError::Timeout("slow".into()),
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(api.clone(), RetryPolicy::new(2, 0, 0));

        let err = embedder.embed_one("abc").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable { attempts: 3, .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let api = Arc::new(FlakyEmbeddings {
            failures: usize::MAX,
            error: UpstreamError::Status {
                status: 400,
                message: "bad model".into(),
            },
            calls: AtomicUsize::new(0),
        });
        let embedder = Embedder::new(api.clone(), RetryPolicy::new(2, 0, 0));

        let err = embedder.embed_one("abc").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Rejected(_)));
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let api = Arc::new(HashEmbeddings::new(4));
        let embedder = Embedder::new(api, RetryPolicy::new(0, 0, 0)).with_dimension(8);

        let err = embedder.embed_one("abc").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Dimension { expected: 8, actual: 4 }));
    }
}
