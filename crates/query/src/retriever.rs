use index::{Embedder, EmbeddingError, IndexError, ScoredChunk, VectorIndex};
use ingest::Chunk;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error("top_k must be at least 1")]
    InvalidTopK,
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Query text in, most similar chunks out.
#[derive(Clone)]
pub struct Retriever {
    embedder: Embedder,
    index: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<Chunk>, RetrieveError> {
        Ok(self
            .retrieve_scored(query, top_k)
            .await?
            .into_iter()
            .map(|scored| scored.chunk)
            .collect())
    }

    /// Like `retrieve`, keeping similarity scores for attribution
    pub async fn retrieve_scored(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>, RetrieveError> {
        if top_k == 0 {
            return Err(RetrieveError::InvalidTopK);
        }

        let vector = self.embedder.embed_one(query).await?;
        let results = self.index.query(&vector, top_k).await?;

        debug!(
            top_k = top_k,
            retrieved = results.len(),
            best_score = results.first().map(|r| r.score),
            "Retrieved chunks"
        );
        Ok(results)
    }
}
