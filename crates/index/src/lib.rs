//! Embedding and vector storage for retrieved chunks.

pub mod cache;
pub mod embeddings;
pub mod memory_index;
pub mod qdrant_index;
pub mod retry;
pub mod upstream;
pub mod vector;

pub use cache::EmbeddingCache;
pub use embeddings::{Embedder, EmbeddingApi, EmbeddingClient, EmbeddingError};
pub use memory_index::InMemoryIndex;
pub use qdrant_index::QdrantIndexer;
pub use retry::{RetryConfig, RetryPolicy};
pub use upstream::UpstreamError;
pub use vector::{
    EmbeddedChunk, IndexError, ScoredChunk, VectorBackend, VectorIndex, VectorIndexStatus,
    cosine_similarity,
};
