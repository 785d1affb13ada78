use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Content-addressed embedding cache shared by every `Embedder` clone.
#[derive(Clone)]
pub struct EmbeddingCache {
    embeddings: Arc<DashMap<String, Vec<f32>>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            embeddings: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn set(&self, model: &str, text: &str, embedding: Vec<f32>) {
        if self.max_entries == 0 {
            return;
        }
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take((self.max_entries / 4).max(1))
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        let key = Self::key(model, text);
        self.embeddings.insert(key, embedding);
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(model, text);
        self.embeddings.get(&key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    fn key(model: &str, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}
