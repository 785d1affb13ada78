use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::vector::{EmbeddedChunk, IndexError, ScoredChunk, VectorBackend, cosine_similarity};

/// Exact linear-scan index held in process memory.
///
/// Entries keep the slot of their first insertion, so replacing a chunk
/// does not change its tie-break position.
#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    entries: Vec<EmbeddedChunk>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, chunk_id: &str) -> Option<EmbeddedChunk> {
        let state = self.state.read().await;
        state
            .positions
            .get(chunk_id)
            .map(|&pos| state.entries[pos].clone())
    }
}

#[async_trait]
impl VectorBackend for InMemoryIndex {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn upsert(&self, entry: &EmbeddedChunk) -> Result<(), IndexError> {
        let mut state = self.state.write().await;

        match state.dimension {
            Some(expected) if expected != entry.vector.len() => {
                return Err(IndexError::Dimension {
                    expected,
                    actual: entry.vector.len(),
                });
            }
            None => state.dimension = Some(entry.vector.len()),
            _ => {}
        }

        match state.positions.get(&entry.chunk.chunk_id).copied() {
            Some(pos) => state.entries[pos] = entry.clone(),
            None => {
                let pos = state.entries.len();
                state.positions.insert(entry.chunk.chunk_id.clone(), pos);
                state.entries.push(entry.clone());
            }
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        let state = self.state.read().await;
        if let Some(expected) = state.dimension {
            if expected != vector.len() {
                return Err(IndexError::Dimension {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (pos, cosine_similarity(vector, &entry.vector)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| ScoredChunk {
                chunk: state.entries[pos].chunk.clone(),
                score,
            })
            .collect())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
