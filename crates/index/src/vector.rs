//! Vector index contract and the fallback-aware facade in front of it.
//!
//! `VectorIndex` probes the external backend once per operation. While the
//! external service is unreachable every call is served by the in-process
//! `InMemoryIndex`, which mirrors all writes made by this process. Chunks
//! written during an outage are backfilled into the external index on the
//! first operation that finds it healthy again.

use async_trait::async_trait;
use ingest::Chunk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::memory_index::InMemoryIndex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("vector backend unavailable: {0}")]
    Unavailable(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("vector backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Add or replace by `chunk_id`
    async fn upsert(&self, entry: &EmbeddedChunk) -> Result<(), IndexError>;

    /// Up to `k` entries by descending cosine similarity, earlier insertion wins ties
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;

    async fn is_available(&self) -> bool;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

pub struct VectorIndex {
    remote: Option<Arc<dyn VectorBackend>>,
    local: InMemoryIndex,
    degraded: AtomicBool,
    degradations: AtomicUsize,
    pending: Mutex<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorIndexStatus {
    pub backend: String,
    pub remote_available: bool,
    pub local_entries: usize,
    pub pending_backfill: usize,
    pub degradations: usize,
}

impl VectorIndex {
    pub fn new(remote: Arc<dyn VectorBackend>) -> Self {
        Self::build(Some(remote))
    }

    /// No external service configured: every call goes to the in-process index
    pub fn in_process() -> Self {
        Self::build(None)
    }

    fn build(remote: Option<Arc<dyn VectorBackend>>) -> Self {
        Self {
            remote,
            local: InMemoryIndex::new(),
            degraded: AtomicBool::new(false),
            degradations: AtomicUsize::new(0),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// A write the external index rejects outright (as opposed to being
    /// unreachable) is returned as an error and not mirrored locally.
    pub async fn upsert(&self, entry: &EmbeddedChunk) -> Result<(), IndexError> {
        let Some(remote) = self.select().await else {
            self.local.upsert(entry).await?;
            self.track_pending(&entry.chunk.chunk_id).await;
            return Ok(());
        };

        match remote.upsert(entry).await {
            Ok(()) => self.local.upsert(entry).await,
            Err(IndexError::Unavailable(reason)) => {
                self.mark_degraded(remote.name(), &reason);
                self.local.upsert(entry).await?;
                self.track_pending(&entry.chunk.chunk_id).await;
                Ok(())
            }
            Err(e) => {
                warn!(
                    backend = remote.name(),
                    chunk_id = %entry.chunk.chunk_id,
                    error = %e,
                    "Vector backend rejected chunk"
                );
                Err(e)
            }
        }
    }

    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        if let Some(remote) = self.select().await {
            match remote.query(vector, k).await {
                Ok(results) => return Ok(results),
                Err(e) => self.mark_degraded(remote.name(), &e.to_string()),
            }
        }

        self.local.query(vector, k).await
    }

    pub async fn is_available(&self) -> bool {
        match &self.remote {
            Some(remote) => remote.is_available().await,
            None => false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn degradation_count(&self) -> usize {
        self.degradations.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> VectorIndexStatus {
        let remote_available = self.is_available().await;
        VectorIndexStatus {
            backend: self
                .remote
                .as_ref()
                .map(|r| r.name().to_string())
                .unwrap_or_else(|| self.local.name().to_string()),
            remote_available,
            local_entries: self.local.len().await,
            pending_backfill: self.pending.lock().await.len(),
            degradations: self.degradation_count(),
        }
    }

    /// Push chunks written while degraded to the external index.
    /// Returns how many were backfilled.
    pub async fn resync(&self) -> usize {
        let Some(remote) = &self.remote else {
            return 0;
        };
        if !remote.is_available().await {
            return 0;
        }
        self.backfill(remote).await
    }

    /// Picks the backend for one operation. The external index is only used
    /// once it holds every chunk the local mirror has accepted.
    async fn select(&self) -> Option<&Arc<dyn VectorBackend>> {
        let remote = self.remote.as_ref()?;

        if !remote.is_available().await {
            self.mark_degraded(remote.name(), "health probe failed");
            return None;
        }

        self.backfill(remote).await;
        if !self.pending.lock().await.is_empty() {
            return None;
        }

        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(backend = remote.name(), "Vector index recovered");
        }
        Some(remote)
    }

    async fn backfill(&self, remote: &Arc<dyn VectorBackend>) -> usize {
        let mut pending = self.pending.lock().await;
        let mut done = 0;

        while let Some(chunk_id) = pending.first().cloned() {
            if let Some(entry) = self.local.get(&chunk_id).await {
                match remote.upsert(&entry).await {
                    Ok(()) => {}
                    Err(IndexError::Unavailable(reason)) => {
                        self.mark_degraded(remote.name(), &reason);
                        break;
                    }
                    Err(e) => {
                        debug!(backend = remote.name(), %chunk_id, error = %e, "Backfill rejected");
                        break;
                    }
                }
                done += 1;
            }
            pending.remove(0);
        }

        if done > 0 {
            info!(
                backend = remote.name(),
                backfilled = done,
                remaining = pending.len(),
                "Backfilled chunks written during outage"
            );
        }
        done
    }

    async fn track_pending(&self, chunk_id: &str) {
        if self.remote.is_none() {
            return;
        }
        let mut pending = self.pending.lock().await;
        if !pending.iter().any(|id| id == chunk_id) {
            pending.push(chunk_id.to_string());
        }
    }

    fn mark_degraded(&self, backend: &str, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.degradations.fetch_add(1, Ordering::SeqCst);
            warn!(
                backend = backend,
                reason = reason,
                "Vector index degraded, serving from in-process index"
            );
        }
    }
}
