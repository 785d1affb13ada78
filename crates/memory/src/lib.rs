//! Per-session conversation memory.
//!
//! `MemoryStore` fronts an external backend (Redis by default) and mirrors
//! every append into a bounded process-local log. When the external store cannot
//! be reached, reads and writes are served locally and the switch is logged.
//! History written by other processes is not visible in that mode.

pub mod local;
pub mod redis_store;
pub mod turn;

pub use local::LocalMemory;
pub use redis_store::RedisMemory;
pub use turn::{ConversationTurn, Role};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory store unavailable: {0}")]
    Unavailable(String),
    #[error("memory store error: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("corrupt conversation turn: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait MemoryBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn append(&self, turn: &ConversationTurn) -> Result<(), MemoryError>;

    /// Most recent `limit` turns, oldest first. Unknown sessions are empty.
    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError>;

    async fn is_available(&self) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub backend: String,
    pub remote_available: bool,
    pub local_sessions: usize,
    pub degradations: usize,
}

pub struct MemoryStore {
    remote: Option<Arc<dyn MemoryBackend>>,
    local: LocalMemory,
    degraded: AtomicBool,
    degradations: AtomicUsize,
}

impl MemoryStore {
    pub fn new(remote: Arc<dyn MemoryBackend>) -> Self {
        Self::build(Some(remote))
    }

    pub fn in_process() -> Self {
        Self::build(None)
    }

    fn build(remote: Option<Arc<dyn MemoryBackend>>) -> Self {
        Self {
            remote,
            local: LocalMemory::new(),
            degraded: AtomicBool::new(false),
            degradations: AtomicUsize::new(0),
        }
    }

    pub async fn append(&self, turn: &ConversationTurn) -> Result<(), MemoryError> {
        self.local.append(turn).await?;

        if let Some(remote) = self.select().await {
            if let Err(e) = remote.append(turn).await {
                self.mark_degraded(remote.name(), &e.to_string());
            }
        }
        Ok(())
    }

    pub async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        if let Some(remote) = self.select().await {
            match remote.history(session_id, limit).await {
                Ok(turns) => return Ok(turns),
                Err(e) => self.mark_degraded(remote.name(), &e.to_string()),
            }
        }
        self.local.history(session_id, limit).await
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

    pub async fn status(&self) -> MemoryStatus {
        MemoryStatus {
            backend: self
                .remote
                .as_ref()
                .map(|r| r.name().to_string())
                .unwrap_or_else(|| self.local.name().to_string()),
            remote_available: self.is_available().await,
            local_sessions: self.local.session_count(),
            degradations: self.degradation_count(),
        }
    }

    async fn select(&self) -> Option<&Arc<dyn MemoryBackend>> {
        let remote = self.remote.as_ref()?;

        if !remote.is_available().await {
            self.mark_degraded(remote.name(), "health probe failed");
            return None;
        }
        if self.degraded.swap(false, Ordering::SeqCst) {
            info!(backend = remote.name(), "Memory store recovered");
        }
        Some(remote)
    }

    fn mark_degraded(&self, backend: &str, reason: &str) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            self.degradations.fetch_add(1, Ordering::SeqCst);
            warn!(
                backend = backend,
                reason = reason,
                "Memory store degraded, history is process-local until it recovers"
            );
        }
    }
}
