use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::{ConversationTurn, MemoryBackend, MemoryError};

const DEFAULT_MAX_SESSIONS: usize = 10_000;
const DEFAULT_MAX_TURNS: usize = 200;

/// Per-session turn log held in process memory.
///
/// Bounded on both axes: each session keeps its latest `max_turns` turns,
/// and once `max_sessions` is reached the session with the oldest last turn
/// is dropped to make room.
pub struct LocalMemory {
    sessions: DashMap<String, VecDeque<ConversationTurn>>,
    max_sessions: usize,
    max_turns: usize,
}

impl Default for LocalMemory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS, DEFAULT_MAX_TURNS)
    }
}

impl LocalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_sessions: usize, max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions: max_sessions.max(1),
            max_turns: max_turns.max(1),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn evict_stalest(&self) {
        let stalest = self
            .sessions
            .iter()
            .min_by_key(|entry| entry.value().back().map(|t| t.timestamp))
            .map(|entry| entry.key().clone());
        if let Some(session_id) = stalest {
            self.sessions.remove(&session_id);
        }
    }
}

#[async_trait]
impl MemoryBackend for LocalMemory {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn append(&self, turn: &ConversationTurn) -> Result<(), MemoryError> {
        if !self.sessions.contains_key(&turn.session_id) && self.sessions.len() >= self.max_sessions {
            self.evict_stalest();
        }

        let mut turns = self.sessions.entry(turn.session_id.clone()).or_default();
        turns.push_back(turn.clone());
        while turns.len() > self.max_turns {
            turns.pop_front();
        }
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|turns| {
                let start = turns.len().saturating_sub(limit);
                turns.iter().skip(start).cloned().collect::<Vec<_>>()
            })
            .unwrap_or_default())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
