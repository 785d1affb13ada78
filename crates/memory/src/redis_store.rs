use async_trait::async_trait;
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{ConversationTurn, MemoryBackend, MemoryError};

/// Session history kept as one Redis list of JSON turns per session.
pub struct RedisMemory {
    client: redis::Client,
    key_prefix: String,
    ttl: Option<Duration>,
    timeout: Duration,
}

impl RedisMemory {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MemoryError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            key_prefix: "chat_session".to_string(),
            ttl: None,
            timeout,
        })
    }

    /// Expiry is enforced by Redis; each append refreshes it
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self, session_id: &str) -> String {
        format!("{}:{}", self.key_prefix, session_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, MemoryError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> Result<T, MemoryError>
    where
        F: Future<Output = Result<T, MemoryError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| MemoryError::Unavailable(format!("{operation} timed out after {:?}", self.timeout)))?
    }
}

#[async_trait]
impl MemoryBackend for RedisMemory {
    fn name(&self) -> &str {
        "redis"
    }

    async fn append(&self, turn: &ConversationTurn) -> Result<(), MemoryError> {
        let key = self.key(&turn.session_id);
        let payload = serde_json::to_string(turn)?;

        self.bounded("append", async {
            let mut conn = self.connection().await?;
            let _: () = conn.rpush(&key, payload).await?;
            if let Some(ttl) = self.ttl {
                let _: () = conn.expire(&key, ttl.as_secs() as i64).await?;
            }
            Ok(())
        })
        .await?;

        debug!(session_id = %turn.session_id, role = turn.role.as_str(), "Appended turn to Redis");
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<ConversationTurn>, MemoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.key(session_id);
        let start = -(limit as isize);

        let raw: Vec<String> = self
            .bounded("history", async {
                let mut conn = self.connection().await?;
                Ok(conn.lrange(&key, start, -1).await?)
            })
            .await?;

        raw.iter()
            .map(|item| serde_json::from_str(item).map_err(MemoryError::from))
            .collect()
    }

    async fn is_available(&self) -> bool {
        let probe = self.bounded("ping", async {
            let mut conn = self.connection().await?;
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(pong)
        });
        matches!(probe.await, Ok(pong) if pong == "PONG")
    }
}
