use index::RetryConfig;
use ingest::{ChunkerConfig, ChunkingStrategy};
use query::SamplingOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub vector: VectorConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub retry: RetryConfig,
    pub retrieval: RetrievalConfig,
    pub cache: CacheConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub default_strategy: ChunkingStrategy,
    #[serde(flatten)]
    pub params: ChunkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Qdrant REST endpoint; `None` keeps every vector in process
    pub qdrant_url: Option<String>,
    pub collection: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Redis connection URL; `None` keeps history in process
    pub redis_url: Option<String>,
    pub history_limit: usize,
    pub ttl_secs: Option<u64>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Sampling for answer generation
    #[serde(default)]
    pub sampling: SamplingOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Run turns of one session strictly one after another
    pub serialize_turns: bool,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig {
                default_strategy: ChunkingStrategy::FixedSize,
                params: ChunkerConfig::default(),
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
                dimension: 768,
                batch_size: 32,
                timeout_secs: 30,
            },
            vector: VectorConfig {
                qdrant_url: Some("http://localhost:6333".to_string()),
                collection: "documents".to_string(),
                timeout_secs: 10,
            },
            memory: MemoryConfig {
                redis_url: Some("redis://127.0.0.1:6379".to_string()),
                history_limit: 10,
                ttl_secs: Some(24 * 60 * 60),
                timeout_secs: 5,
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "llama3".to_string(),
                timeout_secs: 60,
                sampling: SamplingOptions::default(),
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            retrieval: RetrievalConfig { top_k: 4 },
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            sessions: SessionConfig {
                serialize_turns: true,
            },
        }
    }
}

impl AppConfig {
    /// Every external service on localhost, short timeouts
    pub fn local() -> Self {
        let mut config = Self::default();
        config.embedding.timeout_secs = 10;
        config.llm.timeout_secs = 30;
        config.retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 200,
            max_backoff_ms: 1000,
        };
        config
    }

    /// No vector or memory service: everything stays in this process
    pub fn offline() -> Self {
        let mut config = Self::default();
        config.vector.qdrant_url = None;
        config.memory.redis_url = None;
        config.memory.ttl_secs = None;
        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .params
            .validate()
            .map_err(|e| ConfigError(e.to_string()))?;

        if self.embedding.dimension == 0 {
            return Err(ConfigError("embedding.dimension must be positive".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError("embedding.batch_size must be positive".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError("retrieval.top_k must be at least 1".into()));
        }
        if self.memory.history_limit == 0 {
            return Err(ConfigError("memory.history_limit must be at least 1".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError("cache.max_entries must be positive when enabled".into()));
        }

        let timeouts = [
            ("embedding", self.embedding.timeout_secs),
            ("vector", self.vector.timeout_secs),
            ("memory", self.memory.timeout_secs),
            ("llm", self.llm.timeout_secs),
        ];
        if let Some((section, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError(format!("{section}.timeout_secs must be positive")));
        }
        Ok(())
    }
}

pub(crate) fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
