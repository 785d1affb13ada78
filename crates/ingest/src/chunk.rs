use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub ordinal: usize,
    pub text: String,
    pub source: String,
    pub offset: (usize, usize), // [start, end) byte positions in the document
    pub char_len: usize,
}

impl Chunk {
    pub fn new(
        doc_id: String,
        ordinal: usize,
        text: String,
        source: String,
        offset: (usize, usize),
    ) -> Self {
        // Generate stable chunk_id from content
        let chunk_id = Self::generate_chunk_id(&doc_id, ordinal, &text);
        let char_len = text.chars().count();

        Self {
            chunk_id,
            doc_id,
            ordinal,
            text,
            source,
            offset,
            char_len,
        }
    }

    fn generate_chunk_id(doc_id: &str, ordinal: usize, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(doc_id.as_bytes());
        hasher.update(ordinal.to_le_bytes());
        hasher.update(text.as_bytes());
        let result = hasher.finalize();
        hex::encode(&result[..16]) // Use first 16 bytes (32 hex chars)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingStrategy {
    #[default]
    FixedSize,
    Semantic,
}

impl ChunkingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingStrategy::FixedSize => "fixed_size",
            ChunkingStrategy::Semantic => "semantic",
        }
    }
}

/// An uploaded document. Read-only once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    pub raw_text: String,
    pub chunking_strategy: ChunkingStrategy,
}

impl Document {
    pub fn new(filename: impl Into<String>, raw_text: impl Into<String>, chunking_strategy: ChunkingStrategy) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.into(),
            uploaded_at: Utc::now(),
            raw_text: raw_text.into(),
            chunking_strategy,
        }
    }
}
