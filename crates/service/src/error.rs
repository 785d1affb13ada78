use extract::BookingError;
use index::{EmbeddingError, IndexError};
use ingest::ChunkError;
use memory::MemoryError;
use query::{GenerationError, RetrieveError};
use serde::Serialize;

/// Coarse failure classes shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientUpstream,
    /// The upstream answered, but with something unusable; retrying won't help
    UpstreamRejected,
    Validation,
    AmbiguousInput,
    ResourceUnavailable,
    GenerationUnavailable,
    EmbeddingUnavailable,
    Storage,
}

/// Stable code returned with degraded chat replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidRequest,
    AmbiguousDatetime,
    InvalidField,
    GenerationUnavailable,
    EmbeddingUnavailable,
    RetrievalFailed,
    StorageFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "INVALID_REQUEST",
            ErrorCode::AmbiguousDatetime => "AMBIGUOUS_DATETIME",
            ErrorCode::InvalidField => "INVALID_FIELD",
            ErrorCode::GenerationUnavailable => "GENERATION_UNAVAILABLE",
            ErrorCode::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
            ErrorCode::RetrievalFailed => "RETRIEVAL_FAILED",
            ErrorCode::StorageFailed => "STORAGE_FAILED",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Chunking(#[from] ChunkError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Retrieval(#[from] RetrieveError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Booking(#[from] BookingError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("storage failed: {0}")]
    Storage(#[source] anyhow::Error),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) | ServiceError::Chunking(_) => ErrorKind::Validation,
            ServiceError::Embedding(e) => embedding_kind(e),
            ServiceError::Index(IndexError::Unavailable(_)) => ErrorKind::ResourceUnavailable,
            ServiceError::Index(IndexError::Dimension { .. }) => ErrorKind::Validation,
            ServiceError::Index(IndexError::Backend(_)) => ErrorKind::Storage,
            ServiceError::Retrieval(RetrieveError::InvalidTopK) => ErrorKind::Validation,
            ServiceError::Retrieval(RetrieveError::Embedding(e)) => embedding_kind(e),
            ServiceError::Retrieval(RetrieveError::Index(_)) => ErrorKind::ResourceUnavailable,
            ServiceError::Generation(_) => ErrorKind::GenerationUnavailable,
            ServiceError::Booking(BookingError::AmbiguousDateTime { .. }) => ErrorKind::AmbiguousInput,
            ServiceError::Booking(BookingError::InvalidField { .. }) => ErrorKind::Validation,
            ServiceError::Booking(BookingError::Storage(_)) => ErrorKind::Storage,
            ServiceError::Memory(MemoryError::Unavailable(_)) => ErrorKind::TransientUpstream,
            ServiceError::Memory(_) | ServiceError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Booking(BookingError::AmbiguousDateTime { .. }) => ErrorCode::AmbiguousDatetime,
            ServiceError::Booking(BookingError::InvalidField { .. }) => ErrorCode::InvalidField,
            ServiceError::Retrieval(RetrieveError::Index(_)) | ServiceError::Index(_) => {
                ErrorCode::RetrievalFailed
            }
            ServiceError::Embedding(e) | ServiceError::Retrieval(RetrieveError::Embedding(e))
                if !matches!(e, EmbeddingError::Dimension { .. }) =>
            {
                ErrorCode::EmbeddingUnavailable
            }
            _ => match self.kind() {
                ErrorKind::Validation | ErrorKind::AmbiguousInput => ErrorCode::InvalidRequest,
                ErrorKind::GenerationUnavailable => ErrorCode::GenerationUnavailable,
                ErrorKind::EmbeddingUnavailable => ErrorCode::EmbeddingUnavailable,
                ErrorKind::ResourceUnavailable => ErrorCode::RetrievalFailed,
                ErrorKind::TransientUpstream | ErrorKind::UpstreamRejected | ErrorKind::Storage => {
                    ErrorCode::StorageFailed
                }
            },
        }
    }

    /// Text shown to the user in place of an answer
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Booking(BookingError::AmbiguousDateTime { field, phrase }) => format!(
                "I couldn't tell exactly which {field} you meant by \"{phrase}\". \
Could you give it more precisely, for example 2024-01-25 for a date or 14:30 for a time?"
            ),
            ServiceError::Booking(BookingError::InvalidField { field, reason }) => {
                format!("I couldn't use the {field} you gave ({reason}). Could you check it and try again?")
            }
            ServiceError::Validation(reason) => format!("I couldn't process that message: {reason}."),
            _ => "Sorry, I'm having trouble answering right now. Please try again in a moment.".to_string(),
        }
    }
}

fn embedding_kind(e: &EmbeddingError) -> ErrorKind {
    match e {
        EmbeddingError::Unavailable { .. } => ErrorKind::EmbeddingUnavailable,
        EmbeddingError::Rejected(_) | EmbeddingError::Malformed(_) => ErrorKind::UpstreamRejected,
        EmbeddingError::Dimension { .. } => ErrorKind::Validation,
    }
}
