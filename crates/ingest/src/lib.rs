pub mod chunk;
pub mod chunker;

pub use chunk::{Chunk, ChunkingStrategy, Document};
pub use chunker::{ChunkError, Chunker, ChunkerConfig};

/// Chunk an uploaded document with the strategy it was uploaded with
pub fn chunk_document(document: &Document, config: &ChunkerConfig) -> Result<Vec<Chunk>, ChunkError> {
    let chunker = Chunker::new(config.clone())?;
    chunker.chunk_text(
        &document.id,
        &document.raw_text,
        &document.filename,
        document.chunking_strategy,
    )
}
