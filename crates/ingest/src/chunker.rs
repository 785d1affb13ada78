use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use crate::chunk::{Chunk, ChunkingStrategy};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("document is empty or contains only whitespace")]
    EmptyDocument,
    #[error("invalid chunking parameters: {0}")]
    InvalidParams(String),
}

/// Sizes are measured in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub semantic_target: usize,
    pub semantic_max: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            semantic_target: 1000,
            semantic_max: 1500,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::InvalidParams("chunk_size must be > 0".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(ChunkError::InvalidParams(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        if self.semantic_max == 0 || self.semantic_target > self.semantic_max {
            return Err(ChunkError::InvalidParams(format!(
                "semantic_target ({}) must not exceed semantic_max ({})",
                self.semantic_target, self.semantic_max
            )));
        }
        Ok(())
    }
}

pub struct Chunker {
    config: ChunkerConfig,
}

/// A sentence-level unit with its byte range in the source text.
struct Unit<'a> {
    text: &'a str,
    start: usize,
    paragraph_start: bool,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn chunk_text(
        &self,
        doc_id: &str,
        text: &str,
        source: &str,
        strategy: ChunkingStrategy,
    ) -> Result<Vec<Chunk>, ChunkError> {
        if text.trim().is_empty() {
            return Err(ChunkError::EmptyDocument);
        }

        let spans = match strategy {
            ChunkingStrategy::FixedSize => {
                fixed_windows(text, 0, self.config.chunk_size, self.config.overlap)
            }
            ChunkingStrategy::Semantic => self.semantic_spans(text),
        };

        Ok(spans
            .into_iter()
            .enumerate()
            .map(|(ordinal, (chunk_text, offset))| {
                Chunk::new(
                    doc_id.to_string(),
                    ordinal,
                    chunk_text,
                    source.to_string(),
                    offset,
                )
            })
            .collect())
    }

    fn semantic_spans(&self, text: &str) -> Vec<(String, (usize, usize))> {
        let target = self.config.semantic_target;
        let max = self.config.semantic_max;

        let mut spans = Vec::new();
        let mut buffer = String::new();
        let mut buffer_len = 0;
        let mut buffer_range = (0, 0);

        for unit in split_units(text) {
            let unit_len = unit.text.chars().count();
            let unit_end = unit.start + unit.text.len();

            // A single sentence above the hard maximum is the only thing we cut
            if unit_len > max {
                flush(&mut spans, &mut buffer, &mut buffer_len, buffer_range);
                spans.extend(fixed_windows(unit.text, unit.start, max, 0));
                continue;
            }

            let separator = if unit.paragraph_start { "\n\n" } else { " " };
            if !buffer.is_empty() && buffer_len + separator.len() + unit_len > max {
                flush(&mut spans, &mut buffer, &mut buffer_len, buffer_range);
            }

            if buffer.is_empty() {
                buffer_range = (unit.start, unit_end);
            } else {
                buffer.push_str(separator);
                buffer_len += separator.len();
                buffer_range.1 = unit_end;
            }
            buffer.push_str(unit.text);
            buffer_len += unit_len;

            if buffer_len >= target {
                flush(&mut spans, &mut buffer, &mut buffer_len, buffer_range);
            }
        }

        flush(&mut spans, &mut buffer, &mut buffer_len, buffer_range);
        spans
    }
}

fn flush(
    spans: &mut Vec<(String, (usize, usize))>,
    buffer: &mut String,
    buffer_len: &mut usize,
    range: (usize, usize),
) {
    if !buffer.is_empty() {
        spans.push((std::mem::take(buffer), range));
        *buffer_len = 0;
    }
}

/// Paragraphs split on blank lines, then Unicode sentence bounds.
fn split_units(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    let mut paragraph_offset = 0;

    for paragraph in text.split("\n\n") {
        let mut first_in_paragraph = true;

        for (idx, sentence) in paragraph.split_sentence_bound_indices() {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                continue;
            }
            let leading = sentence.len() - sentence.trim_start().len();
            units.push(Unit {
                text: trimmed,
                start: paragraph_offset + idx + leading,
                paragraph_start: first_in_paragraph,
            });
            first_in_paragraph = false;
        }

        paragraph_offset += paragraph.len() + 2;
    }

    units
}

/// Consecutive character windows of `size` advancing by `size - overlap`.
/// Returned offsets are byte positions shifted by `base`.
fn fixed_windows(
    text: &str,
    base: usize,
    size: usize,
    overlap: usize,
) -> Vec<(String, (usize, usize))> {
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    let step = size - overlap;

    let mut windows = Vec::new();
    let mut start = 0;

    while start < char_count {
        let end = (start + size).min(char_count);
        let (byte_start, byte_end) = (bounds[start], bounds[end]);
        windows.push((
            text[byte_start..byte_end].to_string(),
            (base + byte_start, base + byte_end),
        ));
        if end == char_count {
            break;
        }
        start += step;
    }

    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(chunk_size: usize, overlap: usize, target: usize, max: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            chunk_size,
            overlap,
            semantic_target: target,
            semantic_max: max,
        })
        .unwrap()
    }

    #[test]
    fn test_basic_chunking() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        let text = "This is a test paragraph.\n\nThis is another paragraph.";
        let chunks = chunker
            .chunk_text("test-doc", text, "test.txt", ChunkingStrategy::FixedSize)
            .unwrap();

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].doc_id, "test-doc");
    }

    #[test]
    fn test_empty_document_rejected() {
        let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
        for strategy in [ChunkingStrategy::FixedSize, ChunkingStrategy::Semantic] {
            let err = chunker.chunk_text("d", "  \n\t ", "x.txt", strategy).unwrap_err();
            assert_eq!(err, ChunkError::EmptyDocument);
        }
    }

    #[test]
    fn test_invalid_params_rejected() {
        let config = ChunkerConfig {
            chunk_size: 10,
            overlap: 10,
            ..ChunkerConfig::default()
        };
        assert!(matches!(Chunker::new(config), Err(ChunkError::InvalidParams(_))));
    }

    #[test]
    fn test_fixed_size_windows_and_overlap() {
        let chunker = chunker(10, 3, 10, 20);
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunker
            .chunk_text("d", text, "x.txt", ChunkingStrategy::FixedSize)
            .unwrap();

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
        }
        assert_eq!(chunks.last().unwrap().offset, (21, 26));
    }

    #[test]
    fn test_fixed_size_covers_text() {
        let chunker = chunker(37, 11, 10, 20);
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let chunks = chunker
            .chunk_text("d", &text, "x.txt", ChunkingStrategy::FixedSize)
            .unwrap();

        let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
        let bound = text.chars().count() - (chunks.len() - 1) * 11;
        assert!(total >= bound);
    }

    #[test]
    fn test_fixed_size_is_deterministic() {
        let chunker = chunker(50, 10, 10, 20);
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit. ".repeat(10);
        let a = chunker
            .chunk_text("d", &text, "x.txt", ChunkingStrategy::FixedSize)
            .unwrap();
        let b = chunker
            .chunk_text("d", &text, "x.txt", ChunkingStrategy::FixedSize)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_size_respects_multibyte_chars() {
        let chunker = chunker(4, 1, 10, 20);
        let text = "żółw jest zielony";
        let chunks = chunker
            .chunk_text("d", text, "x.txt", ChunkingStrategy::FixedSize)
            .unwrap();
        assert_eq!(chunks[0].text, "żółw");
        assert!(chunks.iter().all(|c| c.char_len <= 4));
    }

    #[test]
    fn test_semantic_keeps_sentences_whole() {
        let chunker = chunker(100, 10, 40, 60);
        let text = "First sentence is here. Second sentence follows it.\n\n\
                    A new paragraph starts. It has two sentences.";
        let chunks = chunker
            .chunk_text("d", text, "x.txt", ChunkingStrategy::Semantic)
            .unwrap();

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.char_len <= 60);
            assert!(chunk.text.ends_with('.'), "cut mid-sentence: {:?}", chunk.text);
        }
        assert!(chunks.iter().any(|c| c.text.starts_with("A new paragraph")));
    }

    #[test]
    fn test_semantic_splits_only_oversized_sentence() {
        let chunker = chunker(100, 10, 20, 30);
        let long = "X".repeat(70);
        let text = format!("Short one. {}. Tail.", long);
        let chunks = chunker
            .chunk_text("d", &text, "x.txt", ChunkingStrategy::Semantic)
            .unwrap();

        assert_eq!(chunks[0].text, "Short one.");
        assert_eq!(chunks.last().unwrap().text, "Tail.");
        let middle: Vec<_> = chunks[1..chunks.len() - 1].iter().collect();
        assert_eq!(middle.len(), 3);
        assert!(middle.iter().all(|c| c.char_len <= 30));
    }

    #[test]
    fn test_semantic_merges_small_units() {
        let chunker = chunker(100, 10, 1000, 1500);
        let text = "One. Two. Three.\n\nFour.";
        let chunks = chunker
            .chunk_text("d", text, "x.txt", ChunkingStrategy::Semantic)
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One. Two. Three.\n\nFour.");
        assert_eq!(chunks[0].offset, (0, text.len()));
    }
}
