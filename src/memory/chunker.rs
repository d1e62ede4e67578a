//! Text chunking for the memory subsystem.
//!
//! Long documents are split into overlapping chunks so that each chunk fits
//! within an embedding model's context window.  Overlap ensures semantic
//! continuity across chunk boundaries.

// ─── ChunkConfig ─────────────────────────────────────────────────────────────

/// Configuration for the text chunker.
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Target number of words per chunk.  Default: 512.
    pub chunk_size: usize,
    /// Number of words shared between adjacent chunks.  Default: 50.
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 50,
        }
    }
}

// ─── Chunk ───────────────────────────────────────────────────────────────────

/// A single chunk produced by [`split_into_chunks`].
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// The text content of this chunk.
    pub text: String,
    /// Zero-based index of this chunk within the original document.
    pub chunk_index: usize,
    /// Index of the first word (inclusive) from the source word list.
    pub start_word: usize,
    /// Index of the last word (exclusive) from the source word list.
    pub end_word: usize,
}

// ─── split_into_chunks ───────────────────────────────────────────────────────

/// Split `text` into overlapping word-boundary chunks using `config`.
///
/// Returns a `Vec<Chunk>`.  If `text` is empty or shorter than one
/// chunk, a single chunk (or an empty vec for truly empty input) is returned.
pub fn split_into_chunks(text: &str, config: &ChunkConfig) -> Vec<Chunk> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let step = if config.chunk_size > config.overlap {
        config.chunk_size - config.overlap
    } else {
        // Degenerate config: step by 1 to avoid infinite loop.
        1
    };

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut idx = 0usize;

    while start < words.len() {
        let end = (start + config.chunk_size).min(words.len());
        let text = words[start..end].join(" ");
        chunks.push(Chunk {
            text,
            chunk_index: idx,
            start_word: start,
            end_word: end,
        });
        if end == words.len() {
            break;
        }
        start += step;
        idx += 1;
    }

    chunks
}

// ─── Tests ───────────────────────────────────────────────────────────────────
