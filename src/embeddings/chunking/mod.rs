
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_OVERLAP: usize = 200;

/// Breaks on `.` or newline only count when they fall within this many
/// characters of the window end.
const SENTENCE_BREAK_WINDOW: usize = 200;
/// Same as above, for the fallback break on a space.
const WORD_BREAK_WINDOW: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChunkingError {
    #[error("Chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("Chunk size ({chunk_size}) must be greater than overlap ({overlap})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// Chunking parameters, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target window length
    pub chunk_size: usize,
    /// Characters shared between consecutive windows
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

/// Splits extracted document text into overlapping, boundary-aware chunks.
///
/// Windows are `chunk_size` characters long. Unless a window reaches the end
/// of the text, its end is pulled back to the last sentence terminator or
/// line break when one lies in the final 200 characters, otherwise to the last
/// space in the final 100 characters, otherwise the window is cut mid-word.
/// Each following window starts `overlap` characters before the previous end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextChunker {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl TextChunker {
    #[inline]
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::ZeroChunkSize);
        }
        if chunk_size <= overlap {
            return Err(ChunkingError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkingError> {
        Self::new(config.chunk_size, config.overlap)
    }

    #[inline]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Chunk `text`, returning chunks in document order
    #[inline]
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let chunks = split_windows(text, self.chunk_size, self.overlap);
        debug!(
            "Chunked {} characters into {} chunks (size {}, overlap {})",
            text.chars().count(),
            chunks.len(),
            self.chunk_size,
            self.overlap
        );
        chunks
    }
}

/// Chunk `text` with explicit parameters, rejecting `chunk_size <= overlap`
#[inline]
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, ChunkingError> {
    Ok(TextChunker::new(chunk_size, overlap)?.chunk(text))
}

/// The windowing loop. Always advances by at least one character, so it
/// terminates even for parameters `TextChunker::new` would reject.
fn split_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let text_length = chars.len();
    if text_length <= chunk_size {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text_length {
        let mut end = start + chunk_size;

        if end < text_length {
            end = snap_to_boundary(&chars, start, end, chunk_size);
        }
        let end = end.min(text_length);

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= text_length {
            break;
        }

        start = (start + 1).max(end.saturating_sub(overlap));
    }

    chunks
}

/// Pick the end of a non-final window `[start, end)`
fn snap_to_boundary(chars: &[char], start: usize, end: usize, chunk_size: usize) -> usize {
    let window = &chars[start..end];
    let last_position = |needle: char| {
        window
            .iter()
            .rposition(|&c| c == needle)
            .map(|offset| start + offset)
    };

    let break_point = last_position('.').max(last_position('\n'));
    if let Some(break_point) = break_point {
        if break_point + SENTENCE_BREAK_WINDOW > start + chunk_size {
            return break_point + 1;
        }
    }

    if let Some(last_space) = last_position(' ') {
        if last_space + WORD_BREAK_WINDOW > start + chunk_size {
            return last_space;
        }
    }

    end
}
