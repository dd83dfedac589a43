//! Text segmentation for retrieval indexing.
//!
//! Splits extracted document text into bounded, overlapping chunks suitable
//! for embedding. Splitting prefers paragraph boundaries, then sentence
//! boundaries, then whitespace, so chunks read as coherent passages; only a
//! run of text with no usable boundary is hard-split at the size limit.
//!
//! Each chunk records its byte offsets into the source text so search results
//! can point back at the exact span of the original document. Consecutive
//! chunks overlap by a configurable number of bytes to preserve context that
//! straddles a chunk boundary.
//!
//! ```
//! use agora_chunk::{Chunker, ChunkerConfig};
//!
//! let chunker = Chunker::new(ChunkerConfig::default());
//! let text = "First paragraph.\n\nSecond paragraph with more detail.";
//! let chunks = chunker.chunk(text);
//!
//! assert!(!chunks.is_empty());
//! assert_eq!(chunks[0].start, 0);
//! assert_eq!(chunks.last().unwrap().end, text.len());
//! ```

use regex::Regex;
use serde::Serialize;
use std::ops::Range;

/// Default maximum chunk size in bytes.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 800;

/// Default overlap between consecutive chunks in bytes.
pub const DEFAULT_OVERLAP: usize = 100;

/// Boundary patterns ordered from most to least significant. Oversized text
/// is split at the earliest level that brings every piece under budget.
const DELIMITER_PATTERNS: &[&str] = &[
    r"\n{2,}",               // paragraph breaks
    r#"[.!?]["')\]]*\s+"#,   // sentence ends
    r"\n",                   // line breaks
    r"\s+",                  // any whitespace
];

/// Configuration for [`Chunker`].
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum size of a chunk in bytes, overlap included.
    pub max_chunk_size: usize,
    /// Number of trailing bytes of each chunk repeated at the start of the
    /// next one. Clamped below `max_chunk_size`.
    pub overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            overlap: DEFAULT_OVERLAP,
        }
    }
}

impl ChunkerConfig {
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }
}

/// A contiguous span of source text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct TextChunk {
    /// 0-based position of this chunk within the document.
    pub sequence: usize,
    /// Byte offset of the chunk start in the source text.
    pub start: usize,
    /// Byte offset one past the chunk end in the source text.
    pub end: usize,
    /// The chunk text, `source[start..end]`.
    pub text: String,
}

/// Splits text into bounded overlapping chunks.
///
/// Guarantees, for any input:
/// - chunk `start` offsets are monotonically non-decreasing,
/// - the union of `[start, end)` spans covers the whole input (no text loss),
/// - `text.len() <= max_chunk_size` for every chunk.
pub struct Chunker {
    config: ChunkerConfig,
    delimiters: Vec<Regex>,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        let delimiters = DELIMITER_PATTERNS
            .iter()
            .map(|pattern| Regex::new(pattern).expect("built-in delimiter pattern is valid"))
            .collect();
        Self { config, delimiters }
    }

    /// Split `text` into chunks. Empty input produces zero chunks.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let overlap = self.config.overlap.min(self.config.max_chunk_size / 2);
        // Base windows are packed to this budget; prepending `overlap` bytes
        // keeps the final chunk within max_chunk_size.
        let budget = (self.config.max_chunk_size - overlap).max(1);

        let segments = self.split_ranges(text, 0, budget, 0);
        let windows = pack_windows(&segments, budget);

        let mut chunks = Vec::with_capacity(windows.len());
        for (sequence, window) in windows.iter().enumerate() {
            let start = if sequence == 0 || overlap == 0 {
                window.start
            } else {
                let floor = windows[sequence - 1].start;
                overlap_start(text, window.start, overlap, floor)
            };
            chunks.push(TextChunk {
                sequence,
                start,
                end: window.end,
                text: text[start..window.end].to_string(),
            });
        }
        chunks
    }

    // Recursively split `text` (located at `offset` in the source) into
    // ranges no longer than `budget`, trying each delimiter level in turn.
    // The produced ranges tile the input exactly: delimiters stay attached to
    // the piece they terminate.
    fn split_ranges(
        &self,
        text: &str,
        offset: usize,
        budget: usize,
        level: usize,
    ) -> Vec<Range<usize>> {
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= budget {
            return vec![offset..offset + text.len()];
        }
        if level >= self.delimiters.len() {
            // No boundary left to respect: hard-split on char boundaries.
            return hard_split(text, offset, budget);
        }

        let mut ranges = Vec::new();
        let mut piece_start = 0;
        for mat in self.delimiters[level].find_iter(text) {
            if mat.end() <= piece_start {
                continue;
            }
            let piece = &text[piece_start..mat.end()];
            ranges.extend(self.split_ranges(piece, offset + piece_start, budget, level + 1));
            piece_start = mat.end();
        }
        if piece_start < text.len() {
            let piece = &text[piece_start..];
            ranges.extend(self.split_ranges(piece, offset + piece_start, budget, level + 1));
        }
        ranges
    }
}

// Greedily merge adjacent segment ranges into windows no longer than
// `budget`. Segments tile the source, so the windows do too.
fn pack_windows(segments: &[Range<usize>], budget: usize) -> Vec<Range<usize>> {
    let mut windows: Vec<Range<usize>> = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for segment in segments {
        match current.as_mut() {
            Some(window) if segment.end - window.start <= budget => {
                window.end = segment.end;
            }
            Some(window) => {
                windows.push(window.clone());
                current = Some(segment.clone());
            }
            None => {
                current = Some(segment.clone());
            }
        }
    }
    if let Some(window) = current {
        windows.push(window);
    }
    windows
}

// Split a boundary-free run into budget-sized pieces on char boundaries.
fn hard_split(text: &str, offset: usize, budget: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + budget).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single char wider than the budget; take it whole.
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        ranges.push(offset + start..offset + end);
        start = end;
    }
    ranges
}

// Pick where the overlap region for a window begins: roughly `overlap` bytes
// before `window_start`, moved forward to the nearest word start so the chunk
// does not open mid-word. Never reaches back past `floor` (the previous
// window's start).
fn overlap_start(text: &str, window_start: usize, overlap: usize, floor: usize) -> usize {
    let mut pos = window_start.saturating_sub(overlap).max(floor);
    while pos < window_start && !text.is_char_boundary(pos) {
        pos += 1;
    }
    if pos >= window_start {
        return window_start;
    }
    let at_word_start = text[..pos]
        .chars()
        .next_back()
        .is_none_or(char::is_whitespace);
    if at_word_start {
        return pos;
    }
    for (idx, ch) in text[pos..window_start].char_indices() {
        if ch.is_whitespace() {
            return pos + idx + ch.len_utf8();
        }
    }
    // Overlap region is a single word fragment; start it on the char
    // boundary we already have rather than dropping the overlap.
    pos
}
