//! Page-aware passage splitting.
//!
//! Each page is segmented independently with `semchunk-rs` using a whitespace word counter and a
//! budget of `chunk_size - overlap` words, so a boundary never falls inside a word. Consecutive
//! passages of the same page then receive a sliding overlap: the last `overlap` words of the
//! previous segment are prepended to the next one, which brings it back to at most `chunk_size`.
//!
//! Output order is page order, then intra-page order. Citation numbering falls back on this
//! order when similarity scores tie, so it must stay stable.

use semchunk_rs::Chunker as SemanticChunker;

use super::types::{ChunkCandidate, ChunkingError, PageText};

/// Splits extracted page text into overlapping passages.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker with a passage budget of `chunk_size` words and `overlap` shared words.
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::InvalidOverlap {
                overlap,
                chunk_size,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Word budget per passage.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Split every page into passages, preserving page order then intra-page order.
    ///
    /// Whitespace-only pages yield no passages.
    pub fn chunk(&self, pages: &[PageText]) -> Vec<ChunkCandidate> {
        let mut candidates = Vec::new();
        for page in pages {
            for (ordinal, text) in self.chunk_page(&page.text).into_iter().enumerate() {
                candidates.push(ChunkCandidate {
                    page_number: page.page_number,
                    ordinal,
                    text,
                });
            }
        }
        tracing::debug!(
            pages = pages.len(),
            chunks = candidates.len(),
            chunk_size = self.chunk_size,
            overlap = self.overlap,
            "Chunked document pages"
        );
        candidates
    }

    fn chunk_page(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let segment_budget = self.chunk_size - self.overlap;
        let chunker = SemanticChunker::new(segment_budget, Box::new(count_words));
        let base_chunks: Vec<String> = chunker
            .chunk(text)
            .into_iter()
            .map(|chunk| chunk.trim().to_string())
            .filter(|chunk| !chunk.is_empty())
            .collect();
        apply_overlap(base_chunks, self.chunk_size, self.overlap)
    }
}

fn count_words(segment: &str) -> usize {
    let words = segment.split_whitespace().count();
    if words == 0 && !segment.is_empty() {
        1
    } else {
        words
    }
}

/// Prepend the tail of each passage to its successor without breaking the word budget.
fn apply_overlap(chunks: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;
    for current in chunks {
        let next = match &previous {
            Some(prev) => {
                let room = chunk_size.saturating_sub(count_words(&current));
                let tail = tail_words(prev, overlap.min(room));
                if tail.is_empty() {
                    current.clone()
                } else {
                    format!("{tail} {current}")
                }
            }
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }
    overlapped
}

/// Return the slice holding the last `count` whitespace-separated words of `text`.
fn tail_words(text: &str, count: usize) -> &str {
    if count == 0 {
        return "";
    }
    let starts = word_starts(text);
    if starts.len() <= count {
        return text.trim();
    }
    text[starts[starts.len() - count]..].trim_end()
}

fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (offset, ch) in text.char_indices() {
        if ch.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(offset);
            in_word = true;
        }
    }
    starts
}
