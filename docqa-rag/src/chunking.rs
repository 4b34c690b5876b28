//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and two sliding-window implementations:
//!
//! - [`FixedSizeChunker`] — windows over characters with configurable overlap
//! - [`WordChunker`] — windows over whitespace-separated words with configurable overlap
//!
//! Both cover the input without gaps: consecutive chunks share exactly
//! `chunk_overlap` units, and the final chunk may be shorter than `chunk_size`.
//! Each chunker also exposes its windows as a lazy, `Clone` iterator.

use std::iter::FusedIterator;

use crate::config::{ChunkUnit, RagConfig};
use crate::document::Chunk;
use crate::error::{RagError, Result};

/// A strategy for splitting normalized document text into chunks.
pub trait Chunker: Send + Sync {
    /// Split text into ordered, overlapping chunks.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocumentError`] if the text is empty or whitespace only.
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>>;
}

/// Build the chunker selected by `config.chunk_unit`.
pub fn chunker_for(config: &RagConfig) -> Result<Box<dyn Chunker>> {
    Ok(match config.chunk_unit {
        ChunkUnit::Characters => {
            Box::new(FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?)
        }
        ChunkUnit::Words => Box::new(WordChunker::new(config.chunk_size, config.chunk_overlap)?),
    })
}

fn validate_window(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::ConfigError(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// Sizes count Unicode scalar values, so a multi-byte character is never split.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(10, 3)?;
/// let texts: Vec<String> = chunker.windows("abcdefghijklmno").map(|c| c.text).collect();
/// assert_eq!(texts, ["abcdefghij", "hijklmno"]);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` — maximum number of characters per chunk
    /// * `chunk_overlap` — number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_window(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Lazily iterate over the chunks of `text`.
    ///
    /// The iterator is `Clone`, so a sequence can be restarted from any point.
    /// Empty text yields no chunks.
    pub fn windows<'a>(&self, text: &'a str) -> CharWindows<'a> {
        CharWindows {
            text,
            size: self.chunk_size,
            step: self.chunk_size - self.chunk_overlap,
            next_byte: 0,
            next_char: 0,
            index: 0,
            prev_end: 0,
            done: text.is_empty(),
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyDocumentError);
        }
        Ok(self.windows(text).collect())
    }
}

/// Lazy character windows produced by [`FixedSizeChunker::windows`].
#[derive(Debug, Clone)]
pub struct CharWindows<'a> {
    text: &'a str,
    size: usize,
    step: usize,
    next_byte: usize,
    next_char: usize,
    index: usize,
    prev_end: usize,
    done: bool,
}

impl Iterator for CharWindows<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.next_byte..];
        let (span_bytes, span_chars) = match rest.char_indices().nth(self.size) {
            Some((byte, _)) => (byte, self.size),
            None => (rest.len(), rest.chars().count()),
        };

        let start = self.next_char;
        let end = start + span_chars;
        let overlap = if self.index == 0 { 0 } else { self.prev_end.saturating_sub(start) };
        let chunk =
            Chunk { index: self.index, text: rest[..span_bytes].to_string(), start, end, overlap };

        self.index += 1;
        self.prev_end = end;
        if span_bytes == rest.len() {
            self.done = true;
        } else {
            // More than `size` characters remain, so `step < size` is in bounds.
            let advance = rest.char_indices().nth(self.step).map_or(rest.len(), |(b, _)| b);
            self.next_byte += advance;
            self.next_char += self.step;
        }

        Some(chunk)
    }
}

impl FusedIterator for CharWindows<'_> {}

/// Splits text into chunks of whitespace-separated words with configurable overlap.
///
/// A chunk spans from its first word up to the start of the word that follows
/// its last word, so trailing whitespace belongs to the chunk and spans stay
/// contiguous.
#[derive(Debug, Clone)]
pub struct WordChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl WordChunker {
    /// Create a new `WordChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` — maximum number of words per chunk
    /// * `chunk_overlap` — number of overlapping words between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_window(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    /// Lazily iterate over the word chunks of `text`.
    ///
    /// Like [`FixedSizeChunker::windows`], the iterator is `Clone`. Text with
    /// no words yields no chunks.
    pub fn windows<'a>(&self, text: &'a str) -> WordWindows<'a> {
        WordWindows {
            text,
            size: self.chunk_size,
            step: self.chunk_size - self.chunk_overlap,
            next_byte: 0,
            next_char: 0,
            index: 0,
            prev_end: 0,
            done: text.is_empty(),
        }
    }
}

impl Chunker for WordChunker {
    fn chunk(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Err(RagError::EmptyDocumentError);
        }
        Ok(self.windows(text).collect())
    }
}

/// Lazy word windows produced by [`WordChunker::windows`].
#[derive(Debug, Clone)]
pub struct WordWindows<'a> {
    text: &'a str,
    size: usize,
    step: usize,
    next_byte: usize,
    next_char: usize,
    index: usize,
    prev_end: usize,
    done: bool,
}

impl Iterator for WordWindows<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        // Byte and char offsets, relative to `rest`, of the word that starts
        // the next window and of the first word past this one.
        let rest = &self.text[self.next_byte..];
        let mut words = 0;
        let mut in_word = false;
        let mut restart = None;
        let mut boundary = None;
        for (char_pos, (byte, c)) in rest.char_indices().enumerate() {
            if c.is_whitespace() {
                in_word = false;
                continue;
            }
            if in_word {
                continue;
            }
            in_word = true;
            if words == self.step {
                restart = Some((byte, char_pos));
            }
            if words == self.size {
                boundary = Some((byte, char_pos));
                break;
            }
            words += 1;
        }
        if words == 0 {
            self.done = true;
            return None;
        }

        let (span_bytes, span_chars) =
            boundary.unwrap_or_else(|| (rest.len(), rest.chars().count()));
        let start = self.next_char;
        let end = start + span_chars;
        let overlap = if self.index == 0 { 0 } else { self.prev_end.saturating_sub(start) };
        let chunk =
            Chunk { index: self.index, text: rest[..span_bytes].to_string(), start, end, overlap };

        self.index += 1;
        self.prev_end = end;
        match (boundary, restart) {
            (Some(_), Some((byte, chars))) => {
                self.next_byte += byte;
                self.next_char += chars;
            }
            _ => self.done = true,
        }

        Some(chunk)
    }
}

impl FusedIterator for WordWindows<'_> {}
