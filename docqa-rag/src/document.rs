//! Data types for documents, chunks, search results and answers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingSource;

/// Formats the loader can extract text from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// Office Open XML word-processing document.
    Docx,
    /// RFC 822 / MIME email message.
    Email,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Email => "email",
        })
    }
}

/// A fetched document with its extracted, normalized text.
///
/// Lives for one request only; it is dropped once its text has been chunked.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The URL the document was fetched from.
    pub url: String,
    /// Detected format.
    pub format: DocumentFormat,
    /// The raw bytes as fetched.
    pub raw: Vec<u8>,
    /// Extracted plain text with whitespace normalized.
    pub text: String,
}

/// A segment of a document's normalized text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Sequence position within the document, starting at zero.
    pub index: usize,
    /// The text of the chunk; a substring of the normalized document text.
    pub text: String,
    /// Character offset of the first character in the document text.
    pub start: usize,
    /// Character offset one past the last character in the document text.
    pub end: usize,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
}

impl Chunk {
    /// Length of the chunk in characters.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// A retrieved [`Chunk`] paired with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query (higher is more relevant).
    pub score: f32,
}

/// An answer together with the evidence it was generated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedAnswer {
    /// The question asked.
    pub question: String,
    /// The model's answer, or a placeholder.
    pub answer: String,
    /// Chunks that cleared the threshold, in rank order.
    pub relevant_chunks: Vec<SearchResult>,
    /// Indices of the chunks that fit in the context budget.
    pub context_chunks: Vec<usize>,
    /// Rank-weighted mean similarity of `relevant_chunks`, in `[0, 1]`.
    pub confidence: f32,
    /// Which embedding path produced the vectors.
    pub embedding_source: EmbeddingSource,
}

/// Rank-weighted mean of similarity scores: weight `1 / (rank + 1)`, capped at 1.0.
///
/// Returns 0.0 for an empty result list.
pub fn confidence_score(results: &[SearchResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let (weighted, total) = results.iter().enumerate().fold((0.0f32, 0.0f32), |(w, t), (i, r)| {
        let weight = 1.0 / (i as f32 + 1.0);
        (w + r.score * weight, t + weight)
    });
    (weighted / total).clamp(0.0, 1.0)
}

/// A batch of questions about one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    /// URL of the document (PDF, DOCX or email).
    pub documents: String,
    /// Questions to answer, in order.
    pub questions: Vec<String>,
}

/// Answers for a [`QueryRequest`], one per question, in the same order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    /// The answers.
    pub answers: Vec<String>,
}
