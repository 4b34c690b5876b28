//! Error types for the `docqa-rag` crate.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The pipeline stage an error is attributed to.
///
/// Every externally visible failure names its stage so callers can tell a bad
/// document apart from a flaky provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Request validation and overall deadline handling.
    Request,
    /// Fetching the document and extracting its text.
    Load,
    /// Splitting normalized text into chunks.
    Chunk,
    /// Producing vectors for chunks or questions.
    Embed,
    /// Building or querying the vector index.
    Search,
    /// Assembling context and calling the language model.
    Answer,
}

impl Stage {
    /// Lowercase stage name used in logs and placeholders.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Request => "request",
            Stage::Load => "load",
            Stage::Chunk => "chunk",
            Stage::Embed => "embed",
            Stage::Search => "search",
            Stage::Answer => "answer",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while answering questions about a document.
#[derive(Debug, Error)]
pub enum RagError {
    /// The document could not be fetched: unreachable, non-success status, or too large.
    #[error("Fetch error ({url}): {message}")]
    FetchError {
        /// The URL that was requested.
        url: String,
        /// A description of the failure.
        message: String,
    },

    /// The fetched content is not a PDF, DOCX or email.
    #[error("Unsupported document format: {0}")]
    UnsupportedFormatError(String),

    /// The content looked like a supported format but its text could not be extracted.
    #[error("Extraction error ({format}): {message}")]
    ExtractionError {
        /// The detected format.
        format: String,
        /// A description of the failure.
        message: String,
    },

    /// The document contained no text after normalization.
    #[error("Document is empty after text extraction")]
    EmptyDocumentError,

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// Vectors of different dimensionality were mixed in one index or query.
    #[error("Dimension mismatch at position {position}: expected {expected}, found {found}")]
    DimensionMismatchError {
        /// The dimensionality established by the index.
        expected: usize,
        /// The offending dimensionality.
        found: usize,
        /// Chunk position of the offending vector, or `usize::MAX` for a query.
        position: usize,
    },

    /// The language model failed to produce an answer.
    #[error("Answer error ({model}): {message}")]
    AnswerError {
        /// The model that produced the error.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A single outbound call exceeded its timeout.
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout {
        /// Stage the call belongs to.
        stage: Stage,
        /// Name of the timed-out operation.
        operation: String,
        /// The per-call timeout that elapsed.
        timeout_ms: u64,
    },

    /// The total request deadline elapsed.
    #[error("Request deadline of {deadline_ms} ms exceeded during {stage}")]
    DeadlineExceeded {
        /// Stage that was running when the deadline hit.
        stage: Stage,
        /// The configured deadline.
        deadline_ms: u64,
    },

    /// The request itself is malformed (for example, no questions).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error in the pipeline orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// The stage this error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            RagError::FetchError { .. }
            | RagError::UnsupportedFormatError(_)
            | RagError::ExtractionError { .. } => Stage::Load,
            RagError::EmptyDocumentError => Stage::Chunk,
            RagError::EmbeddingError { .. } => Stage::Embed,
            RagError::DimensionMismatchError { .. } => Stage::Search,
            RagError::AnswerError { .. } => Stage::Answer,
            RagError::Timeout { stage, .. } | RagError::DeadlineExceeded { stage, .. } => *stage,
            RagError::InvalidRequest(_) | RagError::ConfigError(_) | RagError::PipelineError(_) => {
                Stage::Request
            }
        }
    }

    /// Whether a retry of the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingError { .. } | RagError::AnswerError { .. } | RagError::Timeout { .. }
        )
    }

    /// Short error kind, safe to show to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            RagError::FetchError { .. } => "document could not be fetched",
            RagError::UnsupportedFormatError(_) => "unsupported document format",
            RagError::ExtractionError { .. } => "document text could not be extracted",
            RagError::EmptyDocumentError => "document contains no text",
            RagError::EmbeddingError { .. } => "embedding provider unavailable",
            RagError::DimensionMismatchError { .. } => "inconsistent embedding dimensions",
            RagError::AnswerError { .. } => "answer generation failed",
            RagError::Timeout { .. } => "call timed out",
            RagError::DeadlineExceeded { .. } => "request deadline exceeded",
            RagError::InvalidRequest(_) => "invalid request",
            RagError::ConfigError(_) => "invalid configuration",
            RagError::PipelineError(_) => "internal pipeline failure",
        }
    }

    /// A caller-facing description naming the failed stage.
    ///
    /// Unlike `Display`, this never includes provider response bodies.
    pub fn summary(&self) -> String {
        format!("{} stage failed: {}", self.stage(), self.kind())
    }
}

/// A convenience result type for pipeline operations.
pub type Result<T> = std::result::Result<T, RagError>;
