//! # docqa-rag
//!
//! Retrieval pipeline for answering natural-language questions about a single
//! remote document (PDF, DOCX or email).
//!
//! ## Features
//!
//! - **Loading**: HTTP fetch with a size cap, format sniffing, text extraction
//! - **Chunking**: overlapping character or word windows that cover the text
//! - **Embedding**: OpenAI-compatible provider with retries, plus a
//!   deterministic lexical fallback selected once per request
//! - **Retrieval**: in-memory cosine index, top-k with a similarity threshold
//! - **Answering**: budgeted context assembly and an LLM call per question,
//!   run concurrently with per-question failure isolation
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{
//!     HttpDocumentLoader, OpenAIChatModel, OpenAIEmbeddingProvider, ProviderConfig, RagConfig,
//!     RagPipeline,
//! };
//!
//! let config = RagConfig::from_env()?;
//! let provider = ProviderConfig::from_env()?;
//! let timeout = config.retry.call_timeout();
//!
//! let pipeline = RagPipeline::builder()
//!     .source(Arc::new(HttpDocumentLoader::new(config.max_document_bytes, timeout)?))
//!     .embedding_provider(Arc::new(OpenAIEmbeddingProvider::new(&provider, timeout)?))
//!     .language_model(Arc::new(OpenAIChatModel::new(&provider, timeout)?))
//!     .config(config)
//!     .build()?;
//!
//! let answers = pipeline
//!     .answer_questions("https://example.com/policy.pdf", &["What is the grace period?".into()])
//!     .await?;
//! ```

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod loader;
pub mod openai;
pub mod pipeline;
pub mod retry;

pub use answer::{AnswerAssembler, AssembledContext, LanguageModel, NOT_FOUND_ANSWER, build_context};
pub use chunking::{
    CharWindows, Chunker, FixedSizeChunker, WordChunker, WordWindows, chunker_for,
};
pub use config::{ChunkUnit, ProviderConfig, RagConfig, RagConfigBuilder};
pub use document::{
    Chunk, DetailedAnswer, Document, DocumentFormat, QueryRequest, QueryResponse, SearchResult,
    confidence_score,
};
pub use embedding::{Embedder, EmbeddingProvider, EmbeddingSource, EmbeddingSpace};
pub use error::{RagError, Result, Stage};
pub use index::{VectorIndex, cosine_similarity};
pub use lexical::LexicalVectorizer;
pub use loader::{DocumentSource, HttpDocumentLoader, detect_format, normalize_text};
pub use openai::{OpenAIChatModel, OpenAIEmbeddingProvider};
pub use pipeline::{RagPipeline, RagPipelineBuilder, Retriever, failure_answer};
pub use retry::RetryPolicy;
