//! Question answering pipeline orchestrator.
//!
//! [`RagPipeline`] runs load → chunk → embed → index once per document, then
//! answers every question concurrently against the resulting [`Retriever`].
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagPipeline, RagConfig};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .source(Arc::new(HttpDocumentLoader::new(max_bytes, timeout)?))
//!     .embedding_provider(Arc::new(my_embedder))
//!     .language_model(Arc::new(my_model))
//!     .build()?;
//!
//! let answers = pipeline.answer_questions(url, &questions).await?;
//! ```

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::answer::{AnswerAssembler, LanguageModel};
use crate::chunking::{Chunker, chunker_for};
use crate::config::RagConfig;
use crate::document::{DetailedAnswer, QueryRequest, QueryResponse, SearchResult, confidence_score};
use crate::embedding::{Embedder, EmbeddingProvider, EmbeddingSource, EmbeddingSpace};
use crate::error::{RagError, Result, Stage};
use crate::index::VectorIndex;
use crate::loader::DocumentSource;

/// Answer text for a question whose processing failed.
///
/// Names the failed stage without echoing provider responses.
pub fn failure_answer(err: &RagError) -> String {
    format!("Unable to answer this question: {}.", err.summary())
}

/// The searchable state of one prepared document.
///
/// Cloning is cheap; clones share the index and embedding space, so one
/// retriever serves every question task of a request.
#[derive(Debug, Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    space: EmbeddingSpace,
    top_k: usize,
    threshold: f32,
}

impl Retriever {
    /// Wrap an index with the space its vectors came from.
    pub fn new(index: VectorIndex, space: EmbeddingSpace, top_k: usize, threshold: f32) -> Self {
        Self { index: Arc::new(index), space, top_k, threshold }
    }

    /// The chunk index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Which path embedded the chunks.
    pub fn source(&self) -> EmbeddingSource {
        self.space.source()
    }

    /// Minimum similarity a chunk needs to be returned.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embed `question` and return up to `top_k` chunks above the threshold.
    ///
    /// An empty list means nothing in the document is relevant.
    ///
    /// # Errors
    ///
    /// Returns the embedding error if the question cannot be embedded, or
    /// [`RagError::DimensionMismatchError`] if its vector does not fit the index.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<SearchResult>> {
        let query = self.space.embed_query(question).await?;
        let results = self.index.search(&query, self.top_k, self.threshold)?;
        debug!(
            result_count = results.len(),
            top_score = results.first().map(|r| r.score),
            "retrieved chunks"
        );
        Ok(results)
    }
}

/// Answer one question, turning recoverable failures into a placeholder answer.
///
/// Only a dimension mismatch escapes as an error.
async fn answer_question(
    retriever: &Retriever,
    assembler: &AnswerAssembler,
    question: &str,
) -> Result<DetailedAnswer> {
    let embedding_source = retriever.source();
    let relevant_chunks = match retriever.retrieve(question).await {
        Ok(results) => results,
        Err(e @ RagError::DimensionMismatchError { .. }) => return Err(e),
        Err(e) => {
            error!(error = %e, stage = %e.stage(), "question retrieval failed");
            return Ok(DetailedAnswer {
                question: question.to_string(),
                answer: failure_answer(&e),
                relevant_chunks: Vec::new(),
                context_chunks: Vec::new(),
                confidence: 0.0,
                embedding_source,
            });
        }
    };

    let context = assembler.context(&relevant_chunks);
    let answer = match assembler.answer_with_context(question, &context).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(error = %e, stage = %e.stage(), "answer generation failed");
            failure_answer(&e)
        }
    };

    Ok(DetailedAnswer {
        question: question.to_string(),
        answer,
        confidence: confidence_score(&relevant_chunks),
        relevant_chunks,
        context_chunks: context.chunk_indices,
        embedding_source,
    })
}

/// The question answering pipeline.
///
/// Construct one via [`RagPipeline::builder()`]. A pipeline holds no
/// per-request state and can serve concurrent requests.
pub struct RagPipeline {
    config: RagConfig,
    source: Arc<dyn DocumentSource>,
    chunker: Arc<dyn Chunker>,
    embedder: Arc<Embedder>,
    assembler: Arc<AnswerAssembler>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Fetch `url` and build its retriever.
    ///
    /// # Errors
    ///
    /// Returns load, chunk and index errors. Embedding provider failures
    /// fall back to lexical vectors instead.
    pub async fn prepare(&self, url: &str) -> Result<Retriever> {
        let mut stage = Stage::Load;
        self.prepare_tracked(Some(url), None, &mut stage).await
    }

    /// Build a retriever from already normalized document text.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyDocumentError`] for blank text, or an index error.
    pub async fn prepare_text(&self, text: &str) -> Result<Retriever> {
        let mut stage = Stage::Chunk;
        self.prepare_tracked(None, Some(text), &mut stage).await
    }

    /// `stage` is updated as preparation advances so a deadline can name it.
    async fn prepare_tracked(
        &self,
        url: Option<&str>,
        text: Option<&str>,
        stage: &mut Stage,
    ) -> Result<Retriever> {
        let loaded;
        let text = match (url, text) {
            (_, Some(text)) => text,
            (Some(url), None) => {
                *stage = Stage::Load;
                loaded = self.source.load(url).await?;
                loaded.text.as_str()
            }
            (None, None) => {
                return Err(RagError::InvalidRequest("no document given".to_string()));
            }
        };

        *stage = Stage::Chunk;
        let chunks = self.chunker.chunk(text)?;
        info!(chunk_count = chunks.len(), "chunked document");

        *stage = Stage::Embed;
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let (space, vectors) = self.embedder.embed_corpus(&texts).await?;

        *stage = Stage::Search;
        let index = VectorIndex::build(chunks, vectors).map_err(|e| {
            error!(error = %e, "failed to build vector index");
            e
        })?;

        let threshold = match space.source() {
            EmbeddingSource::Provider => self.config.similarity_threshold,
            EmbeddingSource::Lexical => {
                self.config.similarity_threshold * self.config.lexical_threshold_scale
            }
        };
        info!(
            chunk_count = index.len(),
            dimensions = index.dimensions(),
            embedding_source = %space.source(),
            threshold,
            "prepared document"
        );
        Ok(Retriever::new(index, space, self.config.top_k, threshold))
    }

    /// Answer `questions` about the document at `url`, one answer per question, in order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidRequest`] for an empty question list, any
    /// load or chunk error, and [`RagError::DeadlineExceeded`] if preparation
    /// outlives the request deadline. Per-question failures become placeholder
    /// answers instead.
    pub async fn answer_questions(&self, url: &str, questions: &[String]) -> Result<Vec<String>> {
        let detailed = self.explain_questions(url, questions).await?;
        Ok(detailed.into_iter().map(|d| d.answer).collect())
    }

    /// Answer `questions` about already extracted `text`.
    ///
    /// # Errors
    ///
    /// As [`answer_questions`](Self::answer_questions), without load errors.
    pub async fn answer_questions_for_text(
        &self,
        text: &str,
        questions: &[String],
    ) -> Result<Vec<String>> {
        let detailed = self.run(None, Some(text), questions).await?;
        Ok(detailed.into_iter().map(|d| d.answer).collect())
    }

    /// Like [`answer_questions`](Self::answer_questions), but returns the
    /// retrieved chunks, context and confidence behind each answer.
    ///
    /// # Errors
    ///
    /// As [`answer_questions`](Self::answer_questions).
    pub async fn explain_questions(
        &self,
        url: &str,
        questions: &[String],
    ) -> Result<Vec<DetailedAnswer>> {
        self.run(Some(url), None, questions).await
    }

    /// Serve a [`QueryRequest`].
    ///
    /// # Errors
    ///
    /// As [`answer_questions`](Self::answer_questions).
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let answers = self.answer_questions(&request.documents, &request.questions).await?;
        Ok(QueryResponse { answers })
    }

    async fn run(
        &self,
        url: Option<&str>,
        text: Option<&str>,
        questions: &[String],
    ) -> Result<Vec<DetailedAnswer>> {
        if questions.is_empty() {
            return Err(RagError::InvalidRequest("at least one question is required".to_string()));
        }

        let deadline = Instant::now() + self.config.request_deadline();
        let mut stage = Stage::Load;
        let prepared =
            tokio::time::timeout_at(deadline, self.prepare_tracked(url, text, &mut stage)).await;
        let retriever = match prepared {
            Ok(result) => result.map_err(|e| {
                error!(error = %e, stage = %e.stage(), "document preparation failed");
                e
            })?,
            Err(_) => {
                error!(%stage, deadline_ms = self.config.request_deadline_ms, "request deadline exceeded");
                return Err(RagError::DeadlineExceeded {
                    stage,
                    deadline_ms: self.config.request_deadline_ms,
                });
            }
        };

        self.answer_all(retriever, questions, deadline).await
    }

    async fn answer_all(
        &self,
        retriever: Retriever,
        questions: &[String],
        deadline: Instant,
    ) -> Result<Vec<DetailedAnswer>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_questions.max(1)));
        let mut tasks = JoinSet::new();
        for (position, question) in questions.iter().enumerate() {
            let retriever = retriever.clone();
            let assembler = Arc::clone(&self.assembler);
            let semaphore = Arc::clone(&semaphore);
            let question = question.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (position, answer_question(&retriever, &assembler, &question).await)
            });
        }

        let mut slots: Vec<Option<DetailedAnswer>> = vec![None; questions.len()];
        let mut deadline_hit = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((position, Ok(answer))))) => slots[position] = Some(answer),
                Ok(Some(Ok((_, Err(e))))) => {
                    error!(error = %e, "fatal error while answering, aborting request");
                    tasks.abort_all();
                    return Err(e);
                }
                Ok(Some(Err(join_error))) => {
                    error!(error = %join_error, "question task did not complete");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = tasks.len(),
                        deadline_ms = self.config.request_deadline_ms,
                        "request deadline reached, aborting unanswered questions"
                    );
                    tasks.abort_all();
                    deadline_hit = true;
                    break;
                }
            }
        }

        let missing = if deadline_hit {
            RagError::DeadlineExceeded {
                stage: Stage::Answer,
                deadline_ms: self.config.request_deadline_ms,
            }
        } else {
            RagError::PipelineError("question task did not complete".to_string())
        };
        let source = retriever.source();
        let answers: Vec<DetailedAnswer> = slots
            .into_iter()
            .zip(questions)
            .map(|(slot, question)| {
                slot.unwrap_or_else(|| DetailedAnswer {
                    question: question.clone(),
                    answer: failure_answer(&missing),
                    relevant_chunks: Vec::new(),
                    context_chunks: Vec::new(),
                    confidence: 0.0,
                    embedding_source: source,
                })
            })
            .collect();

        info!(question_count = answers.len(), embedding_source = %source, "answered questions");
        Ok(answers)
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `config`, `source` and `language_model` are required. Without an
/// embedding provider the pipeline uses lexical vectors only; without a
/// chunker it builds the one selected by [`RagConfig::chunk_unit`].
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .source(Arc::new(loader))
///     .embedding_provider(Arc::new(embedder))  // optional
///     .language_model(Arc::new(model))
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    source: Option<Arc<dyn DocumentSource>>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    language_model: Option<Arc<dyn LanguageModel>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the document source.
    pub fn source(mut self, source: Arc<dyn DocumentSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the chunker selected by the configuration.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the remote embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the language model used to generate answers.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing.
    pub fn build(self) -> Result<RagPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::ConfigError("config is required".to_string()))?;
        let source =
            self.source.ok_or_else(|| RagError::ConfigError("source is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::ConfigError("language_model is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::from(chunker_for(&config)?),
        };

        let embedder = match self.embedding_provider {
            Some(provider) => Embedder::new(
                provider,
                config.retry.clone(),
                config.embedding_batch_size,
                config.lexical_dimensions,
            ),
            None => Embedder::lexical_only(config.lexical_dimensions),
        };
        let assembler = AnswerAssembler::new(
            language_model,
            config.retry.clone(),
            config.context_budget(),
            config.chunk_unit,
        );

        Ok(RagPipeline {
            config,
            source,
            chunker,
            embedder: Arc::new(embedder),
            assembler: Arc::new(assembler),
        })
    }
}
