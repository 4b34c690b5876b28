//! Embedding providers and the per-request embedding space.
//!
//! A request embeds its chunks once through [`Embedder::embed_corpus`], which
//! returns the vectors together with an [`EmbeddingSpace`]. Questions are then
//! embedded through that same space, so chunk and question vectors always come
//! from the same path.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{RagError, Result, Stage};
use crate::lexical::LexicalVectorizer;
use crate::retry::RetryPolicy;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. The default [`embed_batch`](EmbeddingProvider::embed_batch)
/// implementation calls [`embed`](EmbeddingProvider::embed) sequentially;
/// backends that support native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embedding vectors for a batch of text inputs, preserving order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

/// Which path produced a request's vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    /// The remote embedding provider.
    Provider,
    /// The local lexical fallback.
    Lexical,
}

impl fmt::Display for EmbeddingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmbeddingSource::Provider => "provider",
            EmbeddingSource::Lexical => "lexical",
        })
    }
}

/// The vector space selected for one request.
///
/// Cloning is cheap; clones share the provider or fitted vectorizer.
#[derive(Clone)]
pub enum EmbeddingSpace {
    /// Vectors come from the remote provider.
    Provider {
        /// The provider that embedded the chunks.
        provider: Arc<dyn EmbeddingProvider>,
        /// Retry policy for question embedding calls.
        retry: RetryPolicy,
    },
    /// Vectors come from a lexical vectorizer fitted on the chunks.
    Lexical(Arc<LexicalVectorizer>),
}

impl fmt::Debug for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingSpace::Provider { provider, .. } => {
                f.debug_tuple("Provider").field(&provider.name()).finish()
            }
            EmbeddingSpace::Lexical(v) => {
                f.debug_tuple("Lexical").field(&v.dimensions()).finish()
            }
        }
    }
}

impl EmbeddingSpace {
    /// Tag of the path this space uses.
    pub fn source(&self) -> EmbeddingSource {
        match self {
            EmbeddingSpace::Provider { .. } => EmbeddingSource::Provider,
            EmbeddingSpace::Lexical(_) => EmbeddingSource::Lexical,
        }
    }

    /// Embed a question in this space.
    ///
    /// # Errors
    ///
    /// On the provider path, returns the last provider error once the retry
    /// budget is spent. There is no fallback here: switching paths for a single
    /// question would compare vectors from different spaces.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            EmbeddingSpace::Provider { provider, retry } => {
                retry.run(Stage::Embed, "embed question", || provider.embed(text)).await
            }
            EmbeddingSpace::Lexical(vectorizer) => Ok(vectorizer.transform(text)),
        }
    }
}

/// Produces chunk vectors for a request and selects its [`EmbeddingSpace`].
pub struct Embedder {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    retry: RetryPolicy,
    batch_size: usize,
    lexical_dimensions: usize,
}

impl Embedder {
    /// Create an embedder that tries `provider` first and falls back to lexical vectors.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        retry: RetryPolicy,
        batch_size: usize,
        lexical_dimensions: usize,
    ) -> Self {
        Self { provider: Some(provider), retry, batch_size: batch_size.max(1), lexical_dimensions }
    }

    /// Create an embedder that only uses lexical vectors.
    pub fn lexical_only(lexical_dimensions: usize) -> Self {
        Self {
            provider: None,
            retry: RetryPolicy::no_retry(),
            batch_size: 1,
            lexical_dimensions,
        }
    }

    /// Embed all chunk texts of a request, preserving order.
    ///
    /// Texts are sent to the provider in batches of at most `batch_size`. If any
    /// batch still fails after its retries, every text is re-embedded with a
    /// lexical vectorizer fitted on the whole corpus, and the returned space is
    /// [`EmbeddingSpace::Lexical`].
    ///
    /// # Errors
    ///
    /// Errors attributed to a stage other than [`Stage::Embed`] propagate
    /// unchanged. Provider errors, timeouts and short batches never do.
    pub async fn embed_corpus(&self, texts: &[&str]) -> Result<(EmbeddingSpace, Vec<Vec<f32>>)> {
        if let Some(provider) = &self.provider {
            match self.embed_with_provider(provider, texts).await {
                Ok(vectors) => {
                    info!(
                        provider = provider.name(),
                        vector_count = vectors.len(),
                        "embedded chunks with provider"
                    );
                    let space = EmbeddingSpace::Provider {
                        provider: Arc::clone(provider),
                        retry: self.retry.clone(),
                    };
                    return Ok((space, vectors));
                }
                Err(e) if e.stage() == Stage::Embed => {
                    warn!(
                        provider = provider.name(),
                        summary = %e.summary(),
                        error = %e,
                        "embedding provider unavailable, falling back to lexical vectors"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let vectorizer = LexicalVectorizer::fit(texts, self.lexical_dimensions);
        let vectors = texts.iter().map(|t| vectorizer.transform(t)).collect::<Vec<_>>();
        info!(
            dimensions = vectorizer.dimensions(),
            vector_count = vectors.len(),
            "embedded chunks with lexical vectorizer"
        );
        Ok((EmbeddingSpace::Lexical(Arc::new(vectorizer)), vectors))
    }

    async fn embed_with_provider(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        texts: &[&str],
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for (batch_no, batch) in texts.chunks(self.batch_size).enumerate() {
            debug!(provider = provider.name(), batch_no, batch_size = batch.len(), "embedding batch");
            let embedded = self
                .retry
                .run(Stage::Embed, "embed chunk batch", || provider.embed_batch(batch))
                .await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingError {
                    provider: provider.name().to_string(),
                    message: format!(
                        "expected {} vectors for batch {batch_no}, got {}",
                        batch.len(),
                        embedded.len()
                    ),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}
