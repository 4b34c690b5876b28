//! Configuration for the retrieval pipeline and its remote providers.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Unit in which `chunk_size` and `chunk_overlap` are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    #[default]
    Characters,
    /// Whitespace-separated words.
    Words,
}

impl FromStr for ChunkUnit {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "characters" | "chars" => Ok(ChunkUnit::Characters),
            "words" => Ok(ChunkUnit::Words),
            other => Err(RagError::ConfigError(format!("unknown chunk unit '{other}'"))),
        }
    }
}

/// Configuration parameters for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size, in `chunk_unit`s.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in `chunk_unit`s.
    pub chunk_overlap: usize,
    /// Unit for chunk size and overlap.
    pub chunk_unit: ChunkUnit,
    /// Maximum number of chunks selected per question.
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to be selected.
    pub similarity_threshold: f32,
    /// Multiplier applied to `similarity_threshold` on the lexical fallback path.
    pub lexical_threshold_scale: f32,
    /// Maximum combined length, in characters, of chunk text passed to the model.
    pub max_context_chars: usize,
    /// Maximum combined length, in words, of chunk text passed to the model
    /// when `chunk_unit` is [`ChunkUnit::Words`].
    pub max_context_words: usize,
    /// Maximum document size in bytes.
    pub max_document_bytes: u64,
    /// Maximum texts per embedding provider call.
    pub embedding_batch_size: usize,
    /// Dimensionality of lexical fallback vectors.
    pub lexical_dimensions: usize,
    /// Questions answered concurrently within one request.
    pub max_concurrent_questions: usize,
    /// Deadline for a whole request, in milliseconds.
    pub request_deadline_ms: u64,
    /// Timeout and backoff applied to every outbound call.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunk_unit: ChunkUnit::Characters,
            top_k: 10,
            similarity_threshold: 0.3,
            lexical_threshold_scale: 0.5,
            max_context_chars: 6000,
            max_context_words: 1500,
            max_document_bytes: 50 * 1024 * 1024,
            embedding_batch_size: 96,
            lexical_dimensions: 1024,
            max_concurrent_questions: 4,
            request_deadline_ms: 120_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Build a configuration from `DOCQA_*` environment variables over the defaults.
    ///
    /// Recognized variables: `DOCQA_CHUNK_SIZE`, `DOCQA_CHUNK_OVERLAP`,
    /// `DOCQA_CHUNK_UNIT`, `DOCQA_TOP_K`, `DOCQA_SIMILARITY_THRESHOLD`,
    /// `DOCQA_LEXICAL_THRESHOLD_SCALE`, `DOCQA_MAX_CONTEXT_CHARS`, `DOCQA_MAX_CONTEXT_WORDS`,
    /// `DOCQA_MAX_DOC_SIZE_MB`, `DOCQA_EMBEDDING_BATCH_SIZE`,
    /// `DOCQA_LEXICAL_DIMENSIONS`, `DOCQA_MAX_CONCURRENT_QUESTIONS`,
    /// `DOCQA_REQUEST_DEADLINE_MS`, `DOCQA_CALL_TIMEOUT_MS`, `DOCQA_MAX_RETRIES`,
    /// `DOCQA_RETRY_BASE_DELAY_MS`, `DOCQA_RETRY_MAX_DELAY_MS`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Used by [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = RagConfig::builder();
        let mut config = RagConfig::default();

        if let Some(v) = parse_var(&lookup, "DOCQA_CHUNK_SIZE")? {
            config.chunk_size = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_CHUNK_OVERLAP")? {
            config.chunk_overlap = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_CHUNK_UNIT")? {
            config.chunk_unit = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_TOP_K")? {
            config.top_k = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_SIMILARITY_THRESHOLD")? {
            config.similarity_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_LEXICAL_THRESHOLD_SCALE")? {
            config.lexical_threshold_scale = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_MAX_CONTEXT_CHARS")? {
            config.max_context_chars = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_MAX_CONTEXT_WORDS")? {
            config.max_context_words = v;
        }
        if let Some(mb) = parse_var::<u64, _>(&lookup, "DOCQA_MAX_DOC_SIZE_MB")? {
            config.max_document_bytes = mb.checked_mul(1024 * 1024).ok_or_else(|| {
                RagError::ConfigError(format!("DOCQA_MAX_DOC_SIZE_MB={mb} is out of range"))
            })?;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_EMBEDDING_BATCH_SIZE")? {
            config.embedding_batch_size = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_LEXICAL_DIMENSIONS")? {
            config.lexical_dimensions = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_MAX_CONCURRENT_QUESTIONS")? {
            config.max_concurrent_questions = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_REQUEST_DEADLINE_MS")? {
            config.request_deadline_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_CALL_TIMEOUT_MS")? {
            config.retry.call_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = v;
        }

        builder.config = config;
        builder.build()
    }

    /// The context budget, measured in `chunk_unit`s.
    pub fn context_budget(&self) -> usize {
        match self.chunk_unit {
            ChunkUnit::Characters => self.max_context_chars,
            ChunkUnit::Words => self.max_context_words,
        }
    }

    /// The total request deadline.
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RagError::ConfigError(format!("{key}='{raw}': {e}"))),
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the unit chunk size and overlap are measured in.
    pub fn chunk_unit(mut self, unit: ChunkUnit) -> Self {
        self.config.chunk_unit = unit;
        self
    }

    /// Set the maximum number of chunks selected per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for selecting chunks.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set the threshold multiplier used on the lexical fallback path.
    pub fn lexical_threshold_scale(mut self, scale: f32) -> Self {
        self.config.lexical_threshold_scale = scale;
        self
    }

    /// Set the context budget in characters.
    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    /// Set the context budget in words, used with [`ChunkUnit::Words`].
    pub fn max_context_words(mut self, words: usize) -> Self {
        self.config.max_context_words = words;
        self
    }

    /// Set the maximum document size in bytes.
    pub fn max_document_bytes(mut self, bytes: u64) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    /// Set the maximum number of texts per embedding call.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the dimensionality of lexical fallback vectors.
    pub fn lexical_dimensions(mut self, dims: usize) -> Self {
        self.config.lexical_dimensions = dims;
        self
    }

    /// Set how many questions are answered concurrently.
    pub fn max_concurrent_questions(mut self, n: usize) -> Self {
        self.config.max_concurrent_questions = n;
        self
    }

    /// Set the total request deadline.
    pub fn request_deadline(mut self, deadline: Duration) -> Self {
        self.config.request_deadline_ms = deadline.as_millis() as u64;
        self
    }

    /// Set the retry and timeout policy for outbound calls.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k`, `embedding_batch_size`, `lexical_dimensions` or
    ///   `max_concurrent_questions` is zero
    /// - `similarity_threshold` is outside `[-1, 1]`
    /// - `lexical_threshold_scale` is not finite or outside `(0, 1]`
    /// - the context budget for `chunk_unit` cannot hold one full chunk
    pub fn build(self) -> Result<RagConfig> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if c.embedding_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embedding_batch_size must be greater than zero".to_string(),
            ));
        }
        if c.lexical_dimensions == 0 {
            return Err(RagError::ConfigError(
                "lexical_dimensions must be greater than zero".to_string(),
            ));
        }
        if c.max_concurrent_questions == 0 {
            return Err(RagError::ConfigError(
                "max_concurrent_questions must be greater than zero".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&c.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                c.similarity_threshold
            )));
        }
        if !(c.lexical_threshold_scale > 0.0 && c.lexical_threshold_scale <= 1.0) {
            return Err(RagError::ConfigError(format!(
                "lexical_threshold_scale ({}) must be within (0, 1]",
                c.lexical_threshold_scale
            )));
        }
        let budget_name = match c.chunk_unit {
            ChunkUnit::Characters => "max_context_chars",
            ChunkUnit::Words => "max_context_words",
        };
        if c.context_budget() < c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "{budget_name} ({}) must fit at least one chunk ({})",
                c.context_budget(),
                c.chunk_size
            )));
        }
        Ok(self.config)
    }
}

/// Credentials and model selection for the remote embedding and chat providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// API key sent as a bearer token.
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API, without a trailing slash.
    pub base_url: String,
    /// Embedding model name.
    pub embedding_model: String,
    /// Chat model name.
    pub chat_model: String,
    /// Maximum tokens in a generated answer.
    pub max_tokens: u32,
    /// Sampling temperature for answers.
    pub temperature: f32,
    /// Whether the remote embedding provider is used at all.
    pub remote_embeddings: bool,
}

impl ProviderConfig {
    /// Create a provider configuration for the given key.
    ///
    /// The base URL is inferred from the key: `sk-or-` keys target OpenRouter,
    /// anything else targets OpenAI.
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let openrouter = api_key.starts_with("sk-or-");
        let base_url = if openrouter { OPENROUTER_BASE_URL } else { OPENAI_BASE_URL };
        let chat_model = if openrouter { "openai/gpt-4o-mini" } else { "gpt-4o-mini" };
        Self {
            api_key,
            base_url: base_url.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            chat_model: chat_model.to_string(),
            max_tokens: 500,
            temperature: 0.1,
            remote_embeddings: true,
        }
    }

    /// Read provider settings from the environment.
    ///
    /// `OPENAI_API_KEY` is required. `OPENAI_BASE_URL`, `DOCQA_EMBEDDING_MODEL`,
    /// `DOCQA_CHAT_MODEL`, `DOCQA_MAX_TOKENS` and `DOCQA_TEMPERATURE` override
    /// the inferred defaults; `DOCQA_EMBEDDINGS=lexical` disables remote embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the key is missing or a value fails to parse.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build provider settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RagError::ConfigError("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = Self::new(api_key.trim());
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|u| !u.trim().is_empty()) {
            config.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup("DOCQA_EMBEDDING_MODEL").filter(|m| !m.trim().is_empty()) {
            config.embedding_model = model.trim().to_string();
        }
        if let Some(model) = lookup("DOCQA_CHAT_MODEL").filter(|m| !m.trim().is_empty()) {
            config.chat_model = model.trim().to_string();
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_MAX_TOKENS")? {
            config.max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "DOCQA_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(mode) = lookup("DOCQA_EMBEDDINGS") {
            config.remote_embeddings = !mode.trim().eq_ignore_ascii_case("lexical");
        }
        Ok(config)
    }
}
