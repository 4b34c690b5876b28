//! Context assembly and answer generation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ChunkUnit;
use crate::document::SearchResult;
use crate::error::{Result, Stage};
use crate::retry::RetryPolicy;

/// Answer returned when no chunk cleared the similarity threshold or fit the budget.
pub const NOT_FOUND_ANSWER: &str =
    "The document does not contain enough information to answer this question.";

/// Separator placed between chunk texts in an assembled context.
pub const CONTEXT_SEPARATOR: &str = "\n\n";

pub(crate) const SYSTEM_PROMPT: &str = "You are an assistant that answers questions about a \
     single document. Answer only from the provided document context, quote exact figures, \
     dates and conditions, and say so plainly when the context does not contain the answer.";

/// The user prompt sent alongside [`SYSTEM_PROMPT`].
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the document context below.\n\n\
         DOCUMENT CONTEXT:\n{context}\n\n\
         QUESTION:\n{question}\n\n\
         ANSWER:"
    )
}

/// The answer-generation collaborator.
///
/// Implementations receive a question and an already budgeted context and
/// return the answer text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate an answer to `question` from `context`.
    async fn generate(&self, question: &str, context: &str) -> Result<String>;
}

/// A context string built from ranked chunks within a budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// Chunk texts joined by [`CONTEXT_SEPARATOR`].
    pub text: String,
    /// Indices of the included chunks, in rank order.
    pub chunk_indices: Vec<usize>,
    /// Sum of the included chunk lengths, in characters.
    pub chars: usize,
    /// Sum of the included chunk lengths, in the unit the budget is measured in.
    pub used: usize,
}

impl AssembledContext {
    /// Whether no chunk was included.
    pub fn is_empty(&self) -> bool {
        self.chunk_indices.is_empty()
    }
}

fn measure(text: &str, unit: ChunkUnit) -> usize {
    match unit {
        ChunkUnit::Characters => text.chars().count(),
        ChunkUnit::Words => text.split_whitespace().count(),
    }
}

/// Add chunks in rank order until the next one would push the summed chunk
/// length past `budget`, measured in `unit`s. Chunks are never truncated.
pub fn build_context(results: &[SearchResult], budget: usize, unit: ChunkUnit) -> AssembledContext {
    let mut context = AssembledContext::default();
    let mut parts: Vec<&str> = Vec::new();
    for result in results {
        let len = measure(&result.chunk.text, unit);
        if context.used + len > budget {
            break;
        }
        context.used += len;
        context.chars += result.chunk.text.chars().count();
        context.chunk_indices.push(result.chunk.index);
        parts.push(&result.chunk.text);
    }
    context.text = parts.join(CONTEXT_SEPARATOR);
    context
}

/// Builds a bounded context for each question and asks the model to answer.
pub struct AnswerAssembler {
    model: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
    budget: usize,
    unit: ChunkUnit,
}

impl AnswerAssembler {
    /// Create an assembler around `model` whose contexts hold at most
    /// `budget` units of chunk text.
    pub fn new(
        model: Arc<dyn LanguageModel>,
        retry: RetryPolicy,
        budget: usize,
        unit: ChunkUnit,
    ) -> Self {
        Self { model, retry, budget, unit }
    }

    /// The underlying model.
    pub fn model(&self) -> &Arc<dyn LanguageModel> {
        &self.model
    }

    /// Build the context for `results` within this assembler's budget.
    pub fn context(&self, results: &[SearchResult]) -> AssembledContext {
        build_context(results, self.budget, self.unit)
    }

    /// Answer `question` from its ranked chunks.
    ///
    /// Returns [`NOT_FOUND_ANSWER`] without calling the model when the context is empty.
    ///
    /// # Errors
    ///
    /// Returns the model's last error once the retry budget is spent.
    pub async fn answer(&self, question: &str, results: &[SearchResult]) -> Result<String> {
        let context = self.context(results);
        self.answer_with_context(question, &context).await
    }

    /// Answer `question` from an already assembled context.
    ///
    /// # Errors
    ///
    /// Returns the model's last error once the retry budget is spent.
    pub async fn answer_with_context(
        &self,
        question: &str,
        context: &AssembledContext,
    ) -> Result<String> {
        if context.is_empty() {
            info!(model = self.model.name(), "no context for question, answering not found");
            return Ok(NOT_FOUND_ANSWER.to_string());
        }

        debug!(
            model = self.model.name(),
            chunk_count = context.chunk_indices.len(),
            context_chars = context.chars,
            "generating answer"
        );
        self.retry
            .run(Stage::Answer, "generate answer", || self.model.generate(question, &context.text))
            .await
    }
}
