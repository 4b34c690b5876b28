//! End-to-end pipeline tests with in-process embedding and language model doubles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::answer::{LanguageModel, NOT_FOUND_ANSWER};
use docqa_rag::config::{ChunkUnit, RagConfig};
use docqa_rag::document::{Document, DocumentFormat, QueryRequest};
use docqa_rag::embedding::{EmbeddingProvider, EmbeddingSource};
use docqa_rag::error::{RagError, Result, Stage};
use docqa_rag::loader::DocumentSource;
use docqa_rag::pipeline::RagPipeline;
use docqa_rag::retry::RetryPolicy;

const GRACE_DOC: &str = "A grace period of thirty days is provided for premium payment.";

const VOCAB: &[&str] = &[
    "grace", "period", "thirty", "days", "premium", "payment", "dental", "implants", "cover",
    "policy", "maternity", "waiting",
];

/// Bag-of-keywords embeddings: one dimension per vocabulary word.
#[derive(Default)]
struct KeywordEmbedder {
    calls: AtomicUsize,
}

fn keyword_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for token in text.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if let Some(i) = VOCAB.iter().position(|w| *w == token) {
            v[i % dims] += 1.0;
        }
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(text, VOCAB.len()))
    }
}

/// A provider that is always down.
#[derive(Default)]
struct DownEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for DownEmbedder {
    fn name(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RagError::EmbeddingError {
            provider: "down".into(),
            message: "503 Service Unavailable: secret upstream body".into(),
        })
    }
}

/// Embeds chunks and questions with different dimensionality.
struct SkewedEmbedder;

#[async_trait]
impl EmbeddingProvider for SkewedEmbedder {
    fn name(&self) -> &str {
        "skewed"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(keyword_vector(text, 3))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t, 4)).collect())
    }
}

/// Records every (question, context) pair and answers deterministically.
#[derive(Default)]
struct RecordingModel {
    calls: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl RecordingModel {
    fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push((question.to_string(), context.to_string()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if question.contains("explode") {
            return Err(RagError::AnswerError {
                model: "recording".into(),
                message: "upstream said: internal stack trace".into(),
            });
        }
        Ok(format!("answer: {question}"))
    }
}

/// Serves fixed text for any URL, optionally after a delay.
struct StaticSource {
    text: String,
    delay: Option<Duration>,
}

impl StaticSource {
    fn new(text: &str) -> Self {
        Self { text: text.to_string(), delay: None }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn load(&self, url: &str) -> Result<Document> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Document {
            url: url.to_string(),
            format: DocumentFormat::Pdf,
            raw: self.text.clone().into_bytes(),
            text: self.text.clone(),
        })
    }
}

fn fast_retry(retries: u32) -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(retries)
        .with_backoff(Duration::ZERO, Duration::ZERO)
}

fn pipeline(
    config: RagConfig,
    source: StaticSource,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    model: Arc<RecordingModel>,
) -> RagPipeline {
    let mut builder =
        RagPipeline::builder().config(config).source(Arc::new(source)).language_model(model);
    if let Some(provider) = provider {
        builder = builder.embedding_provider(provider);
    }
    builder.build().unwrap()
}

fn questions(qs: &[&str]) -> Vec<String> {
    qs.iter().map(|q| q.to_string()).collect()
}

#[tokio::test]
async fn single_chunk_document_is_the_context() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().retry(fast_retry(0)).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model.clone(),
    );

    let question = "What is the grace period for premium payment?";
    let detailed =
        pipeline.explain_questions("https://x.test/policy.pdf", &questions(&[question])).await.unwrap();

    assert_eq!(detailed.len(), 1);
    assert_eq!(detailed[0].answer, format!("answer: {question}"));
    assert_eq!(detailed[0].context_chunks, vec![0]);
    assert_eq!(detailed[0].embedding_source, EmbeddingSource::Provider);
    assert!(detailed[0].confidence > 0.3);
    assert_eq!(model.calls(), vec![(question.to_string(), GRACE_DOC.to_string())]);
}

#[tokio::test]
async fn unmatched_question_gets_not_found_without_model_call() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().retry(fast_retry(0)).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model.clone(),
    );

    let answers = pipeline
        .answer_questions(
            "https://x.test/policy.pdf",
            &questions(&["What is the grace period?", "Does the policy cover dental implants?"]),
        )
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    assert_eq!(answers[0], "answer: What is the grace period?");
    assert_eq!(answers[1], NOT_FOUND_ANSWER);
    assert_eq!(model.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn provider_outage_falls_back_to_lexical_for_whole_request() {
    let provider = Arc::new(DownEmbedder::default());
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().retry(fast_retry(2)).build().unwrap();
    let pipeline =
        pipeline(config, StaticSource::new(GRACE_DOC), Some(provider.clone()), model.clone());

    let detailed = pipeline
        .explain_questions(
            "https://x.test/policy.pdf",
            &questions(&["What is the grace period?", "How many days for premium payment?"]),
        )
        .await
        .unwrap();

    // One batch, first attempt plus two retries; questions never touch the provider.
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(detailed.len(), 2);
    for answer in &detailed {
        assert_eq!(answer.embedding_source, EmbeddingSource::Lexical);
        assert!(answer.answer.starts_with("answer: "));
        assert_eq!(answer.context_chunks, vec![0]);
    }
}

#[tokio::test]
async fn lexical_only_pipeline_answers_without_provider() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().build().unwrap();
    let pipeline = pipeline(config, StaticSource::new(GRACE_DOC), None, model.clone());

    let retriever = pipeline.prepare("https://x.test/policy.pdf").await.unwrap();
    assert_eq!(retriever.source(), EmbeddingSource::Lexical);
    assert!((retriever.threshold() - 0.15).abs() < 1e-6);

    let results = retriever.retrieve("grace period").await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.text, GRACE_DOC);
}

#[tokio::test]
async fn answer_failure_is_isolated_to_its_question() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().retry(fast_retry(1)).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model.clone(),
    );

    let answers = pipeline
        .answer_questions(
            "https://x.test/policy.pdf",
            &questions(&["grace period explode", "What is the grace period?"]),
        )
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    assert!(answers[0].contains("answer stage failed"), "got {}", answers[0]);
    assert!(!answers[0].contains("stack trace"));
    assert_eq!(answers[1], "answer: What is the grace period?");
    // Failing question: first attempt plus one retry.
    let exploding = model.calls().iter().filter(|(q, _)| q.contains("explode")).count();
    assert_eq!(exploding, 2);
}

#[tokio::test]
async fn empty_document_fails_before_embedding() {
    let provider = Arc::new(KeywordEmbedder::default());
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().build().unwrap();
    let pipeline = pipeline(config, StaticSource::new(""), Some(provider.clone()), model.clone());

    let err = pipeline
        .answer_questions("https://x.test/blank.pdf", &questions(&["anything?"]))
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::EmptyDocumentError));
    assert_eq!(err.stage(), Stage::Chunk);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn empty_question_list_is_invalid() {
    let model = Arc::new(RecordingModel::default());
    let pipeline =
        pipeline(RagConfig::default(), StaticSource::new(GRACE_DOC), None, model.clone());

    let err = pipeline.answer_questions("https://x.test/policy.pdf", &[]).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidRequest(_)));
}

#[tokio::test]
async fn query_dimension_mismatch_is_fatal() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().retry(fast_retry(0)).build().unwrap();
    let pipeline =
        pipeline(config, StaticSource::new(GRACE_DOC), Some(Arc::new(SkewedEmbedder)), model);

    let err = pipeline
        .answer_questions("https://x.test/policy.pdf", &questions(&["grace period?"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatchError { .. }));
}

#[tokio::test(start_paused = true)]
async fn concurrency_is_bounded_and_order_preserved() {
    let model = Arc::new(RecordingModel::with_delay(Duration::from_millis(100)));
    let config = RagConfig::builder().max_concurrent_questions(2).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model.clone(),
    );

    let qs: Vec<String> = (0..6).map(|i| format!("grace period question {i}")).collect();
    let answers = pipeline.answer_questions("https://x.test/policy.pdf", &qs).await.unwrap();

    let expected: Vec<String> = qs.iter().map(|q| format!("answer: {q}")).collect();
    assert_eq!(answers, expected);
    assert!(model.max_in_flight.load(Ordering::SeqCst) <= 2);
    assert_eq!(model.calls().len(), 6);
}

#[tokio::test(start_paused = true)]
async fn slow_answers_get_deadline_placeholders() {
    let model = Arc::new(RecordingModel::with_delay(Duration::from_secs(10)));
    let config = RagConfig::builder().request_deadline(Duration::from_secs(1)).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model,
    );

    let answers = pipeline
        .answer_questions("https://x.test/policy.pdf", &questions(&["grace period?", "premium?"]))
        .await
        .unwrap();

    assert_eq!(answers.len(), 2);
    for answer in &answers {
        assert!(answer.contains("request deadline exceeded"), "got {answer}");
    }
}

#[tokio::test(start_paused = true)]
async fn slow_load_exceeds_deadline() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().request_deadline(Duration::from_secs(1)).build().unwrap();
    let source = StaticSource { text: GRACE_DOC.to_string(), delay: Some(Duration::from_secs(5)) };
    let pipeline = pipeline(config, source, None, model);

    let err = pipeline
        .answer_questions("https://x.test/policy.pdf", &questions(&["grace period?"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DeadlineExceeded { stage: Stage::Load, .. }));
}

#[tokio::test]
async fn query_request_maps_to_response() {
    let model = Arc::new(RecordingModel::default());
    let pipeline = pipeline(
        RagConfig::default(),
        StaticSource::new(GRACE_DOC),
        Some(Arc::new(KeywordEmbedder::default())),
        model,
    );
    let request: QueryRequest = serde_json::from_str(
        r#"{"documents": "https://x.test/policy.pdf", "questions": ["What is the grace period?"]}"#,
    )
    .unwrap();

    let response = pipeline.query(&request).await.unwrap();
    assert_eq!(response.answers, vec!["answer: What is the grace period?".to_string()]);
}

#[tokio::test]
async fn text_input_skips_loading() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder()
        .chunk_size(20)
        .chunk_overlap(5)
        .max_context_chars(40)
        .build()
        .unwrap();
    let pipeline = pipeline(config, StaticSource::new("unused"), None, model.clone());

    let text = "Maternity cover has a waiting period of nine months. Dental implants are excluded.";
    let answers = pipeline
        .answer_questions_for_text(text, &questions(&["maternity waiting period"]))
        .await
        .unwrap();

    assert_eq!(answers, vec!["answer: maternity waiting period".to_string()]);
    let (_, context) = &model.calls()[0];
    assert!(context.contains("Maternity"));
    assert!(context.replace("\n\n", "").chars().count() <= 40);
}

#[tokio::test]
async fn word_chunks_fit_a_word_budget() {
    let model = Arc::new(RecordingModel::default());
    let config = RagConfig::builder().chunk_unit(ChunkUnit::Words).build().unwrap();
    let pipeline = pipeline(
        config,
        StaticSource::new("unused"),
        Some(Arc::new(KeywordEmbedder::default())),
        model.clone(),
    );

    let text = (0..1200)
        .map(|i| match i % 10 {
            0 => "grace",
            1 => "period",
            _ => "filler",
        })
        .collect::<Vec<_>>()
        .join(" ");
    let answers = pipeline
        .answer_questions_for_text(&text, &questions(&["grace period"]))
        .await
        .unwrap();

    assert_eq!(answers, vec!["answer: grace period".to_string()]);
    let (_, context) = &model.calls()[0];
    // Both 1000- and 400-word chunks fit, although either exceeds the character budget.
    assert_eq!(context.split_whitespace().count(), 1400);
    assert!(context.chars().count() > RagConfig::default().max_context_chars);
}
