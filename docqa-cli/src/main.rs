//! `docqa`: answer questions about a PDF, DOCX or email at a URL.
//!
//! ```text
//! docqa --document https://example.com/policy.pdf \
//!       --question "What is the grace period?" --question "Is maternity covered?"
//! docqa --request request.json --json
//! ```
//!
//! Pipeline settings come from `DOCQA_*` environment variables and provider
//! credentials from `OPENAI_API_KEY` / `OPENAI_BASE_URL`. Logs go to stderr,
//! filtered by `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use docqa_rag::{
    HttpDocumentLoader, OpenAIChatModel, OpenAIEmbeddingProvider, ProviderConfig, QueryRequest,
    QueryResponse, RagConfig, RagPipeline,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Answer questions about a remote document.
#[derive(Parser, Debug)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// URL of the document (PDF, DOCX or email)
    #[arg(short, long, required_unless_present = "request", conflicts_with = "request")]
    document: Option<String>,

    /// Question to ask; repeat for several
    #[arg(short = 'q', long = "question", value_name = "QUESTION")]
    questions: Vec<String>,

    /// JSON request file: {"documents": "<url>", "questions": ["..."]}
    #[arg(short, long, value_name = "FILE")]
    request: Option<PathBuf>,

    /// Print the answers as a JSON response object
    #[arg(long)]
    json: bool,

    /// Print retrieved chunks, scores and confidence for every answer
    #[arg(long, conflicts_with = "json")]
    explain: bool,

    /// Skip the remote embedding provider and use lexical retrieval
    #[arg(long)]
    lexical: bool,
}

impl Cli {
    fn query_request(&self) -> Result<QueryRequest> {
        if let Some(path) = &self.request {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut request: QueryRequest = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a valid request", path.display()))?;
            request.questions.extend(self.questions.iter().cloned());
            return Ok(request);
        }
        let documents = self.document.clone().context("--document or --request is required")?;
        Ok(QueryRequest { documents, questions: self.questions.clone() })
    }
}

fn build_pipeline(lexical: bool) -> Result<RagPipeline> {
    let config = RagConfig::from_env().context("invalid DOCQA_* configuration")?;
    let provider = ProviderConfig::from_env().context("invalid provider configuration")?;
    let timeout = config.retry.call_timeout();

    let loader = HttpDocumentLoader::new(config.max_document_bytes, timeout)?;
    let model = OpenAIChatModel::new(&provider, timeout)?;
    let mut builder =
        RagPipeline::builder().source(Arc::new(loader)).language_model(Arc::new(model));

    if provider.remote_embeddings && !lexical {
        let embedder = OpenAIEmbeddingProvider::new(&provider, timeout)?;
        builder = builder.embedding_provider(Arc::new(embedder));
    } else {
        info!("remote embeddings disabled, using lexical retrieval");
    }

    Ok(builder.config(config).build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let request = cli.query_request()?;
    let pipeline = build_pipeline(cli.lexical)?;

    if cli.explain {
        let detailed = pipeline.explain_questions(&request.documents, &request.questions).await?;
        println!("{}", serde_json::to_string_pretty(&detailed)?);
        return Ok(());
    }

    let answers = pipeline.answer_questions(&request.documents, &request.questions).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&QueryResponse { answers })?);
    } else {
        for (question, answer) in request.questions.iter().zip(&answers) {
            println!("Q: {question}\nA: {answer}\n");
        }
    }
    Ok(())
}
