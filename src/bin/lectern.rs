#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lectern::config::AppConfig;
use lectern::gateway::openrouter::OpenRouterAdapter;
use lectern::gateway::{
    EmbedModel, EmbeddingsAdapter, NoopUsageSink, ProviderGateway, RetryPolicy, StderrUsageSink,
    UsageSink,
};
use lectern::generate::DualGenerator;
use lectern::pipeline::{Pipeline, QueryAnswer, QueryObserver, QueryRequest, SessionLedger};
use lectern::prompts::Verbosity;
use lectern::rerank::{HttpReranker, Reranker};
use lectern::retrieval::{ContentField, HybridSearcher, WeaviateClient};
use lectern::router::{RemoteEmbedder, RouterConfig, SemanticRouter};
use lectern::tokens::Cl100kCounter;
use lectern::CritiqueOutcome;

#[derive(Parser)]
#[command(name = "lectern", version, about = "Podcast corpus Q&A pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask one or more questions (processed sequentially in one session)
    Ask {
        /// Question text; repeat the flag to ask several in one session
        #[arg(long, required = true)]
        query: Vec<String>,
        /// Collection to search
        #[arg(long)]
        collection: String,
        /// Restrict retrieval to this guest
        #[arg(long)]
        guest: Option<String>,
        /// Reader model id (defaults to the first configured model)
        #[arg(long)]
        reader: Option<String>,
        /// Responder model id (defaults to the reader)
        #[arg(long)]
        responder: Option<String>,
        /// Responder tone
        #[arg(long, default_value = "professional and businesslike")]
        tone: String,
        /// Route structured questions to the text-to-SQL executor
        #[arg(long)]
        structured: bool,
        /// Reranker name (defaults to the first configured endpoint)
        #[arg(long)]
        reranker: Option<String>,
        /// Use the expanded content window
        #[arg(long)]
        expanded_content: bool,
        /// Hybrid blend: 0 = pure lexical, 1 = pure vector
        #[arg(long, default_value_t = 0.5)]
        alpha: f64,
        /// Hits requested from hybrid search
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Candidates kept by the reranker
        #[arg(long, default_value_t = 3)]
        top_k: usize,
        #[arg(long, default_value_t = 0.5)]
        temperature: f32,
        /// Max output tokens per generation
        #[arg(long, default_value_t = 250)]
        max_tokens: u32,
        /// Prompt scaffolding level (0/1/2)
        #[arg(long, default_value_t = 1)]
        verbosity: u8,
        /// Log per-call usage records to stderr
        #[arg(long)]
        log_usage: bool,
    },
    /// List the collections available for querying
    Collections,
}

/// Prints streamed output as it arrives, with a separator before the
/// critique stream starts.
#[derive(Default)]
struct ConsoleObserver {
    critique_started: bool,
}

impl QueryObserver for ConsoleObserver {
    fn on_answer_chunk(&mut self, chunk: &str) {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    }

    fn on_critique_chunk(&mut self, chunk: &str) {
        if !self.critique_started {
            self.critique_started = true;
            println!("\n\n-- critique --");
        }
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Collections => {
            let searcher = weaviate(&config)?;
            for name in searcher.list_collections().await? {
                println!("{name}");
            }
        }
        Commands::Ask {
            query,
            collection,
            guest,
            reader,
            responder,
            tone,
            structured,
            reranker,
            expanded_content,
            alpha,
            limit,
            top_k,
            temperature,
            max_tokens,
            verbosity,
            log_usage,
        } => {
            let usage_sink: Arc<dyn UsageSink> = if log_usage {
                Arc::new(StderrUsageSink)
            } else {
                Arc::new(NoopUsageSink)
            };

            let pipeline = build_pipeline(&config, usage_sink).await?;

            let reader_model = match reader {
                Some(id) => lectern::ChatModel::new(id),
                None => config.default_model().clone(),
            };
            if !config.is_enabled(&reader_model) {
                return Err(format!("model {reader_model} is not in the configured list").into());
            }
            let responder_model = match responder {
                Some(id) => lectern::ChatModel::new(id),
                None => reader_model.clone(),
            };
            if !config.is_enabled(&responder_model) {
                return Err(
                    format!("model {responder_model} is not in the configured list").into()
                );
            }

            let reranker_name = reranker
                .unwrap_or_else(|| config.rerankers[0].name.clone());

            let mut ledger = SessionLedger::new();

            for question in query {
                let mut req =
                    QueryRequest::new(question, reader_model.clone(), responder_model.clone());
                req.collection = Some(collection.clone());
                req.guest = guest.clone();
                req.responder_tone = tone.clone();
                req.enable_structured = structured;
                req.reranker = reranker_name.clone();
                req.content_field = if expanded_content {
                    ContentField::ExpandedContent
                } else {
                    ContentField::Content
                };
                req.alpha = alpha;
                req.retrieval_limit = limit;
                req.rerank_top_k = top_k;
                req.temperature = temperature;
                req.max_response_tokens = max_tokens;
                req.verbosity = Verbosity::from_level(verbosity);

                println!("== {} ==", req.query);
                let mut observer = ConsoleObserver::default();
                let outcome = pipeline.run(&req, &mut ledger, &mut observer).await?;
                println!();

                match &outcome.answer {
                    QueryAnswer::Structured { text } => {
                        println!("{text}");
                    }
                    QueryAnswer::Semantic {
                        answer,
                        critique,
                        sources,
                    } => {
                        if let CritiqueOutcome::Failed { error } = critique {
                            println!("\ncritique unavailable: {error}");
                        }
                        println!("\n-- sources --");
                        for card in sources {
                            println!(
                                "[{}] {} - {} ({}) {}",
                                card.rank, card.title, card.guest, card.duration, card.episode_url
                            );
                        }
                        println!(
                            "\nquery cost: ${:.6} (answer {} + critique {} tokens)",
                            lectern::gateway::nanos_to_usd(outcome.cost_nanodollars),
                            answer.output_tokens,
                            match critique {
                                CritiqueOutcome::Completed(c) => c.output_tokens,
                                CritiqueOutcome::Failed { .. } => 0,
                            },
                        );
                    }
                }
            }

            println!("session cost: ${:.6}", ledger.total_usd());
        }
    }

    Ok(())
}

fn weaviate(config: &AppConfig) -> Result<Arc<WeaviateClient>, Box<dyn std::error::Error>> {
    Ok(Arc::new(WeaviateClient::with_config(
        config.weaviate_url.clone(),
        config.weaviate_api_key.clone(),
        std::time::Duration::from_secs(30),
        RetryPolicy::default(),
    )?))
}

async fn build_pipeline(
    config: &AppConfig,
    usage_sink: Arc<dyn UsageSink>,
) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let adapter = OpenRouterAdapter::new(config.openrouter_api_key.clone())?;
    let gateway = Arc::new(ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        RetryPolicy::default(),
    ));

    let embedder = RemoteEmbedder::new(
        EmbeddingsAdapter::new(config.openai_api_key.clone())?,
        EmbedModel::Small3,
    );
    let router_config = RouterConfig::from_json_file(&config.router_config_path)?;
    let router = Arc::new(SemanticRouter::load(router_config, embedder).await?);

    let searcher = weaviate(config)?;

    let mut rerankers: HashMap<String, Arc<dyn Reranker>> = HashMap::new();
    for endpoint in &config.rerankers {
        rerankers.insert(
            endpoint.name.clone(),
            Arc::new(HttpReranker::new(endpoint.url.clone(), endpoint.name.clone())?),
        );
    }

    let estimator = Arc::new(Cl100kCounter::new());
    let generator = DualGenerator::new(gateway, usage_sink, estimator.clone());

    // The text-to-SQL subsystem attaches behind StructuredQueryExecutor;
    // the CLI ships without one, so structured routing stays off unless an
    // executor is wired in by the embedding application.
    Ok(Pipeline::new(
        router,
        searcher,
        rerankers,
        generator,
        None,
        estimator,
    ))
}
