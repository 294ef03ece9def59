use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use supportbench::eval::{EvalHarness, LlmJudge, ProviderEmbedder, ReferenceSet, SemanticEvaluator, STANDARD_CASES};
use supportbench::providers::openai::OpenAI;
use supportbench::scenarios::ScenarioStore;
use supportbench::LLMProvider;

#[derive(Parser)]
#[command(name = "support-eval")]
#[command(about = "Run the two-phase support agent evaluation batch")]
struct Args {
    /// Scenario template configuration
    #[arg(long, default_value = "data/scenarios.yaml")]
    scenarios: PathBuf,

    /// Ideal-responses reference document
    #[arg(long, default_value = "data/ideal_responses.md")]
    references: PathBuf,

    /// Directory the markdown report is written into
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Agent model (defaults to the SUPPORT_MODEL env var)
    #[arg(long)]
    model: Option<String>,

    /// Judge model (defaults to the agent model)
    #[arg(long)]
    judge_model: Option<String>,

    /// Embeddings model for semantic similarity; without it the scorer
    /// uses the offline lexical fallback
    #[arg(long)]
    embeddings_model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let model = args
        .model
        .or_else(|| std::env::var("SUPPORT_MODEL").ok())
        .ok_or("no agent model: pass --model or set SUPPORT_MODEL")?;
    let judge_model = args.judge_model.unwrap_or_else(|| model.clone());

    let scenarios = ScenarioStore::load(&args.scenarios)?;
    let references = ReferenceSet::load(&args.references)?;

    let provider = Arc::new(OpenAI::from_env()?);
    let semantic = match args.embeddings_model {
        Some(embeddings_model) if provider.capabilities().supports_embeddings => {
            SemanticEvaluator::with_embedder(Arc::new(ProviderEmbedder::new(
                provider.clone(),
                embeddings_model,
            )))
        }
        Some(_) => {
            eprintln!("provider has no embeddings endpoint, using the lexical fallback");
            SemanticEvaluator::lexical()
        }
        None => SemanticEvaluator::lexical(),
    };
    let judge = LlmJudge::new(provider.clone(), judge_model);

    let harness = EvalHarness::new(provider, model, scenarios, references, semantic, judge);
    let report = harness.run(STANDARD_CASES).await;

    let path = report.write_to(&args.out_dir)?;
    println!(
        "Scenarios: {}, completed: {}, failed: {}",
        report.results.len(),
        report.completed(),
        report.failed()
    );
    println!("Report saved: {}", path.display());

    Ok(())
}
