use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tumor_board::config::BoardConfig;
use tumor_board::retrieval::{Corpus, FastEmbedder, GuidelineIndex};
use tumor_board::{PatientRecord, TextGenerator, TumorBoard, build_generator, open_vector_store};

#[derive(Debug, Parser)]
#[command(name = "tumor-board", about = "HCC multidisciplinary tumor board")]
struct Cli {
    /// YAML configuration file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build (or reuse) the guideline index for a corpus
    Index(IndexArgs),
    /// Run a patient record through the board and print the recommendation
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct IndexArgs {
    /// Guideline corpus, pages separated by the configured page separator.
    #[arg(value_name = "CORPUS")]
    corpus: PathBuf,
    /// Rebuild even when an index for this corpus already exists.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[arg(value_name = "PATIENT_JSON")]
    patient: PathBuf,
    #[arg(long, value_name = "CORPUS")]
    corpus: PathBuf,
    /// Also write the recommendation to this directory.
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(Level::INFO.into());
    if json {
        let subscriber = FmtSubscriber::builder()
            .json()
            .with_env_filter(filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

async fn load_index(
    config: &BoardConfig,
    corpus_path: &Path,
    summarizer: Option<&dyn TextGenerator>,
    force: bool,
) -> Result<GuidelineIndex> {
    let corpus = Corpus::from_file(corpus_path, &config.chunking.page_separator)
        .with_context(|| format!("reading corpus {}", corpus_path.display()))?;
    let store = open_vector_store(&config.index).await?;
    let embedder = Arc::new(FastEmbedder::new(&config.embedding).await?);
    let index = GuidelineIndex::build_or_load(
        &corpus,
        store,
        embedder,
        &config.chunking,
        summarizer,
        force,
    )
    .await?;
    Ok(index)
}

async fn run_index(config: BoardConfig, args: IndexArgs) -> Result<()> {
    // Diagram summaries are optional; without credentials they fall back to truncation.
    let summarizer = match build_generator(&config.generation) {
        Ok(generator) => Some(generator),
        Err(e) => {
            warn!(error = %e, "no generator available, oversized diagrams will be truncated");
            None
        }
    };
    let index = load_index(&config, &args.corpus, summarizer.as_deref(), args.force).await?;
    info!(
        corpus_id = %index.corpus_id(),
        chunks = index.len().await?,
        "guideline index ready"
    );
    Ok(())
}

async fn run_analyze(config: BoardConfig, args: AnalyzeArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.patient)
        .with_context(|| format!("reading patient record {}", args.patient.display()))?;
    let record: PatientRecord = serde_json::from_str(&raw).context("parsing patient record")?;

    let generator = build_generator(&config.generation)?;
    let index = load_index(&config, &args.corpus, Some(generator.as_ref()), false).await?;
    let board = TumorBoard::new(config, index, generator);

    let recommendation = board.analyze(&record).await?;
    let rendered = serde_json::to_string_pretty(&recommendation)?;

    if let Some(dir) = args.output_dir {
        std::fs::create_dir_all(&dir)?;
        let stem = recommendation.patient_id.as_deref().unwrap_or("patient");
        let path = dir.join(format!(
            "{stem}_{}.json",
            recommendation.timestamp.format("%Y%m%d_%H%M%S")
        ));
        std::fs::write(&path, &rendered)?;
        info!(path = %path.display(), "recommendation written");
    }
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let config = BoardConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Index(args) => run_index(config, args).await,
        Command::Analyze(args) => run_analyze(config, args).await,
    }
}
