// Deep Reader - CLI Entry Point

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deep_reader::models::settings::{ConfigOverrides, ParsingStrategy, ReadingMode};
use deep_reader::services::artifacts::{run_output_dir, write_artifacts};
use deep_reader::services::workflow::{run_status, SourceDocument};
use deep_reader::storage::ConfigService;
use deep_reader::AppState;

#[derive(Parser, Debug)]
#[command(name = "deep-reader", version, about = "Read a long document and write a report about it")]
struct Cli {
    /// Configuration file (defaults to ~/.deep-reader/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Data directory for stores, checkpoints, and output.
    #[arg(long = "data-dir", global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run (or resume) the full reading workflow and write the artifacts.
    Run {
        document: PathBuf,
        #[arg(long)]
        question: Option<String>,
        #[arg(long)]
        role: Option<String>,
        #[arg(long, value_enum)]
        mode: Option<ReadingMode>,
        #[arg(long, value_enum)]
        strategy: Option<ParsingStrategy>,
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
        /// Ignore an unfinished run of the same document.
        #[arg(long)]
        fresh: bool,
    },
    /// Build the document's vector store only.
    Ingest { document: PathBuf },
    /// Show the latest checkpoint of a document.
    Status { document: PathBuf },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_state(cli: &Cli, overrides: ConfigOverrides) -> Result<AppState> {
    let mut config = ConfigService::load(cli.config.as_deref()).context("loading configuration")?;
    config
        .apply_overrides(ConfigOverrides {
            data_dir: cli.data_dir.clone(),
            ..overrides
        })
        .context("invalid configuration")?;
    AppState::initialize(config).context("initializing services")
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run {
            document,
            question,
            role,
            mode,
            strategy,
            output,
            fresh,
        } => {
            let overrides = ConfigOverrides {
                mode: *mode,
                parsing_strategy: *strategy,
                data_dir: None,
            };
            let state = load_state(&cli, overrides)?;
            state.health_check().await.context("provider health check failed")?;
            let source = SourceDocument::load(document)
                .with_context(|| format!("reading {}", document.display()))?;
            let request = source.into_request(question.clone(), role.clone(), *fresh);

            let run = state.driver().run(&request).await.context("run failed")?;

            let dir = output
                .clone()
                .unwrap_or_else(|| run_output_dir(&state.output_root(), document));
            let artifacts = write_artifacts(&run, &dir).context("writing artifacts")?;

            println!("Stage:     {}", run.stage);
            println!("Segments:  {}/{}", run.read_count(), run.reading_snippets.len());
            println!("Chapters:  {}", run.chapter_summaries.len());
            println!("Output:    {}", artifacts.dir.display());
            for file in &artifacts.files {
                println!("  - {}", file.display());
            }
            if let Some(error) = &run.error {
                bail!("run ended with an error: {}", error);
            }
        }
        Commands::Ingest { document } => {
            let state = load_state(&cli, ConfigOverrides::default())?;
            state.health_check().await.context("provider health check failed")?;
            let source = SourceDocument::load(document)
                .with_context(|| format!("reading {}", document.display()))?;
            let report = state
                .ingestor()
                .ingest(&source.document_path, &source.content)
                .await
                .context("ingestion failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status { document } => {
            let state = load_state(&cli, ConfigOverrides::default())?;
            let (_, thread_id) = SourceDocument::locate(document)
                .with_context(|| format!("locating {}", document.display()))?;
            match run_status(state.checkpointer().as_ref(), &thread_id).await? {
                Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
                None => println!("No run recorded for {}", document.display()),
            }
        }
    }

    Ok(())
}
