//! CLI binary for the CITO enrichment pipeline.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use cito_llm::{LlmClient, LoggingMiddleware, UsageTrackingMiddleware};
use cito_pipeline::orchestrator::PIPELINE_NAME;
use cito_pipeline::{
    identification_line, render_summary, validate, ConsoleInterviewer, DocumentStore,
    EventEmitter, FileStore, Interviewer, MemoryStore, Orchestrator, PipelineConfig,
    PipelineEvent, Question, Selection, Severity, StageChain,
};
use cito_types::{CaseDocument, Identity, PipelineStatus, Stage};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

const DEFAULT_CONFIG: &str = "cito.json";

#[derive(Parser)]
#[command(name = "cito", version, about = "Enrichment runner for STF decision documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ./cito.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Document store directory, overrides the configured one
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the stage chain over one document, a batch, or a single stage queue
    Run(RunArgs),

    /// Print a stored document as JSON
    Show {
        /// stfDecisionId of the document
        #[arg(long)]
        id: String,
    },

    /// Add discovered documents from a JSON file (one object or a list)
    Import {
        /// File with full documents or bare identity objects
        file: PathBuf,
    },

    /// List the configured stage chain and lint it
    Stages,

    /// Write the effective configuration to a file
    Init {
        /// Output path (default: ./cito.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Process one document by stfDecisionId
    #[arg(long, conflicts_with = "batch")]
    id: Option<String>,

    /// Process every document at the batch status
    #[arg(long)]
    batch: bool,

    /// Batch filter status (default: the configured batch status)
    #[arg(long, requires = "batch")]
    status: Option<String>,

    /// Ask before each document
    #[arg(long)]
    confirm: bool,

    /// Run only this stage. Without --id or --batch, drains its queue.
    #[arg(long)]
    stage: Option<String>,

    /// Work on an in-memory copy of the store; nothing is written back
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(dir) = cli.store {
        config.store_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => cmd_run(config, args).await?,
        Commands::Show { id } => cmd_show(&config, &id).await?,
        Commands::Import { file } => cmd_import(&config, &file).await?,
        Commands::Stages => cmd_stages(&config)?,
        Commands::Init { output, force } => cmd_init(&config, output, force).await?,
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::load(path).await?,
        None if Path::new(DEFAULT_CONFIG).exists() => {
            PipelineConfig::load(Path::new(DEFAULT_CONFIG)).await?
        }
        None => PipelineConfig::default(),
    };
    Ok(config)
}

async fn open_store(config: &PipelineConfig) -> anyhow::Result<FileStore> {
    Ok(FileStore::open(&config.store_dir, config.claim_lease()).await?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    let config = if args.dry_run {
        config.without_delays()
    } else {
        config
    };
    let stage = args.stage.as_deref().map(str::parse::<Stage>).transpose()?;

    let file_store = open_store(&config).await?;
    let store: Arc<dyn DocumentStore> = if args.dry_run {
        println!("(dry run: working on an in-memory copy of {})", config.store_dir.display());
        Arc::new(snapshot(&file_store, &config).await?)
    } else {
        Arc::new(file_store)
    };

    let usage = UsageTrackingMiddleware::new();
    let llm = LlmClient::from_configs(&config.providers)
        .with_middleware(LoggingMiddleware)
        .with_middleware(usage.clone());

    let mut orchestrator = Orchestrator::from_config(&config, store, Arc::new(llm))?
        .with_confirm(args.confirm);
    if args.confirm {
        orchestrator = orchestrator.with_interviewer(ConsoleInterviewer);
    }

    let batch_status = match args.status.as_deref() {
        Some(raw) => raw.parse::<PipelineStatus>()?,
        None => config.batch_status,
    };
    let selection = match (args.id, args.batch, stage) {
        (Some(id), _, _) => Selection::Single(id.trim().to_string()),
        (None, true, _) => Selection::Batch(batch_status),
        (None, false, Some(stage)) => Selection::Drain(stage),
        (None, false, None) => ask_selection(batch_status).await?,
    };
    if let (Some(stage), false) = (stage, matches!(selection, Selection::Drain(_))) {
        orchestrator = orchestrator.restrict_to(stage)?;
    }

    cito_pipeline::validate_or_raise(orchestrator.chain(), &config)?;

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the current document");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let printer = spawn_printer(orchestrator.emitter());
    // Failed and not-found documents are part of a normal run; only a store
    // outage ends with an error.
    if let Err(e) = orchestrator.run(selection).await {
        printer.abort();
        return Err(e.into());
    }
    let _ = printer.await;

    if usage.calls() > 0 {
        println!(
            "Completions: {} calls, {} input / {} output tokens",
            usage.calls(),
            usage.total_input_tokens(),
            usage.total_output_tokens()
        );
    }
    Ok(())
}

/// Copy every stored document into a memory store.
async fn snapshot(store: &FileStore, config: &PipelineConfig) -> anyhow::Result<MemoryStore> {
    let mut docs = Vec::new();
    for id in store.find_ids(None).await? {
        if let Some(doc) = store.get(&id).await? {
            docs.push(doc);
        }
    }
    Ok(MemoryStore::with_documents(config.claim_lease(), docs))
}

async fn ask_selection(batch_status: PipelineStatus) -> anyhow::Result<Selection> {
    let answer = ConsoleInterviewer
        .ask(&Question {
            prompt: format!(
                "Informe o stfDecisionId (vazio para processar o lote {batch_status}):"
            ),
            choices: Vec::new(),
            default: Some(String::new()),
        })
        .await?;
    let id = answer.choice.trim();
    Ok(if id.is_empty() {
        Selection::Batch(batch_status)
    } else {
        Selection::Single(id.to_string())
    })
}

/// Print operator progress lines until the run completes.
fn spawn_printer(emitter: &EventEmitter) -> tokio::task::JoinHandle<()> {
    let mut events = BroadcastStream::new(emitter.subscribe());
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Progress printer fell behind");
                    continue;
                }
            };
            match event {
                PipelineEvent::RunStarted { banner, .. } => println!("{banner}"),
                PipelineEvent::DocumentStarted {
                    doc_id,
                    index,
                    total,
                    status,
                    eta_remaining,
                    ..
                } => {
                    println!("\n[{index}/{total}] {doc_id} ({status}) ETA {eta_remaining}");
                }
                PipelineEvent::DocumentSkipped { doc_id, reason } => {
                    println!("  - {doc_id} skipped: {reason}");
                }
                PipelineEvent::StageRetrying {
                    stage,
                    attempt,
                    error,
                    ..
                } => println!("  ~ {stage} retry {attempt}: {error}"),
                PipelineEvent::StageCompleted {
                    stage,
                    status,
                    count,
                    duration_ms,
                    ..
                } => {
                    let items = count.map(|c| format!(", {c} itens")).unwrap_or_default();
                    println!("  ✓ {stage} {status} ({duration_ms} ms{items})");
                }
                PipelineEvent::StageFailed { stage, error, .. } => {
                    println!("  ✗ {stage}: {error}");
                }
                PipelineEvent::RunCompleted { summary } => {
                    println!("\n{}", render_summary(&summary));
                    break;
                }
                PipelineEvent::StageStarted { .. } | PipelineEvent::DocumentCompleted { .. } => {}
            }
        }
    })
}

// ---------------------------------------------------------------------------
// show / import / stages
// ---------------------------------------------------------------------------

async fn cmd_show(config: &PipelineConfig, id: &str) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    match store.get(id.trim()).await? {
        Some(doc) => {
            println!("{}", identification_line(&doc));
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        None => println!("Documento nao encontrado: stfDecisionId={id}"),
    }
    Ok(())
}

/// A full document, or a bare identity that starts at `extracted`.
fn document_from(value: serde_json::Value) -> anyhow::Result<CaseDocument> {
    if value.get("identity").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    let identity: Identity = serde_json::from_value(value)?;
    Ok(CaseDocument::discovered(identity))
}

async fn cmd_import(config: &PipelineConfig, file: &Path) -> anyhow::Result<()> {
    let json = tokio::fs::read_to_string(file).await?;
    let items = match serde_json::from_str::<serde_json::Value>(&json)? {
        serde_json::Value::Array(items) => items,
        single => vec![single],
    };

    let store = open_store(config).await?;
    let (mut added, mut existing) = (0usize, 0usize);
    for item in items {
        let doc = document_from(item)?;
        if store.insert(doc).await? {
            added += 1;
        } else {
            existing += 1;
        }
    }
    println!(
        "Imported {added} document(s) into {} ({existing} already present)",
        config.store_dir.display()
    );
    Ok(())
}

async fn cmd_init(
    config: &PipelineConfig,
    output: Option<PathBuf>,
    force: bool,
) -> anyhow::Result<()> {
    let path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config.save(&path).await?;
    println!("Wrote configuration to {}", path.display());
    Ok(())
}

fn cmd_stages(config: &PipelineConfig) -> anyhow::Result<()> {
    let chain = StageChain::from_config(config)?;
    println!("Pipeline: {PIPELINE_NAME}");
    println!("Stages: {}", chain.len());
    for spec in chain.specs() {
        let model = spec.params.model().unwrap_or("-");
        println!(
            "  {:<22} {} -> {}  [{}] {} -> {} model={}",
            spec.stage.key(),
            spec.gating,
            spec.success,
            spec.capability.as_str(),
            spec.input.path(),
            spec.output_field(),
            model
        );
    }

    let diagnostics = validate(&chain, config);
    if diagnostics.is_empty() {
        println!("\nChain is valid");
        return Ok(());
    }

    println!();
    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}
