//! Arbiter CLI
//!
//! The `arbiter` command runs the validator loop and inspects its state.
//!
//! ## Commands
//!
//! - `run`: drive rounds until Ctrl-C (or `--rounds`), committing weights on cadence
//! - `score`: score one payload file offline
//! - `weights`: compute the weight vector from persisted state
//! - `blacklist`: list blacklist entries
//! - `check-config`: validate a config file and print the effective settings

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use arbiter_core::anticheat::blacklist;
use arbiter_core::scoring::{structure, text};
use arbiter_core::telemetry::{init_tracing, LogFormat};
use arbiter_core::{
    ArbiterConfig, ArbiterError, Collaborators, CompositeCalculator, HttpWorkerClient, JsonlLedger,
    LedgerCommitter, LedgerSinkKind, MemoryLedger, QualityScorer, StateBackend, StaticDirectory,
    Task, TaskType, Validator, WeightNormalizer, WorkerResponse,
};
use arbiter_state::{
    FileStateStore, MemoryStateStore, StateStore, SurrealConfig, SurrealStateStore,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "arbiter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Incentive validator for untrusted worker networks", long_about = None)]
struct Cli {
    /// Path to the TOML config file (defaults apply when omitted)
    #[arg(short, long, global = true, env = "ARBITER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the state path (JSON file or surrealkv directory)
    #[arg(long, global = true, env = "ARBITER_STATE")]
    state: Option<PathBuf>,

    /// Remote SurrealDB username, used with `state.url`
    #[arg(long, global = true, env = "ARBITER_SURREAL_USER")]
    surreal_user: Option<String>,

    /// Remote SurrealDB password, used with `state.url`
    #[arg(long, global = true, env = "ARBITER_SURREAL_PASS", hide_env_values = true)]
    surreal_pass: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validator loop
    Run {
        /// Keep state and commits in memory only
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many rounds instead of waiting for Ctrl-C
        #[arg(long)]
        rounds: Option<u64>,
    },

    /// Score a single worker payload offline
    Score {
        /// Task stage the payload answers
        #[arg(short, long)]
        task: TaskType,

        /// JSON file holding the payload
        payload: PathBuf,

        /// JSON object used as task context (user_input, upstream outputs)
        #[arg(long)]
        context: Option<PathBuf>,

        /// Round-trip latency to score against
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,
    },

    /// Compute the current weight vector from persisted state
    Weights,

    /// List blacklist entries
    Blacklist {
        /// Include entries that have already expired
        #[arg(long)]
        all: bool,
    },

    /// Validate the config and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_tracing(format, level);

    let config = load_config(cli.config.as_deref(), cli.state.as_deref())?;
    let credentials = cli.surreal_user.zip(cli.surreal_pass);

    match cli.command {
        Commands::Run { dry_run, rounds } => cmd_run(config, credentials, dry_run, rounds).await,
        Commands::Score {
            task,
            payload,
            context,
            latency_ms,
        } => cmd_score(&config, task, &payload, context.as_deref(), latency_ms),
        Commands::Weights => cmd_weights(&config, credentials).await,
        Commands::Blacklist { all } => cmd_blacklist(&config, credentials, all).await,
        Commands::CheckConfig => cmd_check_config(&config),
    }
}

fn load_config(path: Option<&Path>, state_override: Option<&Path>) -> Result<ArbiterConfig> {
    let mut config = match path {
        Some(path) => ArbiterConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ArbiterConfig::default(),
    };
    if let Some(state) = state_override {
        config.state.path = state.to_path_buf();
    }
    Ok(config)
}

async fn open_store(
    config: &ArbiterConfig,
    credentials: Option<(String, String)>,
) -> Result<Arc<dyn StateStore>> {
    let state = &config.state;
    let store: Arc<dyn StateStore> = match state.backend {
        StateBackend::Memory => Arc::new(MemoryStateStore::new()),
        StateBackend::File => Arc::new(FileStateStore::new(&state.path)),
        StateBackend::Surreal => match &state.url {
            Some(url) => Arc::new(
                SurrealStateStore::connect(SurrealConfig {
                    endpoint: url.clone(),
                    namespace: state.namespace.clone(),
                    database: state.database.clone(),
                    credentials,
                })
                .await
                .with_context(|| format!("Failed to connect to SurrealDB at {url}"))?,
            ),
            None => Arc::new(
                SurrealStateStore::open_local(&state.path)
                    .await
                    .with_context(|| {
                        format!("Failed to open SurrealDB at {}", state.path.display())
                    })?,
            ),
        },
    };
    Ok(store)
}

fn open_ledger(config: &ArbiterConfig, dry_run: bool) -> Arc<dyn LedgerCommitter> {
    match config.ledger.sink {
        _ if dry_run => Arc::new(MemoryLedger::new()),
        LedgerSinkKind::Memory => Arc::new(MemoryLedger::new()),
        LedgerSinkKind::Jsonl => Arc::new(JsonlLedger::new(&config.ledger.path)),
    }
}

/// Run the validator loop
async fn cmd_run(
    config: ArbiterConfig,
    credentials: Option<(String, String)>,
    dry_run: bool,
    rounds: Option<u64>,
) -> Result<()> {
    if config.workers.is_empty() {
        bail!("No workers configured; add [[workers]] entries to the config");
    }

    let store = if dry_run {
        let persisted = open_store(&config, credentials).await?.load_state().await?;
        Arc::new(MemoryStateStore::with_state(persisted)) as Arc<dyn StateStore>
    } else {
        open_store(&config, credentials).await?
    };
    let client = HttpWorkerClient::new(config.round.timeout())
        .context("Failed to build HTTP worker client")?;

    let mut validator = Validator::new(
        config.clone(),
        Collaborators {
            directory: Arc::new(StaticDirectory::new(config.workers.clone())),
            client: Arc::new(client),
            ledger: open_ledger(&config, dry_run),
            store,
        },
    )
    .await
    .context("Failed to start validator")?;

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        info!("shutdown requested");
        on_signal.cancel();
    });

    info!(
        workers = config.workers.len(),
        dry_run = dry_run,
        "starting validator"
    );

    match rounds {
        None => validator.run(shutdown).await?,
        Some(limit) => {
            for _ in 0..limit {
                if shutdown.is_cancelled() {
                    break;
                }
                let report = match validator.run_round(&shutdown).await {
                    Ok(report) => report,
                    Err(ArbiterError::Cancelled) => break,
                    Err(e) => return Err(e.into()),
                };
                println!(
                    "round {:>5}  {:<10}  selected {:>3}  flagged {:>3}",
                    report.round,
                    report.task_type,
                    report.selected.len(),
                    report.flagged.len()
                );
            }
            validator.shutdown().await?;
        }
    }

    let stats = validator.stats();
    println!(
        "Completed {} rounds: {}/{} successful responses, average score {:.2}",
        stats.rounds,
        stats.successful,
        stats.responses,
        stats.average_score()
    );
    Ok(())
}

/// Score a single payload file offline
fn cmd_score(
    config: &ArbiterConfig,
    task_type: TaskType,
    payload_path: &Path,
    context_path: Option<&Path>,
    latency_ms: u64,
) -> Result<()> {
    let raw = std::fs::read_to_string(payload_path)
        .with_context(|| format!("Failed to read payload file: {}", payload_path.display()))?;
    let payload = serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw));

    let context = match context_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read context file: {}", path.display()))?;
            serde_json::from_str::<Map<String, Value>>(&raw)
                .context("Context must be a JSON object")?
        }
        None => Map::new(),
    };

    let task = Task::new(task_type, context);
    let response = WorkerResponse::ok(
        "offline".into(),
        payload.clone(),
        Duration::from_millis(latency_ms),
    );
    let scorer = QualityScorer::new(
        config.scoring.clone(),
        config.rubrics.clone(),
        config.round.timeout(),
    );
    let breakdown = scorer.score(&response, &task);

    let rules: Map<String, Value> = text::as_object(&payload)
        .map(|obj| {
            structure::evaluate(task_type, config.rubrics.for_task(task_type), &obj)
                .into_iter()
                .map(|(name, points)| (name.to_string(), json!(points)))
                .collect()
        })
        .unwrap_or_default();

    let report = json!({
        "task_type": task_type,
        "breakdown": breakdown,
        "structure_rules": rules,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Compute the weight vector from persisted state
async fn cmd_weights(config: &ArbiterConfig, credentials: Option<(String, String)>) -> Result<()> {
    let state = open_store(config, credentials).await?.load_state().await?;
    let now = Utc::now();

    let composites = CompositeCalculator::new(config.composite.clone()).compute(
        &config.workers,
        &state.reputations,
        |id| blacklist::is_blacklisted(&state.blacklist, id, now),
    );
    let weights = WeightNormalizer::new(&config.weights).normalize(&composites);

    if weights.is_empty() {
        println!("No workers configured.");
        return Ok(());
    }

    println!(
        "{:<24} {:>9} {:>9} {:>9} {:>9} {:>10}",
        "WORKER", "STAKE", "QUALITY", "HISTORY", "COMPOSITE", "WEIGHT"
    );
    for c in &composites {
        println!(
            "{:<24} {:>9.4} {:>9.4} {:>9.4} {:>9.4} {:>10.6}{}",
            c.worker_id.as_str(),
            c.stake_weight,
            c.quality_component,
            c.history_component,
            c.composite,
            weights.get(&c.worker_id).unwrap_or(0.0),
            if c.eligible { "" } else { "  (blacklisted)" }
        );
    }
    println!("last round: {}", state.last_round);
    match state.last_committed_round {
        Some(round) => println!("last committed round: {round}"),
        None => println!("last committed round: never"),
    }
    Ok(())
}

/// List blacklist entries
async fn cmd_blacklist(
    config: &ArbiterConfig,
    credentials: Option<(String, String)>,
    all: bool,
) -> Result<()> {
    let state = open_store(config, credentials).await?.load_state().await?;
    let now = Utc::now();

    let entries: Vec<_> = state
        .blacklist
        .values()
        .filter(|e| all || !e.is_expired(now))
        .collect();
    if entries.is_empty() {
        println!("Blacklist is empty.");
        return Ok(());
    }

    for entry in entries {
        let status = if entry.is_expired(now) { "expired" } else { "active" };
        println!(
            "{:<24} {:<18} {:<8} until {}",
            entry.worker_id.as_str(),
            entry.reason,
            status,
            entry.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    for (worker, count) in &state.violations {
        println!("{:<24} {} pending violation(s)", worker.as_str(), count);
    }
    Ok(())
}

/// Validate the config and print the effective settings
fn cmd_check_config(config: &ArbiterConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    println!("{}", config.to_toml_string()?);
    eprintln!("Configuration OK ({} workers)", config.workers.len());
    Ok(())
}
