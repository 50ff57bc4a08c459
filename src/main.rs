//! paraclate-sync daemon
//!
//! Runs the sync queue for one device: drains queued reports to the remote
//! endpoint, schedules summaries, and serves the status API for the UI.
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon with ./paraclate.toml (or $PARACLATE_CONFIG)
//! paraclate-sync
//!
//! # Inspect or repair the queue of a stopped daemon
//! paraclate-sync stats
//! paraclate-sync retry 42
//! paraclate-sync purge
//!
//! # In-memory store and a fake endpoint, nothing leaves the machine
//! paraclate-sync --dry-run
//! ```
//!
//! # Environment Variables
//!
//! - `PARACLATE_CONFIG`: Path to the TOML config file
//! - `PARACLATE_CORS_ORIGINS`: Comma-separated origins allowed to call the API
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use paraclate_sync::api::create_app;
use paraclate_sync::config::{ParaclateConfig, SharedConfig};
use paraclate_sync::storage::{InMemoryQueueStore, ProcessLock, QueueFilter, QueueStore, SledQueueStore};
use paraclate_sync::sync::{tasks, HttpSender, Sender, SyncService};
use paraclate_sync::testing::ScriptedSender;
use paraclate_sync::types::QueueStatus;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "paraclate-sync")]
#[command(about = "Paraclate sync queue daemon")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides $PARACLATE_CONFIG and ./paraclate.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the data directory holding the queue database
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the API listen address (default: "0.0.0.0:8090")
    #[arg(short, long, value_name = "HOST:PORT")]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Use an in-memory queue and a fake endpoint that accepts everything
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

/// `stats`, `retry` and `purge` open the queue database directly and need the
/// process lock, so they only work while the daemon is stopped.
#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run the daemon (default)
    Run,
    /// Print queue counts and failed items (daemon must be stopped; use GET /api/paraclate/status while it runs)
    Stats,
    /// Return a failed item to pending (daemon must be stopped; use POST /api/paraclate/queue/:id/retry while it runs)
    Retry {
        /// Queue item id
        id: u64,
    },
    /// Delete sent items past the retention window (daemon must be stopped; use POST /api/paraclate/queue/purge while it runs)
    Purge,
    /// Validate the configuration and print the effective TOML
    CheckConfig,
}

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    DrainLoop,
    SchedulerLoop,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::DrainLoop => write!(f, "DrainLoop"),
            TaskName::SchedulerLoop => write!(f, "SchedulerLoop"),
        }
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

/// Resolve the config file and apply CLI overrides.
fn load_config(args: &CliArgs) -> Result<(ParaclateConfig, Option<PathBuf>)> {
    let (mut config, source) = match &args.config {
        Some(path) => {
            let config = ParaclateConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?;
            info!(path = %path.display(), tid = %config.sync.tid, "Loaded config from --config");
            (config, Some(path.clone()))
        }
        None => {
            let loaded = ParaclateConfig::load();
            (loaded.config, loaded.source)
        }
    };

    if let Some(dir) = &args.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    config.validate().context("Invalid configuration")?;
    Ok((config, source))
}

/// Everything the daemon holds for its lifetime.
struct Runtime {
    service: SyncService,
    _process_lock: Option<ProcessLock>,
}

fn build_runtime(config: &ParaclateConfig, source: Option<PathBuf>, dry_run: bool) -> Result<Runtime> {
    let (store, sender, lock): (Arc<dyn QueueStore>, Arc<dyn Sender>, Option<ProcessLock>) = if dry_run {
        warn!("Dry run: in-memory queue, reports are accepted locally and never sent");
        (Arc::new(InMemoryQueueStore::new()), Arc::new(ScriptedSender::new()), None)
    } else {
        let data_dir = &config.storage.data_dir;
        let lock = ProcessLock::acquire(data_dir)
            .context("Failed to lock the data directory (a running daemon holds it; use the HTTP API instead)")?;
        let store = SledQueueStore::open(data_dir.join("queue"))
            .with_context(|| format!("Failed to open queue database in {}", data_dir.display()))?;
        let sender = HttpSender::new(&config.connection).context("Failed to build HTTP client")?;
        (Arc::new(store), Arc::new(sender), Some(lock))
    };

    // Dry runs never write the config file back
    let shared = match source {
        Some(path) if !dry_run => SharedConfig::with_file(config.clone(), path),
        _ => SharedConfig::new(config.sync.clone()),
    };

    let service = SyncService::builder(shared, store, sender)
        .queue_config(config.queue.clone())
        .failure_threshold(config.connection.failure_threshold)
        .build();

    Ok(Runtime {
        service,
        _process_lock: lock,
    })
}

// ============================================================================
// Task Supervision
// ============================================================================

/// Spawn the HTTP server task into the JoinSet.
async fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    addr: &str,
    service: SyncService,
    cancel_token: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {addr}"))?;
    info!(addr, "API listening");

    let app = create_app(service);
    task_set.spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => Ok(TaskName::HttpServer),
            Err(e) => {
                error!(error = %e, "[HttpServer] Server error");
                Err(anyhow::anyhow!("HTTP server error: {e}"))
            }
        }
    });
    Ok(())
}

async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!(task = %task_name, "Supervisor: task completed");
                    }
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Supervisor: task failed");
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Supervisor: task panicked");
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {e}"));
                    }
                    None => break,
                }
            }
        }
    }

    // Let the loops observe cancellation and finish their current step
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!(task = %task_name, "Supervisor: task stopped");
        }
    }
    Ok(())
}

async fn run_daemon(runtime: Runtime, addr: &str) -> Result<()> {
    let service = runtime.service;

    let recovered = service.recover_inflight().await?;
    if recovered > 0 {
        info!(recovered, "Returned interrupted sends to pending");
    }

    if service.config().endpoint.is_some() {
        let result = service.connect(None, None).await;
        if result.connected {
            info!(latency_ms = ?result.latency_ms, "{}", result.message);
        } else {
            warn!(reason = %result.message, "Initial connect failed, drain loop will keep probing");
        }
    } else {
        info!("No endpoint configured, waiting for POST /api/paraclate/connect");
    }

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    spawn_http_server(&mut task_set, addr, service.clone(), cancel_token.clone()).await?;

    let drain_service = service.clone();
    let drain_cancel = cancel_token.clone();
    task_set.spawn(async move {
        tasks::run_drain_loop(drain_service, drain_cancel).await;
        Ok(TaskName::DrainLoop)
    });

    let scheduler_cancel = cancel_token.clone();
    task_set.spawn(async move {
        tasks::run_scheduler_loop(service, scheduler_cancel).await;
        Ok(TaskName::SchedulerLoop)
    });

    run_supervisor(&mut task_set, cancel_token).await
}

// ============================================================================
// One-shot Commands
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_stats(service: &SyncService) -> Result<()> {
    let stats = service.stats()?;
    let failed = service.items(&QueueFilter::status(QueueStatus::Failed))?;
    print_json(&serde_json::json!({ "stats": stats, "failed": failed }))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let (config, source) = load_config(&args)?;

    if let Some(SubCommand::CheckConfig) = &args.command {
        println!("{}", config.to_toml()?);
        info!(source = ?source, "Configuration is valid");
        return Ok(());
    }

    let addr = config.server.addr.clone();
    let runtime = build_runtime(&config, source, args.dry_run)?;

    match args.command {
        None | Some(SubCommand::Run) => {
            info!(
                tid = %config.sync.tid,
                fid = %config.sync.fid,
                data_dir = %config.storage.data_dir.display(),
                "Starting paraclate-sync"
            );
            run_daemon(runtime, &addr).await?;
            info!("paraclate-sync shutdown complete");
        }
        Some(SubCommand::Stats) => run_stats(&runtime.service)?,
        Some(SubCommand::Retry { id }) => {
            let item = runtime.service.retry_failed(id)?;
            print_json(&item)?;
        }
        Some(SubCommand::Purge) => {
            let deleted = runtime.service.purge_old()?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Some(SubCommand::CheckConfig) => {}
    }
    Ok(())
}
