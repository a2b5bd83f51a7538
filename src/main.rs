use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use taskgate::api::{self, AppState};
use taskgate::auth::TokenService;
use taskgate::config::{QueueBackend, ServiceConfig};
use taskgate::dispatch::Dispatcher;
use taskgate::gateway::StatusGateway;
use taskgate::queue::{MemoryQueue, WorkQueue};
use taskgate::store::{self, LibSqlBackend, TaskRegistry};
use taskgate::tasks::TaskState;
use taskgate::telemetry;
use taskgate::worker::{FunctionCatalog, WorkerPool};

#[derive(Debug, Parser)]
#[command(name = "taskgate", version, about = "Authenticated asynchronous task service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Worker units to run (overrides WORKER_CONCURRENCY).
    #[arg(long, global = true)]
    workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API only.
    Serve,
    /// Run a worker pool only.
    Worker,
    /// Run the API and a worker pool in one process (default).
    All,
    /// Print tasks stuck in a state for longer than a threshold.
    Inspect {
        #[arg(long, default_value = "RUNNING")]
        state: TaskState,
        #[arg(long, default_value_t = 3600)]
        older_than_secs: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let _log_guard = telemetry::init(&config.log_dir)?;

    if config.auth.ephemeral_secret {
        warn!("JWT_SECRET_KEY not set; using a random secret. Tokens will not survive a restart.");
    }

    let workers = cli.workers.unwrap_or(config.worker_concurrency).max(1);
    let command = cli.command.unwrap_or(Command::All);

    info!(
        project = %config.project_name,
        environment = config.environment.as_str(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    let store = Arc::new(
        LibSqlBackend::new_local(&config.store.db_path)
            .await
            .with_context(|| format!("opening {}", config.store.db_path.display()))?
            .with_namespace(config.store.namespace.as_str())
            .with_poll_interval(config.store.poll_interval),
    );
    let registry: Arc<dyn TaskRegistry> = store.clone();
    let catalog = Arc::new(FunctionCatalog::with_builtins());

    match command {
        Command::Inspect {
            state,
            older_than_secs,
        } => inspect(&store, state, older_than_secs).await,
        Command::Serve => {
            let queue = shared_queue(&config, &store, "serve")?;
            serve(&config, registry, queue, catalog).await
        }
        Command::Worker => {
            let queue = shared_queue(&config, &store, "worker")?;
            let pool = WorkerPool::spawn(workers, queue, registry, catalog);
            shutdown_signal().await;
            pool.shutdown_and_join().await;
            Ok(())
        }
        Command::All => {
            let queue: Arc<dyn WorkQueue> = match config.store.queue_backend {
                QueueBackend::Sqlite => store.clone() as Arc<dyn WorkQueue>,
                QueueBackend::Memory => Arc::new(MemoryQueue::new()),
            };
            let pool = WorkerPool::spawn(
                workers,
                Arc::clone(&queue),
                Arc::clone(&registry),
                Arc::clone(&catalog),
            );
            let served = serve(&config, registry, queue, catalog).await;
            pool.shutdown_and_join().await;
            served
        }
    }
}

/// Queue for a role that talks to other processes; only the libSQL queue
/// crosses process boundaries.
fn shared_queue(
    config: &ServiceConfig,
    store: &Arc<LibSqlBackend>,
    role: &str,
) -> anyhow::Result<Arc<dyn WorkQueue>> {
    match config.store.queue_backend {
        QueueBackend::Sqlite => Ok(store.clone() as Arc<dyn WorkQueue>),
        QueueBackend::Memory => {
            bail!("QUEUE_BACKEND=memory only works with the `all` role, not `{role}`")
        }
    }
}

async fn serve(
    config: &ServiceConfig,
    registry: Arc<dyn TaskRegistry>,
    queue: Arc<dyn WorkQueue>,
    catalog: Arc<FunctionCatalog>,
) -> anyhow::Result<()> {
    let state = AppState {
        tokens: Arc::new(TokenService::new(
            &config.auth.secret,
            config.auth.token_ttl,
        )),
        dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry), queue, catalog)),
        gateway: Arc::new(StatusGateway::new(registry)),
        default_subject: Arc::from(config.auth.default_subject.as_str()),
        service_name: Arc::from(config.project_name.as_str()),
        environment: config.environment.as_str(),
    };
    let app = api::router(state, &config.allowed_origins);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %listener.local_addr()?, "API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("API stopped");
    Ok(())
}

async fn inspect(
    db: &LibSqlBackend,
    state: TaskState,
    older_than_secs: i64,
) -> anyhow::Result<()> {
    let cutoff = store::stale_cutoff(chrono::Utc::now(), older_than_secs)
        .with_context(|| format!("--older-than-secs {older_than_secs} is out of range"))?;
    let report = store::inspect(db, state, cutoff).await?;
    for record in &report.tasks {
        println!("{}", serde_json::to_string(record)?);
    }
    info!(
        %state,
        count = report.tasks.len(),
        queue_depth = report.queue_depth,
        "Inspection complete"
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        // Without a signal handler, run until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
