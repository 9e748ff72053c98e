//! cnpj-ingest - Receita Federal CNPJ open data worker

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cnpj_common::logging::{init_logging, LogConfig};
use cnpj_ingest::config::IngestConfig;
use cnpj_ingest::download::SystemDiskSpace;
use cnpj_ingest::loader::{MemoryRecordSink, PgRecordSink, RecordShape, RecordSink};
use cnpj_ingest::orchestrator::PipelineOrchestrator;
use cnpj_ingest::state::{FileStateStore, InMemoryFileStateStore, PgFileStateStore};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Download, extract and load the Receita Federal CNPJ dataset
#[derive(Parser, Debug)]
#[command(name = "cnpj-ingest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Use in-memory state and record storage instead of Postgres
    #[arg(long, global = true)]
    no_database: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline on its schedule until interrupted (default)
    Serve,

    /// Run the pipeline once and exit
    RunOnce,

    /// Show the latest period and its archives
    Discover,

    /// Show the file state of every archive of a period
    Status {
        /// Release period, YYYY-MM
        #[arg(long)]
        period: String,

        /// Print one JSON object per archive instead of log lines
        #[arg(long)]
        json: bool,
    },

    /// Show row counts of the entity tables
    Count,

    /// Remove every row of one entity table
    Truncate {
        /// Shape label (`companies`) or table name (`rf_empresas`)
        shape: RecordShape,
    },
}

struct Backends {
    store: Arc<dyn FileStateStore>,
    sink: Arc<dyn RecordSink>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A missing .env is normal in production
    let _ = dotenvy::dotenv();

    let _log_guard = init_logging(&LogConfig::from_env()?)?;

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    info!(
        work_dir = %config.work_dir.display(),
        base_url = %config.base_url,
        "Configuration loaded"
    );

    let backends = connect(&config, cli.no_database).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(&config, backends).await,
        Commands::RunOnce => run_once(&config, backends).await,
        Commands::Discover => discover(&config, backends).await,
        Commands::Status { period, json } => status(backends, &period, json).await,
        Commands::Count => count(backends).await,
        Commands::Truncate { shape } => truncate(backends, shape).await,
    }
}

async fn connect(config: &IngestConfig, no_database: bool) -> Result<Backends> {
    if no_database {
        warn!("Running without a database; state and records are kept in memory only");
        return Ok(Backends {
            store: Arc::new(InMemoryFileStateStore::new()),
            sink: Arc::new(MemoryRecordSink::new()),
        });
    }

    let Some(url) = config.database_url.as_deref() else {
        bail!("DATABASE_URL is not set; pass --no-database for an in-memory trial run");
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(url)
        .await
        .context("Failed to connect to the database")?;
    info!("Database connection pool established");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Database migrations completed");

    Ok(Backends {
        store: Arc::new(PgFileStateStore::new(pool.clone())),
        sink: Arc::new(PgRecordSink::new(pool)),
    })
}

fn orchestrator(config: &IngestConfig, backends: Backends) -> Result<PipelineOrchestrator> {
    Ok(PipelineOrchestrator::from_config(
        config,
        backends.store,
        backends.sink,
        Arc::new(SystemDiskSpace),
    )?)
}

async fn serve(config: &IngestConfig, backends: Backends) -> Result<()> {
    let orchestrator = Arc::new(orchestrator(config, backends)?);
    let shutdown = CancellationToken::new();

    let handle = orchestrator.start(shutdown.clone());
    info!("Worker started");

    shutdown_signal().await;
    shutdown.cancel();

    handle.await.context("Scheduler task panicked")?;
    info!("Worker stopped");
    Ok(())
}

async fn run_once(config: &IngestConfig, backends: Backends) -> Result<()> {
    let orchestrator = orchestrator(config, backends)?;
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    let summary = orchestrator.run_once(&shutdown).await?;
    if summary.downloads.failed > 0 || summary.load.files_failed > 0 {
        warn!("Some files failed; they will be retried on the next run");
    }
    Ok(())
}

async fn discover(config: &IngestConfig, backends: Backends) -> Result<()> {
    let orchestrator = orchestrator(config, backends)?;
    let discovery = orchestrator.discovery();

    let period = discovery.discover_latest_period().await?;
    for url in discovery.list_archives_for_period(&period).await? {
        info!(period = %period, "{}", url);
    }
    Ok(())
}

async fn status(backends: Backends, period: &str, json: bool) -> Result<()> {
    let records = backends.store.list_by_period(period).await?;

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    if records.is_empty() {
        info!(period = %period, "No archives recorded for this period");
    }

    for record in &records {
        info!(
            archive = %record.archive_name,
            download = %record.download_status,
            csv = %record.csv_status,
            extracted = record.extracted_file_name.as_deref().unwrap_or("-"),
            size_zip = record.size_zip,
            records = record.record_count.unwrap_or(0),
            last_error = record.last_error.as_deref().unwrap_or("-"),
            "File state"
        );
    }
    Ok(())
}

async fn count(backends: Backends) -> Result<()> {
    for shape in RecordShape::ALL {
        let rows = backends.sink.count(shape).await?;
        info!(table = shape.table_name(), rows, "{}", shape);
    }
    Ok(())
}

async fn truncate(backends: Backends, shape: RecordShape) -> Result<()> {
    backends.sink.clear_table(shape).await?;
    info!(table = shape.table_name(), "Table cleared");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
