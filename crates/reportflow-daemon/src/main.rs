//! Long-running daemon: builds a [`PipelineContext`] from environment
//! configuration, registers every active task's cron schedule, and serves
//! until `Ctrl+C`.

use std::sync::Arc;

mod assembler;

use anyhow::{Context, Result};
use clap::Parser;
use reportflow::collaborators::NoopNotificationSink;
use reportflow::config::PipelineConfig;
use reportflow::context::PipelineContext;
use reportflow::progress::ProgressRecorder;
use reportflow::repositories::Repositories;
use reportflow::scheduler::TaskScheduler;
use reportflow::storage::HybridStorage;
use reportflow::tools::registry::ToolRegistry;
use reportflow_llm_openai::OpenAiClient;
use reportflow_sql::{PgArtifactRepository, PgConnector, PgExecutionRepository};
use reportflow_storage::{FilesystemStorage, S3Storage};
use sqlx::PgPool;
use tracing::{info, warn};

/// reportflow-daemon: schedules and runs report-generation tasks.
#[derive(Parser, Debug)]
#[command(name = "reportflow-daemon", version, about = "Runs scheduled report generation tasks")]
struct Cli {
    /// Postgres connection string for the data source connector.
    #[arg(long = "database-url", env = "DATABASE_URL")]
    database_url: String,

    /// OpenAI (or compatible) API key.
    #[arg(long = "openai-api-key", env = "OPENAI_API_KEY")]
    openai_api_key: String,

    /// Chat-completions model name.
    #[arg(long = "openai-model", env = "OPENAI_MODEL", default_value = "gpt-4o")]
    openai_model: String,

    /// Primary object storage bucket. When absent, only the filesystem
    /// fallback is used.
    #[arg(long = "storage-bucket", env = "STORAGE_BUCKET")]
    storage_bucket: Option<String>,

    /// Local directory backing the filesystem fallback storage backend.
    #[arg(
        long = "storage-fallback-root",
        env = "STORAGE_FALLBACK_ROOT",
        default_value = "./var/reportflow-artifacts"
    )]
    storage_fallback_root: String,

    /// Emit logs in JSON format instead of human-readable text.
    #[arg(long = "log-json", env = "REPORTFLOW_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    info!("starting reportflow-daemon");

    let config = Arc::new(PipelineConfig::from_env().context("loading pipeline configuration")?);

    let pool = PgPool::connect(&cli.database_url)
        .await
        .context("connecting to the data source database")?;
    let data_source = PgConnector::with_pool(pool.clone());

    let repositories = Repositories {
        executions: Arc::new(PgExecutionRepository::new(pool.clone())),
        artifacts: Arc::new(PgArtifactRepository::new(pool)),
        ..Repositories::in_memory()
    };

    let llm = OpenAiClient::new(cli.openai_api_key, cli.openai_model);

    let fallback = FilesystemStorage::new(&cli.storage_fallback_root)
        .context("creating filesystem fallback storage root")?;
    let primary: Option<Box<dyn reportflow::storage::StorageBackend>> = match &cli.storage_bucket {
        Some(bucket) => Some(Box::new(S3Storage::new(bucket.clone()).await)),
        None => {
            warn!("no storage bucket configured, running with filesystem storage only");
            None
        }
    };
    let storage = Arc::new(HybridStorage::new(primary, Box::new(fallback)));

    let ctx = Arc::new(PipelineContext::new(
        Arc::clone(&config),
        Arc::new(repositories),
        ProgressRecorder::new(),
        Arc::new(ToolRegistry::with_default_tools()),
        Arc::new(llm),
        Arc::new(data_source),
        Arc::new(assembler::PlainTextAssembler),
        storage,
        Arc::new(NoopNotificationSink),
    ));

    let mut scheduler = TaskScheduler::new(Arc::clone(&ctx))
        .await
        .context("constructing task scheduler")?;
    let registered = scheduler
        .register_active_tasks()
        .await
        .context("registering active task schedules")?;
    info!(registered, "registered active task schedules");

    scheduler.start().await.context("starting task scheduler")?;
    info!("scheduler started, waiting for Ctrl+C");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("shutdown signal received, stopping scheduler");
            scheduler.shutdown().await.context("shutting down task scheduler")?;
        }
        Err(e) => {
            warn!(error = %e, "unable to listen for shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing(use_json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if use_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
