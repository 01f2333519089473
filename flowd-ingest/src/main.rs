//! flowd-ingest - Workflow-Definition Ingest Worker
//!
//! Scans the workflow source folder on an interval and commits each batch's
//! parsing result through the commit pipeline. The process survives any
//! storage outcome short of a programming fault.

use anyhow::Result;
use flowd_ingest::commit::{CommitPipeline, RetryPolicy, SqliteSessionFactory};
use flowd_ingest::services::DefinitionScanner;
use flowd_ingest::worker::WorkerLoop;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting flowd-ingest (Workflow-Definition Ingest)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Root folder: CLI arg, then env var, then TOML config, then OS default
    let cli_root = std::env::args().nth(1);
    let root_folder =
        flowd_common::config::resolve_root_folder(cli_root.as_deref(), "FLOWD_ROOT_FOLDER")
            .map_err(|e| anyhow::anyhow!("Failed to resolve root folder: {}", e))?;
    flowd_common::config::ensure_root_folder(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    // Open or create the database
    let db_path = flowd_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let pool = flowd_common::db::init_database(&db_path).await?;
    info!("Database connection established");

    // Commit pipeline tuning from settings
    let policy = RetryPolicy::from_settings(&pool).await?;
    let scan_interval_ms =
        flowd_common::db::get_setting_u64(&pool, "ingest_scan_interval_ms", 30_000).await?;
    info!(
        max_attempts = policy.max_attempts,
        scan_interval_ms, "Commit pipeline configured"
    );

    // Workflow sources live under <root>/workflows
    let source_dir = root_folder.join("workflows");
    std::fs::create_dir_all(&source_dir)?;
    let scanner = DefinitionScanner::new(source_dir);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    let mut worker = WorkerLoop::new(
        Box::new(scanner),
        Arc::new(SqliteSessionFactory::new(pool)),
        CommitPipeline::new(policy),
        Duration::from_millis(scan_interval_ms),
        shutdown,
    );

    worker.run().await;

    info!("flowd-ingest stopped");
    Ok(())
}
