//! Database initialization
//!
//! Opens (or creates) the flowd SQLite database, applies connection pragmas,
//! and creates the schema idempotently. Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pool sized for one worker plus concurrent settings reads
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer. Multiple ingest worker
    // processes may point at the same database file.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Short busy timeout so lock contention surfaces as a classified error
    // quickly; the commit pipeline's own retry policy handles the backoff.
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    // Schema creation (idempotent)
    create_schema_version_table(&pool).await?;
    create_settings_table(&pool).await?;
    create_workflows_table(&pool).await?;
    create_import_errors_table(&pool).await?;
    create_workflow_warnings_table(&pool).await?;

    // Default settings
    init_default_settings(&pool).await?;

    // Re-apply busy timeout from the configurable setting
    let timeout_ms: i64 = sqlx::query_scalar(
        "SELECT CAST(value AS INTEGER) FROM settings WHERE key = 'ingest_database_busy_timeout_ms'",
    )
    .fetch_optional(&pool)
    .await?
    .unwrap_or(250);

    let pragma_sql = format!("PRAGMA busy_timeout = {}", timeout_ms);
    sqlx::query(&pragma_sql).execute(&pool).await?;

    info!("Database busy timeout set to {} ms", timeout_ms);

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the settings table
///
/// Stores application configuration key-value pairs.
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the workflows table
///
/// Stores discovered workflow definitions as JSON alongside indexed lookup
/// fields. Rows are upserted on every re-scan, keyed on workflow id.
pub async fn create_workflows_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflows (
            workflow_id TEXT PRIMARY KEY,
            guid TEXT NOT NULL,
            name TEXT NOT NULL,
            fileloc TEXT NOT NULL,
            definition TEXT NOT NULL,
            task_count INTEGER NOT NULL DEFAULT 0,
            last_parsed_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (task_count >= 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_fileloc ON workflows(fileloc)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_workflows_name ON workflows(name)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the import_errors table
///
/// One row per source file that currently fails to parse. Rows are upserted
/// when a file fails and deleted once the file parses cleanly again.
pub async fn create_import_errors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_errors (
            fileloc TEXT PRIMARY KEY,
            message TEXT NOT NULL,
            recorded_at TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the workflow_warnings table
///
/// Warnings are keyed on (workflow_id, code) so a re-scan that reports the
/// same warning refreshes it in place, and a re-scan that no longer reports
/// it can purge the stale row.
pub async fn create_workflow_warnings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_warnings (
            workflow_id TEXT NOT NULL,
            code TEXT NOT NULL,
            message TEXT NOT NULL,
            recorded_at TIMESTAMP NOT NULL,
            PRIMARY KEY (workflow_id, code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_workflow_warnings_workflow ON workflow_warnings(workflow_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Initialize or update default settings
///
/// Ensures all required settings exist with default values, and resets NULL
/// values back to defaults.
async fn init_default_settings(pool: &SqlitePool) -> Result<()> {
    // Commit pipeline retry settings
    ensure_setting(pool, "ingest_commit_max_attempts", "3").await?;
    ensure_setting(pool, "ingest_backoff_initial_ms", "50").await?;
    ensure_setting(pool, "ingest_backoff_ceiling_ms", "2000").await?;

    // Worker loop settings
    ensure_setting(pool, "ingest_scan_interval_ms", "30000").await?;

    // Database settings
    ensure_setting(pool, "ingest_database_busy_timeout_ms", "250").await?;

    info!("Default settings initialized");
    Ok(())
}

/// Ensure a setting exists with the specified default value
///
/// If the setting doesn't exist, it will be created with the default.
/// If the setting exists but has a NULL value, it will be reset to the default.
pub async fn ensure_setting(pool: &SqlitePool, key: &str, default_value: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE key = ?)")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if !exists {
        // INSERT OR IGNORE handles concurrent initialization race conditions
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(default_value)
            .execute(pool)
            .await?;

        info!("Initialized setting '{}' with default value: {}", key, default_value);
        return Ok(());
    }

    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_one(pool)
        .await?;

    if value.is_none() {
        sqlx::query("UPDATE settings SET value = ? WHERE key = ?")
            .bind(default_value)
            .bind(key)
            .execute(pool)
            .await?;

        tracing::warn!("Setting '{}' was NULL, reset to default: {}", key, default_value);
    }

    Ok(())
}
