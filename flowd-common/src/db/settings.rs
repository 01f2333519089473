//! Settings table queries

use crate::Result;
use sqlx::SqlitePool;

/// Read a setting value by key
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?
        .flatten();

    Ok(value)
}

/// Read an integer setting, falling back to a default when missing or unparseable
pub async fn get_setting_u64(pool: &SqlitePool, key: &str, default: u64) -> Result<u64> {
    let value = get_setting(pool, key).await?;
    Ok(value.and_then(|v| v.trim().parse().ok()).unwrap_or(default))
}

/// Write a setting value by key (upsert)
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value, updated_at)
        VALUES (?, ?, CURRENT_TIMESTAMP)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;

    Ok(())
}
