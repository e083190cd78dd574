use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::debug;

/// Opens (creating if needed) the shared lease database and applies its schema.
///
/// Every competing process points at the same file. SQLite's own file locks
/// serialize writers, so a single conditional statement is atomic across
/// processes.
pub async fn open_lease_pool(path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Full)
        .busy_timeout(StdDuration::from_secs(30))
        .statement_cache_capacity(16);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await?;

    let schema = include_str!("../../../sql/lease_schema.sql");

    sqlx::query(schema).execute(&pool).await?;
    debug!("Lease store ready at {}", path.display());
    Ok(pool)
}
