//! SQLite pool construction.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DbConfig;

/// Open the engine database, creating the file and its parent directory
/// on first use. WAL lets background audits and exploration jobs write
/// while API readers stay unblocked; the busy timeout covers the brief
/// exclusive lock taken when a batch transaction commits.
pub async fn connect(db: &DbConfig) -> Result<SqlitePool> {
    if let Some(parent) = db.path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open database at {}", db.path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn connect_creates_missing_parent_dirs() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cfg = Config::minimal(tmp.path().join("nested/data/aether.sqlite"));
        let pool = connect(&cfg.db).await.unwrap();
        sqlx::query("SELECT 1").execute(&pool).await.unwrap();
        assert!(cfg.db.path.exists());
    }
}
