use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::weights;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db).await?;

    // Versioned weight snapshots. Readers take MAX(version); writers insert
    // a complete new row so a partially-written set is never observable.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weights (
            version INTEGER PRIMARY KEY AUTOINCREMENT,
            weights_json TEXT NOT NULL,
            learning_rate REAL NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Append-only audit trail of applied weight updates
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weight_events (
            id TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            observed_json TEXT NOT NULL,
            result_json TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Full audit records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audits (
            id TEXT PRIMARY KEY,
            target_url TEXT NOT NULL,
            status TEXT NOT NULL,
            score REAL,
            categories_json TEXT NOT NULL DEFAULT '[]',
            issues_json TEXT NOT NULL DEFAULT '[]',
            error TEXT,
            started_at INTEGER NOT NULL,
            finished_at INTEGER
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Bounded most-recent-first index over completed audits
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_registry (
            id TEXT PRIMARY KEY,
            target_url TEXT NOT NULL,
            status TEXT NOT NULL,
            score REAL,
            issues_total INTEGER NOT NULL DEFAULT 0,
            finished_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // One score record per topic, upserted on recompute
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topic_scores (
            topic_id TEXT PRIMARY KEY,
            city TEXT NOT NULL,
            seo_score REAL NOT NULL,
            geo_score REAL NOT NULL,
            competition REAL NOT NULL,
            difficulty REAL NOT NULL,
            win_score REAL NOT NULL,
            breakdown_json TEXT NOT NULL DEFAULT '{}',
            scored_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topic_jobs (
            id TEXT PRIMARY KEY,
            query TEXT NOT NULL,
            city TEXT NOT NULL,
            status TEXT NOT NULL,
            stage TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            topic_id TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Ranked action batches per city
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS actions (
            id TEXT PRIMARY KEY,
            city TEXT NOT NULL,
            page TEXT NOT NULL,
            rule_id TEXT NOT NULL,
            pillar TEXT NOT NULL,
            title TEXT NOT NULL,
            guidance TEXT NOT NULL DEFAULT '',
            expected_uplift REAL NOT NULL,
            effort TEXT NOT NULL,
            confidence REAL NOT NULL,
            evidence_json TEXT NOT NULL DEFAULT '{}',
            score REAL NOT NULL,
            priority INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS page_metrics (
            page TEXT NOT NULL,
            metric TEXT NOT NULL,
            value REAL NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (page, metric)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS watchlist (
            city TEXT NOT NULL,
            page TEXT NOT NULL,
            added_at INTEGER NOT NULL,
            PRIMARY KEY (city, page)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_registry_finished ON audit_registry(finished_at DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_city_created ON actions(city, created_at DESC)")
        .execute(&pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_weight_events_version ON weight_events(version)")
        .execute(&pool)
        .await?;

    // Seed the weight store with defaults on first init
    let have_weights: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM weights")
        .fetch_one(&pool)
        .await?;
    if !have_weights {
        weights::seed_defaults(&pool, config.learning.alpha).await?;
    }

    pool.close().await;
    Ok(())
}
