//! Diagnostic checker and metrics-provider seams.
//!
//! Each checker independently evaluates one concern against a target
//! page snapshot and returns a 0–100 category score plus issues. The
//! orchestrator runs every registered checker concurrently under its own
//! time budget; see [`crate::audit`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              CheckerRegistry                 │
//! │ ┌───────────┐ ┌──────┐ ┌───────┐ ┌────────┐ │
//! │ │indexability│ │schema│ │content│ │perf/geo│ │
//! │ └───────────┘ └──────┘ └───────┘ └────────┘ │
//! └──────────────────┬───────────────────────────┘
//!                    ▼
//!          run_audit() → weighted score + ranked issues
//! ```

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::fetch::PageSnapshot;
use crate::models::Issue;

/// Everything a checker may look at: the page snapshot plus the target's
/// current metrics record from the metrics provider.
#[derive(Debug, Clone)]
pub struct CheckTarget {
    pub url: String,
    pub snapshot: PageSnapshot,
    pub metrics: HashMap<String, f64>,
}

/// Result of one checker run.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    /// Category health score, 0–100.
    pub score: f64,
    pub issues: Vec<Issue>,
}

impl CheckOutcome {
    /// Start at 100 and deduct per issue, floored at zero.
    pub fn from_deductions(deductions: f64, issues: Vec<Issue>) -> Self {
        Self {
            score: (100.0 - deductions).max(0.0),
            issues,
        }
    }
}

/// One diagnostic concern evaluated against a target page.
///
/// Implementations must be side-effect free with respect to the engine's
/// own storage; persistence is the orchestrator's job. A checker that
/// returns `Err` or exceeds its time budget degrades to a fallback
/// result for that run only.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Category name; also the checker's key in the weight store.
    fn category(&self) -> &str;

    /// One-line description for `aether checkers` output.
    fn description(&self) -> &str;

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome>;
}

/// Registry of diagnostic checkers, in registration order.
pub struct CheckerRegistry {
    checkers: Vec<Box<dyn Checker>>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
        }
    }

    /// Registry pre-loaded with the five built-in checkers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::checker_indexability::IndexabilityChecker));
        registry.register(Box::new(crate::checker_schema::SchemaChecker));
        registry.register(Box::new(crate::checker_content::ContentChecker));
        registry.register(Box::new(crate::checker_performance::PerformanceChecker));
        registry.register(Box::new(crate::checker_geo::GeoCorrelationChecker));
        registry
    }

    pub fn register(&mut self, checker: Box<dyn Checker>) {
        self.checkers.push(checker);
    }

    pub fn checkers(&self) -> &[Box<dyn Checker>] {
        &self.checkers
    }

    pub fn find(&self, category: &str) -> Option<&dyn Checker> {
        self.checkers
            .iter()
            .find(|c| c.category() == category)
            .map(|c| c.as_ref())
    }

    /// Indices of the checkers for the selected categories, in
    /// registration order. `None` selects all registered checkers.
    /// Indices let the orchestrator reference checkers through a shared
    /// `Arc` from spawned tasks.
    pub fn select(&self, categories: Option<&[String]>) -> Vec<usize> {
        match categories {
            None => (0..self.checkers.len()).collect(),
            Some(wanted) => self
                .checkers
                .iter()
                .enumerate()
                .filter(|(_, c)| wanted.iter().any(|w| w == c.category()))
                .map(|(i, _)| i)
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }
}

impl Default for CheckerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Supplies per-page metrics and the per-city watchlist. The engine
/// treats it as an opaque data source; connectors that populate it live
/// outside the core.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Flat metric record for one page. A page with no stored metrics
    /// yields an empty record; providers that can distinguish unknown
    /// pages may return an error instead. Either way callers degrade
    /// locally (the page contributes no candidates).
    async fn page_metrics(&self, page: &str) -> Result<HashMap<String, f64>>;

    /// Pages eligible for action-rule evaluation in the given city.
    async fn watchlist(&self, city: &str) -> Result<Vec<String>>;
}

/// Metrics provider backed by the engine's own SQLite tables, populated
/// via `aether metrics import` and `aether watchlist add`.
pub struct DbMetricsProvider {
    pool: SqlitePool,
}

impl DbMetricsProvider {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a batch of per-page metric records. Returns the number of
    /// (page, metric) pairs written.
    pub async fn import(
        &self,
        records: &HashMap<String, HashMap<String, f64>>,
    ) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let mut written = 0;
        let mut tx = self.pool.begin().await?;
        for (page, metrics) in records {
            for (metric, value) in metrics {
                sqlx::query(
                    "INSERT INTO page_metrics (page, metric, value, updated_at) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(page, metric) DO UPDATE SET value = excluded.value, \
                     updated_at = excluded.updated_at",
                )
                .bind(page)
                .bind(metric)
                .bind(value)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Add a page to a city's watchlist. Idempotent.
    pub async fn add_to_watchlist(&self, city: &str, page: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO watchlist (city, page, added_at) VALUES (?, ?, ?) \
             ON CONFLICT(city, page) DO NOTHING",
        )
        .bind(city)
        .bind(page)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsProvider for DbMetricsProvider {
    async fn page_metrics(&self, page: &str) -> Result<HashMap<String, f64>> {
        let rows = sqlx::query("SELECT metric, value FROM page_metrics WHERE page = ?")
            .bind(page)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("metric"), row.get::<f64, _>("value")))
            .collect())
    }

    async fn watchlist(&self, city: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT page FROM watchlist WHERE city = ? ORDER BY added_at, page")
            .bind(city)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("page")).collect())
    }
}

/// In-memory provider for tests and callers without a database.
#[derive(Default)]
pub struct StaticMetricsProvider {
    pub pages: HashMap<String, HashMap<String, f64>>,
    pub watchlists: HashMap<String, Vec<String>>,
}

#[async_trait]
impl MetricsProvider for StaticMetricsProvider {
    async fn page_metrics(&self, page: &str) -> Result<HashMap<String, f64>> {
        self.pages
            .get(page)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no metrics for page: {}", page))
    }

    async fn watchlist(&self, city: &str) -> Result<Vec<String>> {
        Ok(self.watchlists.get(city).cloned().unwrap_or_default())
    }
}
