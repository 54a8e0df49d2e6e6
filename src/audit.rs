//! Audit orchestration.
//!
//! Runs every selected checker concurrently, each under an independent
//! time budget, aggregates category scores into one weighted health
//! score, ranks all issues by impact, and persists the record plus a
//! bounded recent-audits registry entry. A checker that times out or
//! fails degrades to a zero-score fallback result for that run; it never
//! aborts the audit. The audit's wall clock is roughly the slowest
//! surviving checker, not the sum.

use anyhow::{bail, Context, Result};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::warn;
use uuid::Uuid;

use crate::checkers::{CheckOutcome, CheckTarget, CheckerRegistry, MetricsProvider};
use crate::config::Config;
use crate::fetch::{self, PageSnapshot};
use crate::models::{
    AuditRecord, AuditStatus, AuditSummary, CategoryResult, Issue, Severity, WeightSet,
};
use crate::weights::WeightStore;

/// Audit orchestrator service. Constructed once at startup; cheap to
/// clone and share across the CLI and HTTP handlers.
#[derive(Clone)]
pub struct AuditEngine {
    config: Arc<Config>,
    pool: SqlitePool,
    weights: WeightStore,
    registry: Arc<CheckerRegistry>,
    metrics: Arc<dyn MetricsProvider>,
}

impl AuditEngine {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        weights: WeightStore,
        registry: Arc<CheckerRegistry>,
        metrics: Arc<dyn MetricsProvider>,
    ) -> Self {
        Self {
            config,
            pool,
            weights,
            registry,
            metrics,
        }
    }

    /// Run one audit to completion and persist it.
    pub async fn run_audit(
        &self,
        target_url: &str,
        categories: Option<Vec<String>>,
    ) -> Result<AuditRecord> {
        let (id, target_url, started_at) = self.prepare(target_url, &categories).await?;
        match self
            .execute(&id, &target_url, categories.as_deref(), started_at)
            .await
        {
            Ok(record) => Ok(record),
            Err(err) => {
                // Failure outside checker execution: mark the record
                // failed with the error message (best effort, no retry).
                let message = format!("{:#}", err);
                let _ = self.mark_failed(&id, &message).await;
                Err(err)
            }
        }
    }

    /// Validate, record the audit as running, and return its id while
    /// the checkers run in a background task. Used by `POST /audits`.
    pub async fn start_audit(
        &self,
        target_url: &str,
        categories: Option<Vec<String>>,
    ) -> Result<String> {
        let (id, target_url, started_at) = self.prepare(target_url, &categories).await?;
        let engine = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            if let Err(err) = engine
                .execute(&job_id, &target_url, categories.as_deref(), started_at)
                .await
            {
                warn!(audit = job_id, error = %err, "background audit failed");
                let _ = engine.mark_failed(&job_id, &format!("{:#}", err)).await;
            }
        });
        Ok(id)
    }

    /// Shared validation and the initial running row.
    async fn prepare(
        &self,
        target_url: &str,
        categories: &Option<Vec<String>>,
    ) -> Result<(String, String, i64)> {
        let target_url = target_url.trim();
        if target_url.is_empty() {
            bail!("target URL must not be empty");
        }
        if !(target_url.starts_with("http://") || target_url.starts_with("https://")) {
            bail!(
                "target URL must start with http:// or https://, got '{}'",
                target_url
            );
        }
        if let Some(wanted) = categories {
            for category in wanted {
                if self.registry.find(category).is_none() {
                    bail!("unknown audit category: '{}'", category);
                }
            }
        }

        let id = Uuid::new_v4().to_string();
        let started_at = chrono::Utc::now().timestamp();
        self.insert_running(&id, target_url, started_at).await?;
        Ok((id, target_url.to_string(), started_at))
    }

    async fn execute(
        &self,
        id: &str,
        target_url: &str,
        categories: Option<&[String]>,
        started_at: i64,
    ) -> Result<AuditRecord> {
        let weight_set = self.weights.get().await?;

        // One fetch shared by all checkers. A fetch failure is an
        // upstream data error: checkers run against an inaccessible
        // snapshot and report accordingly.
        let fetch_timeout = Duration::from_secs(self.config.audit.fetch_timeout_secs);
        let snapshot = match fetch::fetch_snapshot(target_url, fetch_timeout).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(url = target_url, error = %err, "page fetch failed; auditing degraded snapshot");
                PageSnapshot {
                    url: target_url.to_string(),
                    ..Default::default()
                }
            }
        };

        let metrics = match self.metrics.page_metrics(target_url).await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!(url = target_url, error = %err, "metrics unavailable for audit target");
                Default::default()
            }
        };

        let target = Arc::new(CheckTarget {
            url: target_url.to_string(),
            snapshot,
            metrics,
        });

        let selected = self.registry.select(categories);
        if selected.is_empty() {
            bail!("no checkers selected");
        }

        let budget = Duration::from_secs(self.config.audit.checker_timeout_secs);
        let mut set = JoinSet::new();
        for (order, registry_idx) in selected.iter().copied().enumerate() {
            let registry = Arc::clone(&self.registry);
            let target = Arc::clone(&target);
            set.spawn(async move {
                let checker = &registry.checkers()[registry_idx];
                let category = checker.category().to_string();
                let outcome = tokio::time::timeout(budget, checker.check(&target)).await;
                (order, category, outcome)
            });
        }

        let mut slots: Vec<Option<CategoryResult>> = vec![None; selected.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((order, category, outcome)) => {
                    slots[order] = Some(category_result(
                        &category,
                        target_url,
                        outcome,
                        budget.as_secs(),
                    ));
                }
                Err(err) => {
                    // A panicking checker degrades like a failing one,
                    // but we no longer know which slot it was; fill the
                    // gap below.
                    warn!(error = %err, "checker task panicked");
                }
            }
        }
        let categories_run: Vec<CategoryResult> = selected
            .iter()
            .enumerate()
            .map(|(order, registry_idx)| {
                slots[order].take().unwrap_or_else(|| {
                    let category = self.registry.checkers()[*registry_idx].category();
                    degraded_result(category, target_url, "checker task panicked".to_string())
                })
            })
            .collect();

        let score = aggregate_score(&categories_run, &weight_set);
        let issues = rank_issues(&categories_run);

        let record = AuditRecord {
            id: id.to_string(),
            target_url: target_url.to_string(),
            status: AuditStatus::Completed,
            score: Some(score),
            categories: categories_run,
            issues,
            error: None,
            started_at,
            finished_at: Some(chrono::Utc::now().timestamp()),
        };

        self.persist_completed(&record)
            .await
            .context("failed to persist audit record")?;
        Ok(record)
    }

    async fn insert_running(&self, id: &str, target_url: &str, started_at: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO audits (id, target_url, status, started_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(target_url)
        .bind(AuditStatus::Running.as_str())
        .bind(started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn persist_completed(&self, record: &AuditRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE audits SET status = ?, score = ?, categories_json = ?, issues_json = ?, \
             finished_at = ? WHERE id = ?",
        )
        .bind(record.status.as_str())
        .bind(record.score)
        .bind(serde_json::to_string(&record.categories)?)
        .bind(serde_json::to_string(&record.issues)?)
        .bind(record.finished_at)
        .bind(&record.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO audit_registry (id, target_url, status, score, issues_total, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.target_url)
        .bind(record.status.as_str())
        .bind(record.score)
        .bind(record.issues.len() as i64)
        .bind(record.finished_at.unwrap_or(record.started_at))
        .execute(&mut *tx)
        .await?;

        // Evict oldest registry rows beyond the cap
        sqlx::query(
            "DELETE FROM audit_registry WHERE id NOT IN \
             (SELECT id FROM audit_registry ORDER BY finished_at DESC, id DESC LIMIT ?)",
        )
        .bind(self.config.audit.recent_cap)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, message: &str) -> Result<()> {
        sqlx::query("UPDATE audits SET status = ?, error = ?, finished_at = ? WHERE id = ?")
            .bind(AuditStatus::Failed.as_str())
            .bind(message)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load one full audit record.
    pub async fn get_audit(&self, id: &str) -> Result<Option<AuditRecord>> {
        get_audit(&self.pool, id).await
    }

    /// Most-recent-first page of the bounded registry, plus total count.
    pub async fn list_audits(&self, limit: i64, offset: i64) -> Result<(Vec<AuditSummary>, i64)> {
        list_audits(&self.pool, limit, offset).await
    }
}

pub async fn get_audit(pool: &SqlitePool, id: &str) -> Result<Option<AuditRecord>> {
    let row = sqlx::query(
        "SELECT id, target_url, status, score, categories_json, issues_json, error, \
         started_at, finished_at FROM audits WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let status: String = row.get("status");
    let categories_json: String = row.get("categories_json");
    let issues_json: String = row.get("issues_json");

    Ok(Some(AuditRecord {
        id: row.get("id"),
        target_url: row.get("target_url"),
        status: AuditStatus::from_str(&status)?,
        score: row.get("score"),
        categories: serde_json::from_str(&categories_json)?,
        issues: serde_json::from_str(&issues_json)?,
        error: row.get("error"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    }))
}

pub async fn list_audits(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<(Vec<AuditSummary>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_registry")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        "SELECT id, target_url, status, score, issues_total, finished_at FROM audit_registry \
         ORDER BY finished_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in &rows {
        let status: String = row.get("status");
        records.push(AuditSummary {
            id: row.get("id"),
            target_url: row.get("target_url"),
            status: AuditStatus::from_str(&status)?,
            score: row.get("score"),
            issues_total: row.get("issues_total"),
            finished_at: row.get("finished_at"),
        });
    }

    Ok((records, total))
}

fn category_result(
    category: &str,
    target_url: &str,
    outcome: Result<Result<CheckOutcome>, tokio::time::error::Elapsed>,
    budget_secs: u64,
) -> CategoryResult {
    match outcome {
        Ok(Ok(outcome)) => CategoryResult {
            category: category.to_string(),
            score: outcome.score.clamp(0.0, 100.0),
            issues: outcome.issues,
            degraded: false,
        },
        Ok(Err(err)) => {
            warn!(category, error = %err, "checker failed; degrading");
            degraded_result(category, target_url, format!("Checker failed: {:#}", err))
        }
        Err(_) => {
            warn!(category, budget_secs, "checker timed out; degrading");
            degraded_result(
                category,
                target_url,
                format!("Checker exceeded its {}s time budget", budget_secs),
            )
        }
    }
}

fn degraded_result(category: &str, target_url: &str, description: String) -> CategoryResult {
    CategoryResult {
        category: category.to_string(),
        score: 0.0,
        issues: vec![Issue {
            id: format!("{}.unavailable", category),
            page: target_url.to_string(),
            severity: Severity::Medium,
            description,
            impact_score: 0.3,
            suggested_fix: "Re-run the audit; if this persists, check the target's availability"
                .to_string(),
            pages_affected: None,
        }],
        degraded: true,
    }
}

/// Weighted mean of the completed (non-degraded) category scores.
/// Categories missing from the run contribute to neither numerator nor
/// denominator. Falls back to an unweighted mean when no completed
/// category carries weight, and to 0 when every checker degraded.
pub fn aggregate_score(categories: &[CategoryResult], weights: &WeightSet) -> f64 {
    let completed: Vec<&CategoryResult> = categories.iter().filter(|c| !c.degraded).collect();
    if completed.is_empty() {
        return 0.0;
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for result in &completed {
        if let Some(weight) = weights.weight(&result.category) {
            numerator += weight * result.score;
            denominator += weight;
        }
    }

    if denominator > 0.0 {
        numerator / denominator
    } else {
        completed.iter().map(|c| c.score).sum::<f64>() / completed.len() as f64
    }
}

/// Flatten all issues and sort descending by impact rank. The sort is
/// stable, so equal ranks keep their discovery order.
pub fn rank_issues(categories: &[CategoryResult]) -> Vec<Issue> {
    let mut issues: Vec<Issue> = categories
        .iter()
        .flat_map(|c| c.issues.iter().cloned())
        .collect();
    issues.sort_by(|a, b| {
        b.impact_rank()
            .partial_cmp(&a.impact_rank())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    issues
}
