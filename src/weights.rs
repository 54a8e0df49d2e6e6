//! Weight store and learning updater.
//!
//! Category weights drive the audit orchestrator's overall score, the
//! topic scorer's seo/geo split, and the action ranker's confidence
//! factor. The store keeps versioned snapshots: readers always load the
//! highest version, writers insert a complete new row inside one
//! transaction, so a concurrent reader can never observe a
//! partially-written set. Every applied update is appended to
//! `weight_events` for auditability.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{WeightSet, CATEGORIES};

/// Hard-coded default weights, restored by `reset`.
pub fn default_weights() -> BTreeMap<String, f64> {
    let mut w = BTreeMap::new();
    w.insert(CATEGORIES[0].to_string(), 0.2); // indexability
    w.insert(CATEGORIES[1].to_string(), 0.2); // schema
    w.insert(CATEGORIES[2].to_string(), 0.25); // content
    w.insert(CATEGORIES[3].to_string(), 0.2); // performance
    w.insert(CATEGORIES[4].to_string(), 0.15); // geo_correlation
    w
}

/// Exponential smoothing step: `new = old * (1 - alpha) + observed * alpha`
/// for every category present in `observed`. Categories absent from the
/// input are untouched. Smoothed values are floored at zero so a negative
/// observation cannot produce a negative weight.
pub fn smooth(
    current: &BTreeMap<String, f64>,
    observed: &BTreeMap<String, f64>,
    alpha: f64,
) -> BTreeMap<String, f64> {
    let mut next = current.clone();
    for (category, value) in observed {
        let old = next.get(category).copied().unwrap_or(0.0);
        let smoothed = old * (1.0 - alpha) + value * alpha;
        next.insert(category.clone(), smoothed.max(0.0));
    }
    next
}

/// Renormalize so all weights sum to 1.0. Returns None when the sum is
/// zero or non-positive; the caller retains the prior weights.
pub fn renormalize(weights: &BTreeMap<String, f64>) -> Option<BTreeMap<String, f64>> {
    let sum: f64 = weights.values().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return None;
    }
    Some(
        weights
            .iter()
            .map(|(k, v)| (k.clone(), v / sum))
            .collect(),
    )
}

/// Drops non-finite entries. Returns true when the remaining observation
/// would be a no-op (empty, or every value <= 0).
fn sanitize_observed(observed: &BTreeMap<String, f64>) -> (BTreeMap<String, f64>, bool) {
    let clean: BTreeMap<String, f64> = observed
        .iter()
        .filter(|(_, v)| v.is_finite())
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    let noop = clean.is_empty() || clean.values().all(|v| *v <= 0.0);
    (clean, noop)
}

/// Persistent weight store. One instance is constructed at startup and
/// shared by reference with the orchestrator, scorer, and ranker.
#[derive(Clone)]
pub struct WeightStore {
    pool: SqlitePool,
}

impl WeightStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load the latest weight snapshot.
    pub async fn get(&self) -> Result<WeightSet> {
        let row = sqlx::query(
            "SELECT weights_json, learning_rate, updated_at FROM weights \
             ORDER BY version DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let weights_json: String = row.get("weights_json");
                Ok(WeightSet {
                    weights: serde_json::from_str(&weights_json)?,
                    learning_rate: row.get("learning_rate"),
                    updated_at: row.get("updated_at"),
                })
            }
            None => bail!("weight store is empty; run `aether init` first"),
        }
    }

    /// Apply one observed-impact update: smooth the named categories
    /// toward the observation, renormalize, persist a new version, and
    /// log the event. A degenerate observation (empty, all non-positive,
    /// or one that would zero the whole set) is skipped and the prior
    /// weights are returned unchanged.
    pub async fn update(&self, observed: &BTreeMap<String, f64>) -> Result<WeightSet> {
        let current = self.get().await?;
        let (clean, noop) = sanitize_observed(observed);
        if noop {
            info!(observed = ?observed, "weight update skipped: no-op observation");
            return Ok(current);
        }

        let smoothed = smooth(&current.weights, &clean, current.learning_rate);
        let Some(normalized) = renormalize(&smoothed) else {
            warn!(observed = ?clean, "weight update skipped: renormalization sum not positive");
            return Ok(current);
        };

        let next = WeightSet {
            weights: normalized,
            learning_rate: current.learning_rate,
            updated_at: chrono::Utc::now().timestamp(),
        };
        let version = self.insert_version(&next, Some(&clean)).await?;
        info!(version, observed = ?clean, result = ?next.weights, "weights updated");
        Ok(next)
    }

    /// Validate and persist a new learning rate without touching weights.
    pub async fn set_learning_rate(&self, rate: f64) -> Result<WeightSet> {
        if !(rate > 0.0 && rate <= 1.0) {
            bail!("learning rate must be in (0.0, 1.0], got {}", rate);
        }
        let current = self.get().await?;
        let next = WeightSet {
            weights: current.weights,
            learning_rate: rate,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.insert_version(&next, None).await?;
        info!(rate, "learning rate updated");
        Ok(next)
    }

    /// Restore hard-coded default weights and the given learning rate.
    pub async fn reset(&self, alpha: f64) -> Result<WeightSet> {
        let next = WeightSet {
            weights: default_weights(),
            learning_rate: alpha,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.insert_version(&next, None).await?;
        info!("weights reset to defaults");
        Ok(next)
    }

    /// Recent weight-update events, newest first.
    pub async fn history(&self, limit: i64) -> Result<Vec<(i64, String, String, i64)>> {
        let rows = sqlx::query(
            "SELECT version, observed_json, result_json, created_at FROM weight_events \
             ORDER BY created_at DESC, version DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                (
                    row.get("version"),
                    row.get("observed_json"),
                    row.get("result_json"),
                    row.get("created_at"),
                )
            })
            .collect())
    }

    /// Insert a complete new snapshot row (and event, when an observation
    /// was applied) in one transaction.
    async fn insert_version(
        &self,
        set: &WeightSet,
        observed: Option<&BTreeMap<String, f64>>,
    ) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let version: i64 = sqlx::query_scalar(
            "INSERT INTO weights (weights_json, learning_rate, updated_at) \
             VALUES (?, ?, ?) RETURNING version",
        )
        .bind(serde_json::to_string(&set.weights)?)
        .bind(set.learning_rate)
        .bind(set.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(observed) = observed {
            sqlx::query(
                "INSERT INTO weight_events (id, version, observed_json, result_json, created_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(version)
            .bind(serde_json::to_string(observed)?)
            .bind(serde_json::to_string(&set.weights)?)
            .bind(set.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(version)
    }
}

/// Seed the store with defaults. Called once by `init`.
pub async fn seed_defaults(pool: &SqlitePool, alpha: f64) -> Result<()> {
    let store = WeightStore::new(pool.clone());
    store.reset(alpha).await?;
    Ok(())
}
