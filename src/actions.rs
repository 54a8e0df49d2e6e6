//! Recommendation ranker.
//!
//! For every (watchlisted page, rule) pair in a city, evaluates the
//! rule's condition against that page's current metrics and scores each
//! match:
//!
//! ```text
//! gap   = expected_uplift × severity_multiplier × pillar_boost
//! score = gap × learning_weight × city_bias × effort_multiplier
//! ```
//!
//! Candidates are pooled across the whole watchlist, sorted descending,
//! and the top N persisted as one dated batch with priorities 1..N —
//! the ranking is global, not per-page. Every kept action carries its
//! full evidence bundle so a reviewer can see exactly why it won.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checkers::MetricsProvider;
use crate::config::Config;
use crate::models::{ActionEvidence, ActionRule, Effort, RecommendedAction};
use crate::rules::{self, evaluate, pillar_boost};
use crate::weights::WeightStore;

/// One scored match before ranking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub page: String,
    pub rule: ActionRule,
    pub score: f64,
    pub evidence: ActionEvidence,
}

/// Score a matched (page, rule) pair. `learning_weight` is the current
/// weight for the rule's pillar (1.0 when unmapped); the rule's own city
/// bias applies only when ranking the default city.
pub fn score_match(
    rule: &ActionRule,
    observed: f64,
    learning_weight: f64,
    city_matches: bool,
) -> (f64, ActionEvidence) {
    let gap = rule.expected_uplift * rule.severity.gap_multiplier() * pillar_boost(&rule.pillar);
    let city_bias = if city_matches {
        rule.city_bias.unwrap_or(1.0)
    } else {
        1.0
    };
    let effort_multiplier = rule.effort.multiplier();
    let score = gap * learning_weight * city_bias * effort_multiplier;

    let evidence = ActionEvidence {
        rule_id: rule.id.clone(),
        metric: rule.condition.metric.clone(),
        observed,
        threshold: rule.condition.threshold,
        gap,
        learning_weight,
        city_bias,
        effort_multiplier,
    };
    (score, evidence)
}

/// Pool candidates for one page. Pure; the caller supplies metrics and
/// the pillar-weight lookup.
pub fn candidates_for_page(
    page: &str,
    metrics: &HashMap<String, f64>,
    rule_set: &[ActionRule],
    pillar_weights: &HashMap<String, f64>,
    city_matches: bool,
) -> Vec<Candidate> {
    let mut out = Vec::new();
    for rule in rule_set {
        if !evaluate(&rule.condition, metrics) {
            continue;
        }
        // Condition matched, so the metric is present
        let Some(observed) = metrics.get(&rule.condition.metric).copied() else {
            continue;
        };
        let learning_weight = pillar_weights.get(&rule.pillar).copied().unwrap_or(1.0);
        let (score, evidence) = score_match(rule, observed, learning_weight, city_matches);
        out.push(Candidate {
            page: page.to_string(),
            rule: rule.clone(),
            score,
            evidence,
        });
    }
    out
}

/// Globally rank pooled candidates and keep the top N. The sort is
/// stable, so ties keep watchlist-then-rule order.
pub fn rank_candidates(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(top_n);
    candidates
}

#[derive(Clone)]
pub struct ActionRanker {
    config: Arc<Config>,
    pool: SqlitePool,
    weights: WeightStore,
    metrics: Arc<dyn MetricsProvider>,
}

impl ActionRanker {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        weights: WeightStore,
        metrics: Arc<dyn MetricsProvider>,
    ) -> Self {
        Self {
            config,
            pool,
            weights,
            metrics,
        }
    }

    fn rule_set(&self) -> Result<Vec<ActionRule>> {
        match &self.config.actions.rules_path {
            Some(path) => rules::load_rules(path),
            None => Ok(rules::default_rules()),
        }
    }

    /// Rank and persist a fresh batch of recommended actions for a city.
    pub async fn rank(&self, city: &str) -> Result<Vec<RecommendedAction>> {
        let city = if city.trim().is_empty() {
            self.config.scoring.default_city.as_str()
        } else {
            city.trim()
        };
        let rule_set = self.rule_set()?;
        let weight_set = self.weights.get().await?;
        let pillar_weights: HashMap<String, f64> = weight_set
            .weights
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        let city_matches = city == self.config.scoring.default_city;

        let pages = self.metrics.watchlist(city).await?;
        let mut candidates = Vec::new();
        for page in &pages {
            // A page whose metrics fail simply contributes no candidates
            let metrics = match self.metrics.page_metrics(page).await {
                Ok(metrics) => metrics,
                Err(err) => {
                    warn!(page, error = %err, "metrics unavailable; page skipped");
                    continue;
                }
            };
            candidates.extend(candidates_for_page(
                page,
                &metrics,
                &rule_set,
                &pillar_weights,
                city_matches,
            ));
        }

        let kept = rank_candidates(candidates, self.config.actions.top_n);
        // Microsecond resolution: created_at doubles as the batch key,
        // and two ranking runs can land in the same second.
        let created_at = chrono::Utc::now().timestamp_micros();

        let mut actions = Vec::with_capacity(kept.len());
        let mut tx = self.pool.begin().await?;
        for (i, candidate) in kept.into_iter().enumerate() {
            let action = RecommendedAction {
                id: Uuid::new_v4().to_string(),
                city: city.to_string(),
                page: candidate.page,
                pillar: candidate.rule.pillar.clone(),
                title: candidate.rule.title.clone(),
                guidance: candidate.rule.guidance.clone(),
                expected_uplift: candidate.rule.expected_uplift,
                effort: candidate.rule.effort,
                confidence: candidate.evidence.learning_weight,
                evidence: candidate.evidence,
                score: candidate.score,
                priority: (i + 1) as i64,
                status: "open".to_string(),
                created_at,
            };

            sqlx::query(
                "INSERT INTO actions \
                 (id, city, page, rule_id, pillar, title, guidance, expected_uplift, effort, \
                  confidence, evidence_json, score, priority, status, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&action.id)
            .bind(&action.city)
            .bind(&action.page)
            .bind(&action.evidence.rule_id)
            .bind(&action.pillar)
            .bind(&action.title)
            .bind(&action.guidance)
            .bind(action.expected_uplift)
            .bind(action.effort.as_str())
            .bind(action.confidence)
            .bind(serde_json::to_string(&action.evidence)?)
            .bind(action.score)
            .bind(action.priority)
            .bind(&action.status)
            .bind(action.created_at)
            .execute(&mut *tx)
            .await?;

            actions.push(action);
        }
        tx.commit().await?;

        info!(city, kept = actions.len(), pages = pages.len(), "actions ranked");
        Ok(actions)
    }

    /// The most recent batch for a city, in priority order.
    pub async fn latest(&self, city: &str) -> Result<Vec<RecommendedAction>> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM actions WHERE city = ?")
                .bind(city)
                .fetch_one(&self.pool)
                .await?;
        let Some(created_at) = latest else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            "SELECT id, city, page, pillar, title, guidance, expected_uplift, effort, \
             confidence, evidence_json, score, priority, status, created_at \
             FROM actions WHERE city = ? AND created_at = ? ORDER BY priority",
        )
        .bind(city)
        .bind(created_at)
        .fetch_all(&self.pool)
        .await?;

        let mut actions = Vec::with_capacity(rows.len());
        for row in &rows {
            let effort: String = row.get("effort");
            let evidence_json: String = row.get("evidence_json");
            actions.push(RecommendedAction {
                id: row.get("id"),
                city: row.get("city"),
                page: row.get("page"),
                pillar: row.get("pillar"),
                title: row.get("title"),
                guidance: row.get("guidance"),
                expected_uplift: row.get("expected_uplift"),
                effort: Effort::from_str(&effort)?,
                confidence: row.get("confidence"),
                evidence: serde_json::from_str(&evidence_json)?,
                score: row.get("score"),
                priority: row.get("priority"),
                status: row.get("status"),
                created_at: row.get("created_at"),
            });
        }
        Ok(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Condition, Operator, Severity};

    fn test_rule(id: &str, pillar: &str, severity: Severity, effort: Effort) -> ActionRule {
        ActionRule {
            id: id.to_string(),
            pillar: pillar.to_string(),
            condition: Condition {
                metric: "word_count".to_string(),
                operator: Operator::Lt,
                threshold: 300.0,
            },
            severity,
            effort,
            expected_uplift: 0.5,
            city_bias: None,
            title: "t".to_string(),
            guidance: String::new(),
        }
    }

    #[test]
    fn score_composes_all_factors() {
        let rule = test_rule("r", "schema", Severity::High, Effort::Low);
        let (score, evidence) = score_match(&rule, 120.0, 0.8, false);
        // gap = 0.5 * 1.3 * 1.2; score = gap * 0.8 * 1.0 * 1.2
        let gap = 0.5 * 1.3 * 1.2;
        assert!((evidence.gap - gap).abs() < 1e-9);
        assert!((score - gap * 0.8 * 1.2).abs() < 1e-9);
        assert_eq!(evidence.observed, 120.0);
        assert_eq!(evidence.threshold, 300.0);
    }

    #[test]
    fn unmapped_pillar_gets_unit_learning_weight() {
        let rule = test_rule("r", "social", Severity::Medium, Effort::Medium);
        let mut metrics = HashMap::new();
        metrics.insert("word_count".to_string(), 100.0);
        let out = candidates_for_page("/p", &metrics, &[rule], &HashMap::new(), false);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].evidence.learning_weight, 1.0);
    }

    #[test]
    fn city_bias_applies_only_in_default_city() {
        let mut rule = test_rule("r", "content", Severity::Medium, Effort::Medium);
        rule.city_bias = Some(1.3);
        let (home, _) = score_match(&rule, 100.0, 1.0, true);
        let (away, _) = score_match(&rule, 100.0, 1.0, false);
        assert!((home - away * 1.3).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_global_across_pages() {
        let strong = test_rule("strong", "schema", Severity::Critical, Effort::Low);
        let weak = test_rule("weak", "content", Severity::Low, Effort::High);
        let mut metrics = HashMap::new();
        metrics.insert("word_count".to_string(), 100.0);

        let mut pool = Vec::new();
        pool.extend(candidates_for_page(
            "/a",
            &metrics,
            &[weak.clone()],
            &HashMap::new(),
            false,
        ));
        pool.extend(candidates_for_page(
            "/b",
            &metrics,
            &[strong, weak],
            &HashMap::new(),
            false,
        ));

        let top = rank_candidates(pool, 2);
        assert_eq!(top[0].rule.id, "strong");
        assert_eq!(top[0].page, "/b");
        // Tie between the two weak candidates resolves by pool order
        assert_eq!(top[1].page, "/a");
    }

    #[test]
    fn top_n_truncates() {
        let rule = test_rule("r", "content", Severity::Medium, Effort::Medium);
        let mut metrics = HashMap::new();
        metrics.insert("word_count".to_string(), 100.0);
        let mut pool = Vec::new();
        for i in 0..10 {
            pool.extend(candidates_for_page(
                &format!("/p{}", i),
                &metrics,
                std::slice::from_ref(&rule),
                &HashMap::new(),
                false,
            ));
        }
        assert_eq!(rank_candidates(pool, 5).len(), 5);
    }

    #[test]
    fn unmatched_rules_produce_no_candidates() {
        let rule = test_rule("r", "content", Severity::Medium, Effort::Medium);
        let mut metrics = HashMap::new();
        metrics.insert("word_count".to_string(), 900.0);
        assert!(candidates_for_page("/p", &metrics, &[rule], &HashMap::new(), false).is_empty());
    }
}
