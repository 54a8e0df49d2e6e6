//! AI-visibility correlation checker.
//!
//! Reads the brand's sampled AI-mention figures from the metrics
//! provider and correlates them with what the crawl snapshot shows: a
//! page that is technically indexable but never cited by answer engines
//! is a different problem from one that blocks their crawlers outright.

use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::{CheckOutcome, CheckTarget, Checker};
use crate::models::{Issue, Severity};

pub struct GeoCorrelationChecker;

fn issue(
    target: &CheckTarget,
    id: &str,
    severity: Severity,
    impact: f64,
    description: String,
    fix: &str,
) -> Issue {
    Issue {
        id: format!("geo_correlation.{}", id),
        page: target.url.clone(),
        severity,
        description,
        impact_score: impact,
        suggested_fix: fix.to_string(),
        pages_affected: None,
    }
}

#[async_trait]
impl Checker for GeoCorrelationChecker {
    fn category(&self) -> &str {
        "geo_correlation"
    }

    fn description(&self) -> &str {
        "AI visibility: sampled answer-engine mention rate vs. crawlability"
    }

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome> {
        let mention_rate = target.metrics.get("ai_mention_rate").copied();
        let first_share = target.metrics.get("ai_first_mention_share").copied();

        // No sample collected yet: neutral score, one informative issue.
        let Some(mention_rate) = mention_rate else {
            return Ok(CheckOutcome {
                score: 50.0,
                issues: vec![issue(
                    target,
                    "no-sample",
                    Severity::Medium,
                    0.3,
                    "No AI-visibility sample collected for this page".to_string(),
                    "Run the answer-engine sampler so mention rates can be tracked",
                )],
            });
        };

        let mut issues = Vec::new();
        let mut deductions = 0.0;

        if mention_rate < 0.2 {
            let crawlers_blocked = !target.snapshot.ai_crawlers_blocked.is_empty();
            if crawlers_blocked {
                deductions += 35.0;
                issues.push(issue(
                    target,
                    "blocked-and-invisible",
                    Severity::Critical,
                    0.9,
                    format!(
                        "AI engines mention the brand in only {:.0}% of sampled answers while robots.txt blocks their crawlers",
                        mention_rate * 100.0
                    ),
                    "Unblock AI crawlers first; visibility cannot recover while they are disallowed",
                ));
            } else {
                deductions += 25.0;
                issues.push(issue(
                    target,
                    "rarely-cited",
                    Severity::High,
                    0.7,
                    format!(
                        "AI engines mention the brand in only {:.0}% of sampled answers",
                        mention_rate * 100.0
                    ),
                    "Add conversational FAQ content and machine-readable listing data",
                ));
            }
        } else if mention_rate < 0.5 {
            deductions += 12.0;
            issues.push(issue(
                target,
                "below-half-citation",
                Severity::Medium,
                0.5,
                format!(
                    "AI engines mention the brand in {:.0}% of sampled answers",
                    mention_rate * 100.0
                ),
                "Strengthen entity signals: consistent brand naming, dealer markup, citations",
            ));
        }

        if let Some(first_share) = first_share {
            if mention_rate >= 0.2 && first_share < 0.3 {
                deductions += 8.0;
                issues.push(issue(
                    target,
                    "late-mention",
                    Severity::Medium,
                    0.4,
                    format!(
                        "Brand appears first in only {:.0}% of answers that mention it",
                        first_share * 100.0
                    ),
                    "Target comparison queries where the brand can lead the answer",
                ));
            }
        }

        Ok(CheckOutcome::from_deductions(deductions, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::PageSnapshot;
    use std::collections::HashMap;

    fn target(metrics: HashMap<String, f64>, blocked: Vec<String>) -> CheckTarget {
        CheckTarget {
            url: "https://example.com/".to_string(),
            snapshot: PageSnapshot {
                ai_crawlers_blocked: blocked,
                ..Default::default()
            },
            metrics,
        }
    }

    #[tokio::test]
    async fn missing_sample_is_neutral() {
        let outcome = GeoCorrelationChecker
            .check(&target(HashMap::new(), Vec::new()))
            .await
            .unwrap();
        assert_eq!(outcome.score, 50.0);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].id, "geo_correlation.no-sample");
    }

    #[tokio::test]
    async fn low_mentions_with_blocked_crawlers_is_critical() {
        let mut metrics = HashMap::new();
        metrics.insert("ai_mention_rate".to_string(), 0.05);
        let outcome = GeoCorrelationChecker
            .check(&target(metrics, vec!["GPTBot".to_string()]))
            .await
            .unwrap();
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn strong_visibility_scores_clean() {
        let mut metrics = HashMap::new();
        metrics.insert("ai_mention_rate".to_string(), 0.7);
        metrics.insert("ai_first_mention_share".to_string(), 0.5);
        let outcome = GeoCorrelationChecker
            .check(&target(metrics, Vec::new()))
            .await
            .unwrap();
        assert_eq!(outcome.score, 100.0);
        assert!(outcome.issues.is_empty());
    }

    #[tokio::test]
    async fn late_mentions_flagged_when_visible() {
        let mut metrics = HashMap::new();
        metrics.insert("ai_mention_rate".to_string(), 0.6);
        metrics.insert("ai_first_mention_share".to_string(), 0.1);
        let outcome = GeoCorrelationChecker
            .check(&target(metrics, Vec::new()))
            .await
            .unwrap();
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.id == "geo_correlation.late-mention"));
    }
}
