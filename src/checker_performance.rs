//! Performance checker: response latency, payload weight, and (when the
//! metrics provider carries field data) Core Web Vitals.

use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::{CheckOutcome, CheckTarget, Checker};
use crate::models::{Issue, Severity};

pub struct PerformanceChecker;

fn issue(
    target: &CheckTarget,
    id: &str,
    severity: Severity,
    impact: f64,
    description: String,
    fix: &str,
) -> Issue {
    Issue {
        id: format!("performance.{}", id),
        page: target.url.clone(),
        severity,
        description,
        impact_score: impact,
        suggested_fix: fix.to_string(),
        pages_affected: None,
    }
}

#[async_trait]
impl Checker for PerformanceChecker {
    fn category(&self) -> &str {
        "performance"
    }

    fn description(&self) -> &str {
        "Performance: response time, payload size, Core Web Vitals field data"
    }

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome> {
        let snap = &target.snapshot;
        let mut issues = Vec::new();
        let mut deductions = 0.0;

        if snap.elapsed_ms > 3_000 {
            deductions += 30.0;
            issues.push(issue(
                target,
                "slow-response",
                Severity::Critical,
                0.8,
                format!("Server responded in {} ms (budget 3000 ms)", snap.elapsed_ms),
                "Cache rendered pages or move listing queries off the request path",
            ));
        } else if snap.elapsed_ms > 1_500 {
            deductions += 15.0;
            issues.push(issue(
                target,
                "sluggish-response",
                Severity::High,
                0.5,
                format!("Server responded in {} ms (budget 1500 ms)", snap.elapsed_ms),
                "Profile the slowest listing queries and add caching",
            ));
        }

        if snap.body_bytes > 2_000_000 {
            deductions += 12.0;
            issues.push(issue(
                target,
                "heavy-page",
                Severity::High,
                0.5,
                format!("Page payload is {} KB", snap.body_bytes / 1024),
                "Compress images and defer non-critical scripts",
            ));
        } else if snap.body_bytes > 1_000_000 {
            deductions += 6.0;
            issues.push(issue(
                target,
                "large-page",
                Severity::Medium,
                0.3,
                format!("Page payload is {} KB", snap.body_bytes / 1024),
                "Lazy-load below-the-fold images",
            ));
        }

        // Field data, when a connector has populated it
        if let Some(lcp) = target.metrics.get("lcp_ms") {
            if *lcp > 2_500.0 {
                deductions += 12.0;
                issues.push(issue(
                    target,
                    "poor-lcp",
                    Severity::High,
                    0.6,
                    format!("Largest Contentful Paint at {:.0} ms (good is < 2500)", lcp),
                    "Preload the hero image and inline critical CSS",
                ));
            }
        }

        if let Some(cls) = target.metrics.get("cls") {
            if *cls > 0.1 {
                deductions += 8.0;
                issues.push(issue(
                    target,
                    "layout-shift",
                    Severity::Medium,
                    0.4,
                    format!("Cumulative Layout Shift at {:.2} (good is < 0.1)", cls),
                    "Reserve dimensions for listing images and ad slots",
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

    fn target(elapsed_ms: u64, metrics: HashMap<String, f64>) -> CheckTarget {
        CheckTarget {
            url: "https://example.com/".to_string(),
            snapshot: PageSnapshot {
                elapsed_ms,
                body_bytes: 200_000,
                ..Default::default()
            },
            metrics,
        }
    }

    #[tokio::test]
    async fn fast_light_page_scores_full() {
        let outcome = PerformanceChecker
            .check(&target(300, HashMap::new()))
            .await
            .unwrap();
        assert_eq!(outcome.score, 100.0);
    }

    #[tokio::test]
    async fn very_slow_response_is_critical() {
        let outcome = PerformanceChecker
            .check(&target(4_200, HashMap::new()))
            .await
            .unwrap();
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical));
    }

    #[tokio::test]
    async fn field_metrics_feed_issues() {
        let mut metrics = HashMap::new();
        metrics.insert("lcp_ms".to_string(), 3_800.0);
        metrics.insert("cls".to_string(), 0.25);
        let outcome = PerformanceChecker.check(&target(300, metrics)).await.unwrap();
        let ids: Vec<&str> = outcome.issues.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"performance.poor-lcp"));
        assert!(ids.contains(&"performance.layout-shift"));
    }

    #[tokio::test]
    async fn absent_field_metrics_do_not_penalize() {
        let outcome = PerformanceChecker
            .check(&target(300, HashMap::new()))
            .await
            .unwrap();
        assert!(outcome.issues.is_empty());
    }
}
