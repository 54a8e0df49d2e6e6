//! Indexability checker: can conventional and AI crawlers find and
//! understand this page at all?

use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::{CheckOutcome, CheckTarget, Checker};
use crate::models::{Issue, Severity};

pub struct IndexabilityChecker;

fn issue(
    target: &CheckTarget,
    id: &str,
    severity: Severity,
    impact: f64,
    description: String,
    fix: &str,
) -> Issue {
    Issue {
        id: format!("indexability.{}", id),
        page: target.url.clone(),
        severity,
        description,
        impact_score: impact,
        suggested_fix: fix.to_string(),
        pages_affected: None,
    }
}

#[async_trait]
impl Checker for IndexabilityChecker {
    fn category(&self) -> &str {
        "indexability"
    }

    fn description(&self) -> &str {
        "Crawler access: HTTP status, robots.txt, sitemap, canonical, core meta tags"
    }

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome> {
        let snap = &target.snapshot;
        let mut issues = Vec::new();
        let mut deductions = 0.0;

        if snap.status != 200 {
            deductions += 40.0;
            issues.push(issue(
                target,
                "not-accessible",
                Severity::Critical,
                0.9,
                format!("Page returned HTTP {}", snap.status),
                "Make the page return 200 for crawlers",
            ));
        }

        if snap.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            deductions += 20.0;
            issues.push(issue(
                target,
                "title-missing",
                Severity::Critical,
                0.8,
                "Missing <title> tag".to_string(),
                "Add a descriptive 50-60 character title",
            ));
        }

        if snap.meta_description.is_none() {
            deductions += 12.0;
            issues.push(issue(
                target,
                "description-missing",
                Severity::High,
                0.6,
                "Missing meta description".to_string(),
                "Add a 150-160 character meta description",
            ));
        }

        if !snap.robots_txt_found {
            deductions += 10.0;
            issues.push(issue(
                target,
                "robots-missing",
                Severity::Medium,
                0.4,
                "No robots.txt found at the site root".to_string(),
                "Publish a robots.txt that welcomes search and AI crawlers",
            ));
        } else if !snap.ai_crawlers_blocked.is_empty() {
            deductions += 15.0;
            issues.push(issue(
                target,
                "ai-crawlers-blocked",
                Severity::High,
                0.7,
                format!(
                    "robots.txt blocks AI crawlers: {}",
                    snap.ai_crawlers_blocked.join(", ")
                ),
                "Allow AI answer-engine crawlers (GPTBot, ClaudeBot, PerplexityBot) in robots.txt",
            ));
        }

        if !snap.sitemap_found {
            deductions += 10.0;
            issues.push(issue(
                target,
                "sitemap-missing",
                Severity::Medium,
                0.5,
                "No sitemap.xml found at the site root".to_string(),
                "Generate a sitemap covering all listing and city pages",
            ));
        }

        if !snap.has_canonical {
            deductions += 8.0;
            issues.push(issue(
                target,
                "canonical-missing",
                Severity::Medium,
                0.4,
                "Missing canonical URL".to_string(),
                "Add <link rel=\"canonical\"> to prevent duplicate-content dilution",
            ));
        }

        if !snap.has_viewport {
            deductions += 8.0;
            issues.push(issue(
                target,
                "viewport-missing",
                Severity::Medium,
                0.4,
                "Missing viewport meta tag (not mobile-friendly)".to_string(),
                "Add <meta name=\"viewport\" content=\"width=device-width\">",
            ));
        }

        Ok(CheckOutcome::from_deductions(deductions, issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::PageSnapshot;
    use std::collections::HashMap;

    fn target(snapshot: PageSnapshot) -> CheckTarget {
        CheckTarget {
            url: "https://example.com/".to_string(),
            snapshot,
            metrics: HashMap::new(),
        }
    }

    fn healthy_snapshot() -> PageSnapshot {
        PageSnapshot {
            url: "https://example.com/".to_string(),
            status: 200,
            title: Some("Used Cars in Hyderabad | CarArth".to_string()),
            meta_description: Some("Browse verified used cars.".to_string()),
            has_viewport: true,
            has_canonical: true,
            robots_txt_found: true,
            sitemap_found: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn healthy_page_scores_full() {
        let outcome = IndexabilityChecker
            .check(&target(healthy_snapshot()))
            .await
            .unwrap();
        assert_eq!(outcome.score, 100.0);
        assert!(outcome.issues.is_empty());
    }

    #[tokio::test]
    async fn blocked_ai_crawlers_flagged_high() {
        let mut snap = healthy_snapshot();
        snap.ai_crawlers_blocked = vec!["GPTBot".to_string()];
        let outcome = IndexabilityChecker.check(&target(snap)).await.unwrap();
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].severity, Severity::High);
        assert!(outcome.issues[0].id.ends_with("ai-crawlers-blocked"));
    }

    #[tokio::test]
    async fn bare_page_accumulates_deductions() {
        let outcome = IndexabilityChecker
            .check(&target(PageSnapshot {
                status: 404,
                ..Default::default()
            }))
            .await
            .unwrap();
        assert!(outcome.score < 30.0);
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical));
    }
}
