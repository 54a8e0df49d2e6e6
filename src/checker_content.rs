//! Content-quality checker: depth, heading structure, media hygiene, and
//! the list/table structure answer engines extract from.

use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::{CheckOutcome, CheckTarget, Checker};
use crate::models::{Issue, Severity};

pub struct ContentChecker;

fn issue(
    target: &CheckTarget,
    id: &str,
    severity: Severity,
    impact: f64,
    description: String,
    fix: &str,
) -> Issue {
    Issue {
        id: format!("content.{}", id),
        page: target.url.clone(),
        severity,
        description,
        impact_score: impact,
        suggested_fix: fix.to_string(),
        pages_affected: None,
    }
}

#[async_trait]
impl Checker for ContentChecker {
    fn category(&self) -> &str {
        "content"
    }

    fn description(&self) -> &str {
        "Content quality: depth, headings, alt text, internal links, list structure"
    }

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome> {
        let snap = &target.snapshot;
        let mut issues = Vec::new();
        let mut deductions = 0.0;

        if snap.word_count < 300 {
            deductions += 15.0;
            issues.push(issue(
                target,
                "thin-page",
                Severity::High,
                0.6,
                format!(
                    "Low word count ({} words, recommend 300+)",
                    snap.word_count
                ),
                "Expand the page with buying guidance, pricing context, and FAQs",
            ));
        }

        if snap.h1_count == 0 {
            deductions += 20.0;
            issues.push(issue(
                target,
                "h1-missing",
                Severity::Critical,
                0.7,
                "Missing H1 tag".to_string(),
                "Add exactly one H1 naming the page's primary topic",
            ));
        } else if snap.h1_count > 1 {
            deductions += 8.0;
            issues.push(issue(
                target,
                "h1-multiple",
                Severity::Medium,
                0.3,
                format!("Multiple H1 tags found ({})", snap.h1_count),
                "Keep one H1; demote the rest to H2",
            ));
        }

        if let Some(title) = snap.title.as_deref() {
            let len = title.chars().count();
            if len > 0 && len < 30 {
                deductions += 5.0;
                issues.push(issue(
                    target,
                    "title-short",
                    Severity::Low,
                    0.3,
                    format!("Title too short ({} chars, recommend 50-60)", len),
                    "Lengthen the title with model, city, and brand",
                ));
            } else if len > 60 {
                deductions += 4.0;
                issues.push(issue(
                    target,
                    "title-long",
                    Severity::Low,
                    0.2,
                    format!("Title too long ({} chars, recommend 50-60)", len),
                    "Trim the title; engines truncate past ~60 characters",
                ));
            }
        }

        if let Some(desc) = snap.meta_description.as_deref() {
            let len = desc.chars().count();
            if len < 120 {
                deductions += 4.0;
                issues.push(issue(
                    target,
                    "description-short",
                    Severity::Low,
                    0.2,
                    format!("Description too short ({} chars, recommend 150-160)", len),
                    "Extend the meta description toward 150-160 characters",
                ));
            }
        }

        if snap.images_total > 0 && snap.images_missing_alt > 0 {
            let share = snap.images_missing_alt as f64 / snap.images_total as f64;
            deductions += 10.0 * share;
            issues.push(issue(
                target,
                "alt-missing",
                Severity::Medium,
                (0.3 + 0.3 * share).min(0.6),
                format!(
                    "{}/{} images missing alt attribute",
                    snap.images_missing_alt, snap.images_total
                ),
                "Describe each car photo (make, model, angle) in alt text",
            ));
        }

        if snap.internal_links < 3 {
            deductions += 8.0;
            issues.push(issue(
                target,
                "weak-internal-linking",
                Severity::Medium,
                0.4,
                format!("Limited internal linking ({} links)", snap.internal_links),
                "Cross-link related listings and city pages",
            ));
        }

        if snap.list_blocks == 0 && snap.table_blocks == 0 {
            deductions += 5.0;
            issues.push(issue(
                target,
                "no-extractable-structure",
                Severity::Low,
                0.3,
                "No lists or tables on the page".to_string(),
                "Present specs and comparisons as lists/tables; answer engines quote them",
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

    fn rich_snapshot() -> PageSnapshot {
        PageSnapshot {
            title: Some("Certified Used Cars in Hyderabad | CarArth Marketplace".to_string()),
            meta_description: Some("B".repeat(150)),
            word_count: 800,
            h1_count: 1,
            list_blocks: 2,
            internal_links: 12,
            images_total: 6,
            images_missing_alt: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn rich_page_scores_full() {
        let outcome = ContentChecker.check(&target(rich_snapshot())).await.unwrap();
        assert_eq!(outcome.score, 100.0);
        assert!(outcome.issues.is_empty());
    }

    #[tokio::test]
    async fn thin_page_flags_word_count() {
        let mut snap = rich_snapshot();
        snap.word_count = 80;
        let outcome = ContentChecker.check(&target(snap)).await.unwrap();
        assert!(outcome.issues.iter().any(|i| i.id == "content.thin-page"));
    }

    #[tokio::test]
    async fn alt_deduction_scales_with_share() {
        let mut half = rich_snapshot();
        half.images_missing_alt = 3;
        let mut all = rich_snapshot();
        all.images_missing_alt = 6;

        let half_score = ContentChecker.check(&target(half)).await.unwrap().score;
        let all_score = ContentChecker.check(&target(all)).await.unwrap().score;
        assert!(all_score < half_score);
    }

    #[tokio::test]
    async fn multiple_h1_is_medium_not_critical() {
        let mut snap = rich_snapshot();
        snap.h1_count = 3;
        let outcome = ContentChecker.check(&target(snap)).await.unwrap();
        let h1 = outcome
            .issues
            .iter()
            .find(|i| i.id == "content.h1-multiple")
            .unwrap();
        assert_eq!(h1.severity, Severity::Medium);
    }
}
