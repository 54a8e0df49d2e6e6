//! Structured-data checker: JSON-LD coverage and social markup.
//!
//! AI answer engines lean heavily on Schema.org data when summarizing a
//! marketplace, so missing vehicle/dealer markup hurts both channels.

use anyhow::Result;
use async_trait::async_trait;

use crate::checkers::{CheckOutcome, CheckTarget, Checker};
use crate::models::{Issue, Severity};

/// Schema.org types a used-car marketplace page is expected to carry.
const VEHICLE_TYPES: &[&str] = &["Vehicle", "Car", "Product"];
const DEALER_TYPES: &[&str] = &["AutoDealer", "Organization", "LocalBusiness"];

pub struct SchemaChecker;

fn issue(
    target: &CheckTarget,
    id: &str,
    severity: Severity,
    impact: f64,
    description: &str,
    fix: &str,
) -> Issue {
    Issue {
        id: format!("schema.{}", id),
        page: target.url.clone(),
        severity,
        description: description.to_string(),
        impact_score: impact,
        suggested_fix: fix.to_string(),
        pages_affected: None,
    }
}

#[async_trait]
impl Checker for SchemaChecker {
    fn category(&self) -> &str {
        "schema"
    }

    fn description(&self) -> &str {
        "Structured data: JSON-LD types, Open Graph and social markup"
    }

    async fn check(&self, target: &CheckTarget) -> Result<CheckOutcome> {
        let snap = &target.snapshot;
        let mut issues = Vec::new();
        let mut deductions = 0.0;

        let types = &snap.json_ld_types;

        if types.is_empty() {
            deductions += 30.0;
            issues.push(issue(
                target,
                "no-structured-data",
                Severity::Critical,
                0.8,
                "No Schema.org structured data found",
                "Add JSON-LD for Vehicle, AutoDealer, and FAQPage",
            ));
        } else {
            if !types.iter().any(|t| VEHICLE_TYPES.contains(&t.as_str())) {
                deductions += 12.0;
                issues.push(issue(
                    target,
                    "vehicle-markup-missing",
                    Severity::Medium,
                    0.5,
                    "No Vehicle/Product markup on a listing-bearing page",
                    "Emit Vehicle JSON-LD with price, mileage, and model year",
                ));
            }
            if !types.iter().any(|t| DEALER_TYPES.contains(&t.as_str())) {
                deductions += 8.0;
                issues.push(issue(
                    target,
                    "dealer-markup-missing",
                    Severity::Medium,
                    0.4,
                    "No AutoDealer/Organization markup",
                    "Add AutoDealer JSON-LD so engines can attribute listings to the brand",
                ));
            }
            if !types.iter().any(|t| t == "FAQPage") {
                deductions += 5.0;
                issues.push(issue(
                    target,
                    "faq-markup-missing",
                    Severity::Low,
                    0.3,
                    "No FAQPage markup",
                    "Add an FAQ section with FAQPage JSON-LD; answer engines quote it directly",
                ));
            }
            if !types.iter().any(|t| t == "BreadcrumbList") {
                deductions += 4.0;
                issues.push(issue(
                    target,
                    "breadcrumb-missing",
                    Severity::Low,
                    0.2,
                    "No BreadcrumbList markup",
                    "Add breadcrumb JSON-LD for city → make → model navigation",
                ));
            }
        }

        if snap.og_tag_count == 0 {
            deductions += 10.0;
            issues.push(issue(
                target,
                "og-missing",
                Severity::Medium,
                0.4,
                "Missing Open Graph tags for social sharing",
                "Add og:title, og:description, and og:image",
            ));
        } else if snap.og_tag_count < 3 {
            deductions += 4.0;
            issues.push(issue(
                target,
                "og-incomplete",
                Severity::Low,
                0.2,
                "Incomplete Open Graph tags (missing title/description/image)",
                "Fill out the core og: tag set",
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
            url: "https://example.com/car/1".to_string(),
            snapshot,
            metrics: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn full_markup_scores_clean() {
        let outcome = SchemaChecker
            .check(&target(PageSnapshot {
                json_ld_types: vec![
                    "Vehicle".to_string(),
                    "AutoDealer".to_string(),
                    "FAQPage".to_string(),
                    "BreadcrumbList".to_string(),
                ],
                og_tag_count: 3,
                ..Default::default()
            }))
            .await
            .unwrap();
        assert_eq!(outcome.score, 100.0);
    }

    #[tokio::test]
    async fn absent_json_ld_is_critical() {
        let outcome = SchemaChecker
            .check(&target(PageSnapshot::default()))
            .await
            .unwrap();
        assert!(outcome
            .issues
            .iter()
            .any(|i| i.severity == Severity::Critical));
        assert!(outcome.score <= 60.0);
    }

    #[tokio::test]
    async fn partial_markup_gets_specific_issues() {
        let outcome = SchemaChecker
            .check(&target(PageSnapshot {
                json_ld_types: vec!["Organization".to_string()],
                og_tag_count: 1,
                ..Default::default()
            }))
            .await
            .unwrap();
        let ids: Vec<&str> = outcome.issues.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"schema.vehicle-markup-missing"));
        assert!(ids.contains(&"schema.og-incomplete"));
        assert!(!ids.contains(&"schema.no-structured-data"));
    }
}
