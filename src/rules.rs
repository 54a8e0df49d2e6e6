//! Action rule sets and condition evaluation.
//!
//! Rules are declarative: `{metric, operator, threshold}` against a
//! page's metrics record, plus the scoring inputs (pillar, severity,
//! effort, expected uplift). They load from a TOML file when
//! `actions.rules_path` is set, otherwise the built-in marketplace set
//! applies. Rule sets are read-only per ranking run.
//!
//! Condition evaluation is total: a missing metric is `false`, never an
//! error, so incomplete data can't spuriously match a rule.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::{ActionRule, Condition, Effort, Operator, Severity};

/// Pillars that receive extra ranking weight: structured data, AI
/// visibility, and performance move both discovery channels at once.
const BOOSTED_PILLARS: &[&str] = &["schema", "geo_correlation", "performance"];
const PILLAR_BOOST: f64 = 1.2;

pub fn pillar_boost(pillar: &str) -> f64 {
    if BOOSTED_PILLARS.contains(&pillar) {
        PILLAR_BOOST
    } else {
        1.0
    }
}

/// Evaluate one condition against a metrics record.
pub fn evaluate(condition: &Condition, metrics: &HashMap<String, f64>) -> bool {
    let Some(observed) = metrics.get(&condition.metric).copied() else {
        return false;
    };
    if !observed.is_finite() {
        return false;
    }
    match condition.operator {
        Operator::Gt => observed > condition.threshold,
        Operator::Ge => observed >= condition.threshold,
        Operator::Lt => observed < condition.threshold,
        Operator::Le => observed <= condition.threshold,
        Operator::Eq => observed == condition.threshold,
        Operator::Ne => observed != condition.threshold,
    }
}

#[derive(Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<ActionRule>,
}

/// Load and validate a TOML rule set.
pub fn load_rules(path: &Path) -> Result<Vec<ActionRule>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    let file: RuleFile =
        toml::from_str(&content).with_context(|| "Failed to parse rules file")?;
    validate(&file.rules)?;
    Ok(file.rules)
}

fn validate(rules: &[ActionRule]) -> Result<()> {
    if rules.is_empty() {
        bail!("rule set is empty");
    }
    let mut seen = std::collections::HashSet::new();
    for rule in rules {
        if rule.id.trim().is_empty() {
            bail!("rule with empty id");
        }
        if !seen.insert(rule.id.as_str()) {
            bail!("duplicate rule id: '{}'", rule.id);
        }
        if rule.pillar.trim().is_empty() {
            bail!("rule '{}': pillar must not be empty", rule.id);
        }
        if rule.condition.metric.trim().is_empty() {
            bail!("rule '{}': condition metric must not be empty", rule.id);
        }
        if !(rule.expected_uplift > 0.0 && rule.expected_uplift <= 1.0) {
            bail!(
                "rule '{}': expected_uplift must be in (0.0, 1.0], got {}",
                rule.id,
                rule.expected_uplift
            );
        }
        if let Some(bias) = rule.city_bias {
            if bias < 1.0 {
                bail!("rule '{}': city_bias must be >= 1.0, got {}", rule.id, bias);
            }
        }
    }
    Ok(())
}

fn rule(
    id: &str,
    pillar: &str,
    metric: &str,
    operator: Operator,
    threshold: f64,
    severity: Severity,
    effort: Effort,
    uplift: f64,
    title: &str,
    guidance: &str,
) -> ActionRule {
    ActionRule {
        id: id.to_string(),
        pillar: pillar.to_string(),
        condition: Condition {
            metric: metric.to_string(),
            operator,
            threshold,
        },
        severity,
        effort,
        expected_uplift: uplift,
        city_bias: None,
        title: title.to_string(),
        guidance: guidance.to_string(),
    }
}

/// Built-in rule set for a used-car marketplace, used when no rules file
/// is configured.
pub fn default_rules() -> Vec<ActionRule> {
    vec![
        rule(
            "content.thin",
            "content",
            "word_count",
            Operator::Lt,
            300.0,
            Severity::High,
            Effort::Medium,
            0.6,
            "Expand thin listing page",
            "Add buying guidance, pricing context, and an FAQ section to reach 600+ words",
        ),
        rule(
            "schema.vehicle-missing",
            "schema",
            "vehicle_schema_count",
            Operator::Eq,
            0.0,
            Severity::Critical,
            Effort::Low,
            0.7,
            "Add Vehicle JSON-LD markup",
            "Emit Vehicle structured data with price, mileage, and model year per listing",
        ),
        rule(
            "schema.faq-missing",
            "schema",
            "faq_schema_count",
            Operator::Eq,
            0.0,
            Severity::Medium,
            Effort::Low,
            0.4,
            "Add FAQPage markup",
            "Answer engines quote FAQ markup directly; add the five most-asked questions",
        ),
        rule(
            "performance.slow-lcp",
            "performance",
            "lcp_ms",
            Operator::Gt,
            2_500.0,
            Severity::High,
            Effort::Medium,
            0.5,
            "Fix Largest Contentful Paint",
            "Preload the hero image and inline critical CSS",
        ),
        rule(
            "performance.layout-shift",
            "performance",
            "cls",
            Operator::Gt,
            0.1,
            Severity::Medium,
            Effort::Low,
            0.3,
            "Stabilize layout",
            "Reserve dimensions for listing images and ad slots",
        ),
        rule(
            "geo.low-mentions",
            "geo_correlation",
            "ai_mention_rate",
            Operator::Lt,
            0.2,
            Severity::High,
            Effort::High,
            0.8,
            "Raise AI answer-engine visibility",
            "Unblock AI crawlers, add conversational content, strengthen entity signals",
        ),
        rule(
            "geo.late-mentions",
            "geo_correlation",
            "ai_first_mention_share",
            Operator::Lt,
            0.3,
            Severity::Medium,
            Effort::Medium,
            0.4,
            "Lead more AI answers",
            "Target comparison queries where the brand can open the answer",
        ),
        rule(
            "indexability.low-coverage",
            "indexability",
            "indexed_share",
            Operator::Lt,
            0.7,
            Severity::Critical,
            Effort::Medium,
            0.7,
            "Recover index coverage",
            "Audit robots directives and canonical tags on excluded listing pages",
        ),
        rule(
            "content.low-ctr",
            "content",
            "serp_ctr",
            Operator::Lt,
            0.02,
            Severity::Medium,
            Effort::Low,
            0.35,
            "Rewrite title and description",
            "Front-load model, city, and price in the title; make the description a pitch",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn condition(metric: &str, operator: Operator, threshold: f64) -> Condition {
        Condition {
            metric: metric.to_string(),
            operator,
            threshold,
        }
    }

    #[test]
    fn all_operators_evaluate() {
        let m = metrics(&[("x", 5.0)]);
        assert!(evaluate(&condition("x", Operator::Gt, 4.0), &m));
        assert!(evaluate(&condition("x", Operator::Ge, 5.0), &m));
        assert!(evaluate(&condition("x", Operator::Lt, 6.0), &m));
        assert!(evaluate(&condition("x", Operator::Le, 5.0), &m));
        assert!(evaluate(&condition("x", Operator::Eq, 5.0), &m));
        assert!(evaluate(&condition("x", Operator::Ne, 4.0), &m));
        assert!(!evaluate(&condition("x", Operator::Gt, 5.0), &m));
    }

    #[test]
    fn missing_metric_never_matches() {
        let m = metrics(&[("x", 5.0)]);
        // Even != must not match on absent data
        assert!(!evaluate(&condition("y", Operator::Ne, 0.0), &m));
        assert!(!evaluate(&condition("y", Operator::Lt, 100.0), &m));
    }

    #[test]
    fn non_finite_metric_never_matches() {
        let m = metrics(&[("x", f64::NAN)]);
        assert!(!evaluate(&condition("x", Operator::Ne, 0.0), &m));
    }

    #[test]
    fn builtin_rules_validate() {
        validate(&default_rules()).unwrap();
    }

    #[test]
    fn boosted_pillars() {
        assert_eq!(pillar_boost("schema"), 1.2);
        assert_eq!(pillar_boost("geo_correlation"), 1.2);
        assert_eq!(pillar_boost("performance"), 1.2);
        assert_eq!(pillar_boost("content"), 1.0);
        assert_eq!(pillar_boost("indexability"), 1.0);
    }

    #[test]
    fn rules_parse_from_toml() {
        let toml_src = r#"
[[rules]]
id = "content.custom"
pillar = "content"
severity = "high"
effort = "low"
expected_uplift = 0.5
title = "Custom rule"
guidance = "Do the thing"

[rules.condition]
metric = "word_count"
operator = "<"
threshold = 250
"#;
        let file: RuleFile = toml::from_str(toml_src).unwrap();
        validate(&file.rules).unwrap();
        assert_eq!(file.rules[0].condition.operator, Operator::Lt);
        assert_eq!(file.rules[0].condition.threshold, 250.0);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut rules = default_rules();
        let dup = rules[0].clone();
        rules.push(dup);
        assert!(validate(&rules).is_err());
    }

    #[test]
    fn out_of_range_uplift_rejected() {
        let mut rules = default_rules();
        rules[0].expected_uplift = 1.5;
        assert!(validate(&rules).is_err());
    }
}
