//! Core data models for the discoverability ranking engine.
//!
//! These types flow between the diagnostic checkers, the audit
//! orchestrator, the weight store, the topic scorer, and the
//! recommendation ranker. Most of them are persisted as JSON columns in
//! SQLite and served verbatim over the HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The five diagnostic categories the engine knows about, in registration
/// order. Also the key space of the weight store.
pub const CATEGORIES: [&str; 5] = [
    "indexability",
    "schema",
    "content",
    "performance",
    "geo_correlation",
];

/// Severity of a diagnostic issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed ranking weight used in impact ordering.
    pub fn rank_weight(self) -> f64 {
        match self {
            Severity::Critical => 1.0,
            Severity::High => 0.7,
            Severity::Medium => 0.4,
            Severity::Low => 0.2,
        }
    }

    /// Multiplier applied to a rule's expected uplift when computing gap.
    pub fn gap_multiplier(self) -> f64 {
        match self {
            Severity::Critical => 1.5,
            Severity::High => 1.3,
            Severity::Medium => 1.1,
            Severity::Low => 0.9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => anyhow::bail!("unknown severity: '{}'", other),
        }
    }
}

/// Implementation effort attached to an action rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    /// Cheaper fixes are preferred at equal opportunity.
    pub fn multiplier(self) -> f64 {
        match self {
            Effort::Low => 1.2,
            Effort::Medium => 1.0,
            Effort::High => 0.8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Effort::Low => "low",
            Effort::Medium => "medium",
            Effort::High => "high",
        }
    }
}

impl std::str::FromStr for Effort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Effort::Low),
            "medium" => Ok(Effort::Medium),
            "high" => Ok(Effort::High),
            other => anyhow::bail!("unknown effort: '{}'", other),
        }
    }
}

/// One finding from a diagnostic checker. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identifier, e.g. `content.thin-page`.
    pub id: String,
    /// Affected resource (page URL or path).
    pub page: String,
    pub severity: Severity,
    pub description: String,
    /// Checker's own 0–1 estimate of how much fixing this would help.
    pub impact_score: f64,
    pub suggested_fix: String,
    /// Defaults to 1 when the checker cannot count affected pages.
    #[serde(default)]
    pub pages_affected: Option<u32>,
}

impl Issue {
    /// Severity × impact × pages affected; issues sort descending on this.
    pub fn impact_rank(&self) -> f64 {
        self.severity.rank_weight() * self.impact_score * self.pages_affected.unwrap_or(1) as f64
    }
}

/// Per-category outcome within one audit run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category: String,
    /// 0–100. Zero when the checker degraded.
    pub score: f64,
    pub issues: Vec<Issue>,
    /// True when the checker timed out or failed and was replaced by a
    /// fallback result. Degraded categories are excluded from the
    /// overall weighted mean.
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Running,
    Completed,
    Failed,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Running => "running",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for AuditStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(AuditStatus::Running),
            "completed" => Ok(AuditStatus::Completed),
            "failed" => Ok(AuditStatus::Failed),
            other => anyhow::bail!("unknown audit status: '{}'", other),
        }
    }
}

/// One execution of the audit orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub target_url: String,
    pub status: AuditStatus,
    /// Overall weighted health score, 0–100. None while running or failed.
    pub score: Option<f64>,
    pub categories: Vec<CategoryResult>,
    /// Every issue from every category, ranked descending by impact.
    pub issues: Vec<Issue>,
    pub error: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Row in the bounded recent-audits registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSummary {
    pub id: String,
    pub target_url: String,
    pub status: AuditStatus,
    pub score: Option<f64>,
    pub issues_total: i64,
    pub finished_at: i64,
}

/// Category weights plus the learning rate. Values sum to 1.0 after every
/// applied update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    /// BTreeMap keeps serialization and iteration order deterministic.
    pub weights: BTreeMap<String, f64>,
    pub learning_rate: f64,
    pub updated_at: i64,
}

impl WeightSet {
    pub fn weight(&self, category: &str) -> Option<f64> {
        self.weights.get(category).copied()
    }
}

/// One retrieved source competing for a topic's query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSource {
    pub url: String,
    /// 1-based rank position in the retrieved result set.
    pub rank_position: u32,
    pub est_traffic: f64,
    /// Authority proxy (e.g. referring-domain estimate).
    pub est_authority: f64,
    /// Content length in words.
    pub content_length: f64,
    pub has_structured_data: bool,
}

/// AI-visibility sample for a topic: how often and how prominently AI
/// answer engines mention the target brand across sampled responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiVisibility {
    /// Fraction of sampled responses mentioning the brand, 0–1.
    pub mention_rate: f64,
    /// Fraction of mentions where the brand appears first, 0–1.
    pub first_mention_share: f64,
    /// True when the sample was synthesized rather than observed. The
    /// topic scorer treats synthetic visibility as neutral.
    #[serde(default)]
    pub synthetic: bool,
}

/// Latest score record for one topic. Upserted, never appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScore {
    pub topic_id: String,
    pub city: String,
    pub seo_score: f64,
    pub geo_score: f64,
    pub competition: f64,
    pub difficulty: f64,
    pub win_score: f64,
    /// Full numeric breakdown used to produce the score, for audit.
    pub breakdown: serde_json::Value,
    pub scored_at: i64,
}

/// Comparison operator in a rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl std::str::FromStr for Operator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            other => anyhow::bail!("unknown operator: '{}'", other),
        }
    }
}

/// Structured rule condition evaluated against a page's metrics map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub metric: String,
    pub operator: Operator,
    pub threshold: f64,
}

/// Declarative action rule, loaded read-only per ranking run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRule {
    pub id: String,
    pub pillar: String,
    pub condition: Condition,
    pub severity: Severity,
    pub effort: Effort,
    /// Expected uplift magnitude, 0–1.
    pub expected_uplift: f64,
    /// Optional multiplier applied when ranking the default city.
    #[serde(default)]
    pub city_bias: Option<f64>,
    pub title: String,
    #[serde(default)]
    pub guidance: String,
}

/// Why an action was prioritized: the matched rule, the raw metrics it
/// matched against, and every factor of the composite score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvidence {
    pub rule_id: String,
    pub metric: String,
    pub observed: f64,
    pub threshold: f64,
    pub gap: f64,
    pub learning_weight: f64,
    pub city_bias: f64,
    pub effort_multiplier: f64,
}

/// One ranked recommendation produced by the action ranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendedAction {
    pub id: String,
    pub city: String,
    pub page: String,
    pub pillar: String,
    pub title: String,
    pub guidance: String,
    pub expected_uplift: f64,
    pub effort: Effort,
    /// The learning weight used, surfaced as confidence.
    pub confidence: f64,
    pub evidence: ActionEvidence,
    pub score: f64,
    /// 1..N rank within the batch.
    pub priority: i64,
    pub status: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status: '{}'", other),
        }
    }
}

/// State of one asynchronous topic exploration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExploreJob {
    pub id: String,
    pub query: String,
    pub city: String,
    pub status: JobStatus,
    pub stage: String,
    /// 0–100.
    pub progress: i64,
    pub topic_id: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impact_rank_orders_by_severity_times_impact() {
        let critical = Issue {
            id: "a".into(),
            page: "/".into(),
            severity: Severity::Critical,
            description: String::new(),
            impact_score: 0.5,
            suggested_fix: String::new(),
            pages_affected: None,
        };
        let low = Issue {
            severity: Severity::Low,
            impact_score: 0.9,
            ..critical.clone()
        };
        assert!(critical.impact_rank() > low.impact_rank());
    }

    #[test]
    fn impact_rank_scales_with_pages_affected() {
        let one = Issue {
            id: "a".into(),
            page: "/".into(),
            severity: Severity::Medium,
            description: String::new(),
            impact_score: 0.5,
            suggested_fix: String::new(),
            pages_affected: None,
        };
        let many = Issue {
            pages_affected: Some(10),
            ..one.clone()
        };
        assert!((many.impact_rank() - one.impact_rank() * 10.0).abs() < 1e-12);
    }

    #[test]
    fn severity_round_trips_through_str() {
        for s in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert_eq!(s.as_str().parse::<Severity>().unwrap(), s);
        }
    }

    #[test]
    fn operator_parses_all_forms() {
        for (s, op) in [
            (">", Operator::Gt),
            (">=", Operator::Ge),
            ("<", Operator::Lt),
            ("<=", Operator::Le),
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
        ] {
            assert_eq!(s.parse::<Operator>().unwrap(), op);
        }
        assert!("~=".parse::<Operator>().is_err());
    }
}
