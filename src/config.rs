use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Per-checker time budget. A checker exceeding it degrades to a
    /// fallback result for that run only.
    #[serde(default = "default_checker_timeout_secs")]
    pub checker_timeout_secs: u64,
    /// Maximum rows kept in the recent-audits registry.
    #[serde(default = "default_recent_cap")]
    pub recent_cap: i64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            checker_timeout_secs: default_checker_timeout_secs(),
            recent_cap: default_recent_cap(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_checker_timeout_secs() -> u64 {
    15
}
fn default_recent_cap() -> i64 {
    50
}
fn default_fetch_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearningConfig {
    /// Default smoothing factor used when the store is first created.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
        }
    }
}

fn default_alpha() -> f64 {
    0.2
}

/// Normalization ranges and biases for the topic scorer.
///
/// These constants were chosen heuristically and have not been calibrated
/// against outcome data, so they are configurable defaults rather than
/// hard-coded values.
#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    #[serde(default = "default_city")]
    pub default_city: String,
    #[serde(default = "default_city_bias")]
    pub city_bias: f64,
    #[serde(default = "default_authority_min")]
    pub authority_min: f64,
    #[serde(default = "default_authority_max")]
    pub authority_max: f64,
    #[serde(default = "default_traffic_cap")]
    pub traffic_cap: f64,
    /// Content length cap in words.
    #[serde(default = "default_content_cap")]
    pub content_cap: f64,
    /// Rank positions deeper than this normalize to zero opportunity.
    #[serde(default = "default_rank_depth")]
    pub rank_depth: f64,
    #[serde(default = "default_rank_variance_cap")]
    pub rank_variance_cap: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_city: default_city(),
            city_bias: default_city_bias(),
            authority_min: default_authority_min(),
            authority_max: default_authority_max(),
            traffic_cap: default_traffic_cap(),
            content_cap: default_content_cap(),
            rank_depth: default_rank_depth(),
            rank_variance_cap: default_rank_variance_cap(),
        }
    }
}

fn default_city() -> String {
    "Hyderabad".to_string()
}
fn default_city_bias() -> f64 {
    1.15
}
fn default_authority_min() -> f64 {
    1_000.0
}
fn default_authority_max() -> f64 {
    50_000.0
}
fn default_traffic_cap() -> f64 {
    10_000.0
}
fn default_content_cap() -> f64 {
    2_500.0
}
fn default_rank_depth() -> f64 {
    30.0
}
fn default_rank_variance_cap() -> f64 {
    200.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ActionsConfig {
    /// Path to a TOML rule set. Falls back to the built-in rules when unset.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            top_n: default_top_n(),
        }
    }
}

fn default_top_n() -> usize {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if !(config.learning.alpha > 0.0 && config.learning.alpha <= 1.0) {
        anyhow::bail!("learning.alpha must be in (0.0, 1.0]");
    }

    if config.audit.checker_timeout_secs == 0 {
        anyhow::bail!("audit.checker_timeout_secs must be > 0");
    }

    if config.audit.recent_cap < 1 {
        anyhow::bail!("audit.recent_cap must be >= 1");
    }

    if config.scoring.authority_max <= config.scoring.authority_min {
        anyhow::bail!("scoring.authority_max must exceed scoring.authority_min");
    }

    if config.scoring.city_bias < 1.0 {
        anyhow::bail!("scoring.city_bias must be >= 1.0");
    }

    if config.actions.top_n == 0 {
        anyhow::bail!("actions.top_n must be >= 1");
    }

    Ok(config)
}

impl Config {
    /// Minimal config for tests and ad-hoc tooling.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig::default(),
            audit: AuditConfig::default(),
            learning: LearningConfig::default(),
            scoring: ScoringConfig::default(),
            actions: ActionsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::minimal(PathBuf::from("/tmp/aether.sqlite"));
        assert!(cfg.learning.alpha > 0.0 && cfg.learning.alpha <= 1.0);
        assert!(cfg.scoring.authority_max > cfg.scoring.authority_min);
        assert_eq!(cfg.actions.top_n, 5);
    }

    #[test]
    fn parse_minimal_toml() {
        let cfg: Config = toml::from_str("[db]\npath = \"./data/aether.sqlite\"\n").unwrap();
        assert_eq!(cfg.audit.checker_timeout_secs, 15);
        assert_eq!(cfg.scoring.city_bias, 1.15);
        assert!(cfg.actions.rules_path.is_none());
    }
}
