//! Topic scorer and exploration jobs.
//!
//! A topic is a candidate content opportunity ("used cars under 5 lakh
//! in Hyderabad"). Exploration collects its signal bundle through a
//! [`TopicSignals`] provider, scores it, and upserts a single score
//! record per topic. Scoring is pure arithmetic over the bundle plus the
//! current weight set; all normalization ranges come from
//! [`ScoringConfig`] because they are heuristic defaults, not calibrated
//! constants.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{Config, ScoringConfig};
use crate::models::{AiVisibility, ExploreJob, JobStatus, TopicScore, TopicSource};
use crate::progress::{ExploreProgressReporter, ExploreStage};
use crate::signals::{self, TopicSignals};
use crate::weights::WeightStore;

/// seoWeight fallback when the weight store has no `indexability` entry.
const DEFAULT_SEO_WEIGHT: f64 = 0.6;

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Search-side opportunity, 0–1. Blend of inverted average rank,
/// normalized average traffic, structured-data coverage, and normalized
/// average content length (0.3/0.3/0.2/0.2).
pub fn seo_score(sources: &[TopicSource], cfg: &ScoringConfig) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let n = sources.len() as f64;

    let avg_rank = sources.iter().map(|s| s.rank_position as f64).sum::<f64>() / n;
    let rank_inverted = clamp01(1.0 - (avg_rank - 1.0) / cfg.rank_depth);

    let avg_traffic = sources.iter().map(|s| s.est_traffic).sum::<f64>() / n;
    let traffic_norm = clamp01(avg_traffic / cfg.traffic_cap);

    let structured_share =
        sources.iter().filter(|s| s.has_structured_data).count() as f64 / n;

    let avg_content = sources.iter().map(|s| s.content_length).sum::<f64>() / n;
    let content_norm = clamp01(avg_content / cfg.content_cap);

    clamp01(
        0.3 * rank_inverted + 0.3 * traffic_norm + 0.2 * structured_share + 0.2 * content_norm,
    )
}

/// AI-visibility composite, 0–1: mention rate 0.6, first-mention share
/// 0.4. Absent or synthetic samples score a neutral 0.5 rather than 0.
pub fn geo_score(visibility: Option<&AiVisibility>) -> f64 {
    match visibility {
        Some(v) if !v.synthetic => {
            clamp01(0.6 * v.mention_rate + 0.4 * v.first_mention_share)
        }
        _ => 0.5,
    }
}

/// Competition strength of the top-5 ranked sources only: normalized
/// average authority 0.7, normalized average content length 0.3.
pub fn competition(sources: &[TopicSource], cfg: &ScoringConfig) -> f64 {
    let mut leaders: Vec<&TopicSource> = sources.iter().collect();
    leaders.sort_by_key(|s| s.rank_position);
    leaders.truncate(5);
    if leaders.is_empty() {
        return 0.0;
    }
    let n = leaders.len() as f64;

    let avg_authority = leaders.iter().map(|s| s.est_authority).sum::<f64>() / n;
    let authority_norm = clamp01(
        (avg_authority - cfg.authority_min) / (cfg.authority_max - cfg.authority_min),
    );

    let avg_content = leaders.iter().map(|s| s.content_length).sum::<f64>() / n;
    let content_norm = clamp01(avg_content / cfg.content_cap);

    clamp01(0.7 * authority_norm + 0.3 * content_norm)
}

/// Population variance of rank positions, normalized by the configured
/// cap. Fewer than two sources have zero variance.
fn rank_variance_norm(sources: &[TopicSource], cfg: &ScoringConfig) -> f64 {
    if sources.len() < 2 {
        return 0.0;
    }
    let n = sources.len() as f64;
    let mean = sources.iter().map(|s| s.rank_position as f64).sum::<f64>() / n;
    let variance = sources
        .iter()
        .map(|s| (s.rank_position as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    clamp01(variance / cfg.rank_variance_cap)
}

/// Difficulty, 0–1. Low rank variance (an entrenched, stable ranking)
/// signals harder competition than high variance (contestable ranking).
pub fn difficulty(sources: &[TopicSource], cfg: &ScoringConfig) -> f64 {
    clamp01(0.7 * competition(sources, cfg) + 0.3 * (1.0 - rank_variance_norm(sources, cfg)))
}

/// Composite win score, clamped to [0, 1]. `seo_weight` splits the gap
/// blend between search and AI visibility; the city bias multiplier is
/// applied only when the topic's city matches the configured default.
pub fn win_score(
    seo: f64,
    geo: f64,
    difficulty: f64,
    seo_weight: f64,
    city_matches: bool,
    city_bias: f64,
) -> f64 {
    let geo_weight = 1.0 - seo_weight;
    let mut score = (seo_weight * (1.0 - seo) + geo_weight * (1.0 - geo)) / (1.0 + difficulty);
    if city_matches {
        score *= city_bias;
    }
    clamp01(score)
}

/// Stable topic identity for a (query, city) pair.
pub fn topic_id(query: &str, city: &str) -> String {
    format!("{}--{}", signals::slug(query), signals::slug(city))
}

/// Topic scoring and exploration service.
#[derive(Clone)]
pub struct TopicService {
    config: Arc<Config>,
    pool: SqlitePool,
    weights: WeightStore,
    signals: Arc<dyn TopicSignals>,
}

impl TopicService {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        weights: WeightStore,
        signals: Arc<dyn TopicSignals>,
    ) -> Self {
        Self {
            config,
            pool,
            weights,
            signals,
        }
    }

    /// Score one topic from an already-collected signal bundle and
    /// upsert its score record.
    pub async fn score_topic(
        &self,
        topic_id: &str,
        city: &str,
        sources: &[TopicSource],
        visibility: Option<&AiVisibility>,
    ) -> Result<TopicScore> {
        let cfg = &self.config.scoring;
        let weight_set = self.weights.get().await?;
        let seo_weight = weight_set
            .weight("indexability")
            .unwrap_or(DEFAULT_SEO_WEIGHT);

        let seo = seo_score(sources, cfg);
        let geo = geo_score(visibility);
        let comp = competition(sources, cfg);
        let diff = difficulty(sources, cfg);
        let city_matches = city == cfg.default_city;
        let win = win_score(seo, geo, diff, seo_weight, city_matches, cfg.city_bias);

        let breakdown = serde_json::json!({
            "sources_total": sources.len(),
            "rank_variance_norm": rank_variance_norm(sources, cfg),
            "seo_weight": seo_weight,
            "geo_weight": 1.0 - seo_weight,
            "city_bias_applied": city_matches,
            "visibility_synthetic": visibility.map(|v| v.synthetic),
        });

        let record = TopicScore {
            topic_id: topic_id.to_string(),
            city: city.to_string(),
            seo_score: seo,
            geo_score: geo,
            competition: comp,
            difficulty: diff,
            win_score: win,
            breakdown,
            scored_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            "INSERT INTO topic_scores \
             (topic_id, city, seo_score, geo_score, competition, difficulty, win_score, breakdown_json, scored_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(topic_id) DO UPDATE SET \
             city = excluded.city, seo_score = excluded.seo_score, geo_score = excluded.geo_score, \
             competition = excluded.competition, difficulty = excluded.difficulty, \
             win_score = excluded.win_score, breakdown_json = excluded.breakdown_json, \
             scored_at = excluded.scored_at",
        )
        .bind(&record.topic_id)
        .bind(&record.city)
        .bind(record.seo_score)
        .bind(record.geo_score)
        .bind(record.competition)
        .bind(record.difficulty)
        .bind(record.win_score)
        .bind(serde_json::to_string(&record.breakdown)?)
        .bind(record.scored_at)
        .execute(&self.pool)
        .await?;

        info!(topic = record.topic_id, win = record.win_score, "topic scored");
        Ok(record)
    }

    /// Queue an asynchronous exploration and return the job. The job
    /// advances through named stages; poll it with [`Self::get_job`].
    pub async fn start_explore(&self, query: &str, city: &str) -> Result<ExploreJob> {
        let job = self.insert_job(query, city).await?;

        let service = self.clone();
        let job_id = job.id.clone();
        let job_query = job.query.clone();
        let job_city = job.city.clone();
        tokio::spawn(async move {
            if let Err(err) = service.run_explore(&job_id, &job_query, &job_city, None).await {
                error!(job = job_id, error = %err, "exploration failed");
                let _ = service.fail_job(&job_id, &format!("{:#}", err)).await;
            }
        });

        Ok(job)
    }

    /// Run an exploration to completion in the caller's task, reporting
    /// stages to stderr. Used by the CLI; the HTTP API uses
    /// [`Self::start_explore`] instead.
    pub async fn explore_inline(
        &self,
        query: &str,
        city: &str,
        reporter: &dyn ExploreProgressReporter,
    ) -> Result<TopicScore> {
        let job = self.insert_job(query, city).await?;
        match self
            .run_explore(&job.id, &job.query, &job.city, Some(reporter))
            .await
        {
            Ok(score) => Ok(score),
            Err(err) => {
                let _ = self.fail_job(&job.id, &format!("{:#}", err)).await;
                Err(err)
            }
        }
    }

    async fn insert_job(&self, query: &str, city: &str) -> Result<ExploreJob> {
        let query = query.trim();
        if query.is_empty() {
            bail!("query must not be empty");
        }
        let city = if city.trim().is_empty() {
            self.config.scoring.default_city.clone()
        } else {
            city.trim().to_string()
        };
        let now = chrono::Utc::now().timestamp();
        let job = ExploreJob {
            id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            city,
            status: JobStatus::Queued,
            stage: "queued".to_string(),
            progress: 0,
            topic_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO topic_jobs (id, query, city, status, stage, progress, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.query)
        .bind(&job.city)
        .bind(job.status.as_str())
        .bind(&job.stage)
        .bind(job.progress)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(job)
    }

    async fn run_explore(
        &self,
        job_id: &str,
        query: &str,
        city: &str,
        reporter: Option<&dyn ExploreProgressReporter>,
    ) -> Result<TopicScore> {
        let advance = |stage: ExploreStage| {
            if let Some(reporter) = reporter {
                reporter.report(query, stage);
            }
        };

        advance(ExploreStage::Ingest);
        self.set_stage(job_id, JobStatus::Running, ExploreStage::Ingest, None)
            .await?;
        let id = topic_id(query, city);

        advance(ExploreStage::FetchSources);
        self.set_stage(job_id, JobStatus::Running, ExploreStage::FetchSources, None)
            .await?;
        let sources = self.signals.sources(query, city).await?;

        advance(ExploreStage::AnalyzeVisibility);
        self.set_stage(
            job_id,
            JobStatus::Running,
            ExploreStage::AnalyzeVisibility,
            None,
        )
        .await?;
        let visibility = self.signals.ai_visibility(query, city).await?;

        advance(ExploreStage::Score);
        self.set_stage(job_id, JobStatus::Running, ExploreStage::Score, None)
            .await?;
        let score = self
            .score_topic(&id, city, &sources, Some(&visibility))
            .await?;

        // The recommend stage only marks the topic ready for the action
        // ranker; ranking itself runs on demand per city.
        advance(ExploreStage::Recommend);
        self.set_stage(job_id, JobStatus::Running, ExploreStage::Recommend, Some(&id))
            .await?;

        advance(ExploreStage::Done);
        self.set_stage(job_id, JobStatus::Completed, ExploreStage::Done, Some(&id))
            .await?;
        Ok(score)
    }

    async fn set_stage(
        &self,
        job_id: &str,
        status: JobStatus,
        stage: ExploreStage,
        topic_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE topic_jobs SET status = ?, stage = ?, progress = ?, topic_id = COALESCE(?, topic_id), \
             updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(stage.label())
        .bind(stage.percent())
        .bind(topic_id)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE topic_jobs SET status = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(JobStatus::Failed.as_str())
        .bind(message)
        .bind(chrono::Utc::now().timestamp())
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<ExploreJob>> {
        let row = sqlx::query(
            "SELECT id, query, city, status, stage, progress, topic_id, error, created_at, updated_at \
             FROM topic_jobs WHERE id = ?",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.get("status");
        Ok(Some(ExploreJob {
            id: row.get("id"),
            query: row.get("query"),
            city: row.get("city"),
            status: JobStatus::from_str(&status)?,
            stage: row.get("stage"),
            progress: row.get("progress"),
            topic_id: row.get("topic_id"),
            error: row.get("error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    pub async fn get_topic(&self, topic_id: &str) -> Result<Option<TopicScore>> {
        let row = sqlx::query(
            "SELECT topic_id, city, seo_score, geo_score, competition, difficulty, win_score, \
             breakdown_json, scored_at FROM topic_scores WHERE topic_id = ?",
        )
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let breakdown_json: String = row.get("breakdown_json");
        Ok(Some(TopicScore {
            topic_id: row.get("topic_id"),
            city: row.get("city"),
            seo_score: row.get("seo_score"),
            geo_score: row.get("geo_score"),
            competition: row.get("competition"),
            difficulty: row.get("difficulty"),
            win_score: row.get("win_score"),
            breakdown: serde_json::from_str(&breakdown_json)?,
            scored_at: row.get("scored_at"),
        }))
    }

    /// Topics by descending win score.
    pub async fn list_topics(&self, limit: i64) -> Result<Vec<TopicScore>> {
        let rows = sqlx::query(
            "SELECT topic_id, city, seo_score, geo_score, competition, difficulty, win_score, \
             breakdown_json, scored_at FROM topic_scores ORDER BY win_score DESC, topic_id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut topics = Vec::with_capacity(rows.len());
        for row in &rows {
            let breakdown_json: String = row.get("breakdown_json");
            topics.push(TopicScore {
                topic_id: row.get("topic_id"),
                city: row.get("city"),
                seo_score: row.get("seo_score"),
                geo_score: row.get("geo_score"),
                competition: row.get("competition"),
                difficulty: row.get("difficulty"),
                win_score: row.get("win_score"),
                breakdown: serde_json::from_str(&breakdown_json)?,
                scored_at: row.get("scored_at"),
            });
        }
        Ok(topics)
    }
}
