//! JSON HTTP API.
//!
//! Exposes the audit orchestrator, weight store, topic scorer, and
//! action ranker over HTTP for dashboards and automation.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/audits` | Start an audit, returns `202 {audit_id}` |
//! | `GET`  | `/audits/{id}` | Full audit record |
//! | `GET`  | `/audits` | Recent audits (`limit`, `offset`) |
//! | `GET`  | `/weights` | Current weight set |
//! | `POST` | `/weights` | Apply an observed-impact update |
//! | `POST` | `/weights/reset` | Restore default weights |
//! | `POST` | `/weights/learning-rate` | Set the learning rate |
//! | `POST` | `/topics/explore` | Queue a topic exploration |
//! | `GET`  | `/topics/jobs/{id}` | Exploration job status |
//! | `GET`  | `/topics/{topic_id}` | Latest topic score record |
//! | `POST` | `/actions/rank` | Rank a fresh action batch for a city |
//! | `GET`  | `/actions` | Latest action batch (`city`, `limit`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser dashboards
//! can call the API directly.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::actions::ActionRanker;
use crate::audit::AuditEngine;
use crate::checkers::{CheckerRegistry, DbMetricsProvider};
use crate::config::Config;
use crate::db;
use crate::signals::SyntheticSignals;
use crate::topics::TopicService;
use crate::weights::WeightStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    audits: AuditEngine,
    weights: WeightStore,
    topics: TopicService,
    actions: ActionRanker,
}

/// Starts the HTTP server. Binds to `[server].bind` and runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let config = Arc::new(config.clone());

    let pool = db::connect(&config.db).await?;
    let weights = WeightStore::new(pool.clone());
    let registry = Arc::new(CheckerRegistry::with_builtins());
    let metrics = Arc::new(DbMetricsProvider::new(pool.clone()));

    let state = AppState {
        audits: AuditEngine::new(
            config.clone(),
            pool.clone(),
            weights.clone(),
            registry,
            metrics.clone(),
        ),
        topics: TopicService::new(
            config.clone(),
            pool.clone(),
            weights.clone(),
            Arc::new(SyntheticSignals),
        ),
        actions: ActionRanker::new(config.clone(), pool, weights.clone(), metrics),
        weights,
        config,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/audits", post(handle_start_audit).get(handle_list_audits))
        .route("/audits/{id}", get(handle_get_audit))
        .route("/weights", get(handle_get_weights).post(handle_update_weights))
        .route("/weights/reset", post(handle_reset_weights))
        .route("/weights/learning-rate", post(handle_set_learning_rate))
        .route("/topics/explore", post(handle_explore_topic))
        .route("/topics/jobs/{id}", get(handle_get_job))
        .route("/topics/{topic_id}", get(handle_get_topic))
        .route("/actions/rank", post(handle_rank_actions))
        .route("/actions", get(handle_list_actions))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(addr = %bind_addr, "API server listening");
    println!("API server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps engine errors to HTTP status codes. Validation failures read as
/// client errors; everything else is a 500.
fn classify_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("must not be empty")
        || msg.contains("must be")
        || msg.contains("must start with")
        || msg.contains("must exceed")
        || msg.contains("unknown")
    {
        bad_request(msg)
    } else {
        internal(msg)
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Audits ============

#[derive(Deserialize)]
struct StartAuditRequest {
    url: String,
    #[serde(default)]
    categories: Option<Vec<String>>,
}

#[derive(Serialize)]
struct StartAuditResponse {
    audit_id: String,
}

/// `POST /audits` — fire-and-forget: the audit runs in the background
/// and `GET /audits/{id}` reports its progress.
async fn handle_start_audit(
    State(state): State<AppState>,
    Json(req): Json<StartAuditRequest>,
) -> Result<(StatusCode, Json<StartAuditResponse>), AppError> {
    let audit_id = state
        .audits
        .start_audit(&req.url, req.categories)
        .await
        .map_err(classify_error)?;
    Ok((StatusCode::ACCEPTED, Json(StartAuditResponse { audit_id })))
}

async fn handle_get_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let record = state
        .audits
        .get_audit(&id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("no audit with id: {}", id)))?;
    Ok(Json(serde_json::to_value(record).map_err(|e| internal(e.to_string()))?))
}

#[derive(Deserialize)]
struct ListAuditsQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Serialize)]
struct ListAuditsResponse {
    records: Vec<crate::models::AuditSummary>,
    total: i64,
}

async fn handle_list_audits(
    State(state): State<AppState>,
    Query(query): Query<ListAuditsQuery>,
) -> Result<Json<ListAuditsResponse>, AppError> {
    if query.limit < 1 || query.offset < 0 {
        return Err(bad_request("limit must be >= 1 and offset >= 0"));
    }
    let (records, total) = state
        .audits
        .list_audits(query.limit, query.offset)
        .await
        .map_err(classify_error)?;
    Ok(Json(ListAuditsResponse { records, total }))
}

// ============ Weights ============

async fn handle_get_weights(
    State(state): State<AppState>,
) -> Result<Json<crate::models::WeightSet>, AppError> {
    state.weights.get().await.map(Json).map_err(classify_error)
}

#[derive(Deserialize)]
struct UpdateWeightsRequest {
    observed: BTreeMap<String, f64>,
}

async fn handle_update_weights(
    State(state): State<AppState>,
    Json(req): Json<UpdateWeightsRequest>,
) -> Result<Json<crate::models::WeightSet>, AppError> {
    state
        .weights
        .update(&req.observed)
        .await
        .map(Json)
        .map_err(classify_error)
}

async fn handle_reset_weights(
    State(state): State<AppState>,
) -> Result<Json<crate::models::WeightSet>, AppError> {
    state
        .weights
        .reset(state.config.learning.alpha)
        .await
        .map(Json)
        .map_err(classify_error)
}

#[derive(Deserialize)]
struct LearningRateRequest {
    rate: f64,
}

async fn handle_set_learning_rate(
    State(state): State<AppState>,
    Json(req): Json<LearningRateRequest>,
) -> Result<Json<crate::models::WeightSet>, AppError> {
    state
        .weights
        .set_learning_rate(req.rate)
        .await
        .map(Json)
        .map_err(classify_error)
}

// ============ Topics ============

#[derive(Deserialize)]
struct ExploreRequest {
    query: String,
    #[serde(default)]
    city: String,
}

#[derive(Serialize)]
struct ExploreResponse {
    job_id: String,
}

async fn handle_explore_topic(
    State(state): State<AppState>,
    Json(req): Json<ExploreRequest>,
) -> Result<(StatusCode, Json<ExploreResponse>), AppError> {
    let job = state
        .topics
        .start_explore(&req.query, &req.city)
        .await
        .map_err(classify_error)?;
    Ok((StatusCode::ACCEPTED, Json(ExploreResponse { job_id: job.id })))
}

/// `GET /topics/jobs/{id}` — job status plus the score record once the
/// job has completed.
async fn handle_get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let job = state
        .topics
        .get_job(&id)
        .await
        .map_err(classify_error)?
        .ok_or_else(|| not_found(format!("no exploration job with id: {}", id)))?;

    let result = match (&job.status, &job.topic_id) {
        (crate::models::JobStatus::Completed, Some(topic_id)) => state
            .topics
            .get_topic(topic_id)
            .await
            .map_err(classify_error)?,
        _ => None,
    };

    let mut body = serde_json::to_value(&job).map_err(|e| internal(e.to_string()))?;
    if let (Some(obj), Some(result)) = (body.as_object_mut(), result) {
        obj.insert(
            "result".to_string(),
            serde_json::to_value(result).map_err(|e| internal(e.to_string()))?,
        );
    }
    Ok(Json(body))
}

async fn handle_get_topic(
    State(state): State<AppState>,
    Path(topic_id): Path<String>,
) -> Result<Json<crate::models::TopicScore>, AppError> {
    state
        .topics
        .get_topic(&topic_id)
        .await
        .map_err(classify_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("no topic with id: {}", topic_id)))
}

// ============ Actions ============

#[derive(Deserialize)]
struct RankRequest {
    #[serde(default)]
    city: String,
}

async fn handle_rank_actions(
    State(state): State<AppState>,
    Json(req): Json<RankRequest>,
) -> Result<Json<Vec<crate::models::RecommendedAction>>, AppError> {
    state
        .actions
        .rank(&req.city)
        .await
        .map(Json)
        .map_err(classify_error)
}

#[derive(Deserialize)]
struct ListActionsQuery {
    #[serde(default)]
    city: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

async fn handle_list_actions(
    State(state): State<AppState>,
    Query(query): Query<ListActionsQuery>,
) -> Result<Json<Vec<crate::models::RecommendedAction>>, AppError> {
    if query.limit < 1 {
        return Err(bad_request("limit must be >= 1"));
    }
    let city = query
        .city
        .unwrap_or_else(|| state.config.scoring.default_city.clone());
    let mut batch = state.actions.latest(&city).await.map_err(classify_error)?;
    batch.truncate(query.limit as usize);
    Ok(Json(batch))
}
