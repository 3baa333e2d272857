//! HTTP API: strategy registry, job submission and job status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use engine::{BacktestError, BacktestPayload, WorkerProgress};
use persistence::repository::{JobRepository, StrategyRepository};
use persistence::{BacktestJob, Database, DbError, JobStore, NewStrategy};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::APP_VERSION;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    /// Progress of workers embedded in this process, by name
    pub workers: Arc<Vec<(String, Arc<WorkerProgress>)>>,
}

impl AppState {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            workers: Arc::new(Vec::new()),
        }
    }

    pub fn with_workers(mut self, workers: Vec<(String, Arc<WorkerProgress>)>) -> Self {
        self.workers = Arc::new(workers);
        self
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Strategy not found")]
    StrategyNotFound,

    #[error("Job not found")]
    JobNotFound,

    #[error("{0}")]
    InvalidParameters(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::JobNotFound(_) => ApiError::JobNotFound,
            DbError::StrategyNotFound(_) => ApiError::StrategyNotFound,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<BacktestError> for ApiError {
    fn from(err: BacktestError) -> Self {
        match err {
            BacktestError::Store(db) => db.into(),
            other => ApiError::InvalidParameters(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::StrategyNotFound | ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/strategies", get(api_list_strategies).post(api_create_strategy))
        .route("/strategies/:id", get(api_get_strategy))
        .route("/backtests", axum::routing::post(api_create_backtest))
        .route("/backtests/:id", get(api_get_backtest))
        .route("/workers/status", get(api_workers_status))
        .with_state(state);

    Router::new().nest("/api", api_routes)
}

// ============================================================================
// Job submission (shared with the `submit` command)
// ============================================================================

/// Body of `POST /backtests`: a payload whose strategy must exist
#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    pub strategy_id: i64,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Check the strategy, validate the payload and enqueue it in normalized form
pub async fn enqueue_backtest(db: &Database, request: BacktestRequest) -> Result<BacktestJob, ApiError> {
    if !StrategyRepository::new(db.pool()).exists(request.strategy_id).await? {
        return Err(ApiError::StrategyNotFound);
    }

    let mut raw = request.rest;
    raw.insert("strategy_id".into(), request.strategy_id.into());
    let payload = BacktestPayload::from_value(&Value::Object(raw))?;

    let job = db.enqueue(&payload.to_value()).await?;
    info!(
        job_id = job.id,
        strategy_id = request.strategy_id,
        symbol = %payload.symbol,
        timeframe = %payload.timeframe,
        "Backtest job queued"
    );
    Ok(job)
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> ApiResult<Value> {
    let counts = JobRepository::new(state.db.pool()).count_by_status().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": APP_VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "jobs": counts,
    })))
}

/// POST /api/strategies
async fn api_create_strategy(
    State(state): State<AppState>,
    Json(body): Json<NewStrategy>,
) -> ApiResult<Value> {
    if body.name.trim().is_empty() {
        return Err(ApiError::InvalidParameters("name is required".into()));
    }
    let id = StrategyRepository::new(state.db.pool()).create(&body).await?;
    info!(strategy_id = id, name = %body.name, "Strategy created");
    Ok(Json(json!({ "id": id, "name": body.name })))
}

/// GET /api/strategies: newest first
async fn api_list_strategies(State(state): State<AppState>) -> ApiResult<Value> {
    let strategies = StrategyRepository::new(state.db.pool()).list().await?;
    Ok(Json(json!(strategies)))
}

/// GET /api/strategies/:id
async fn api_get_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let strategy = StrategyRepository::new(state.db.pool())
        .get(id)
        .await?
        .ok_or(ApiError::StrategyNotFound)?;
    Ok(Json(json!(strategy)))
}

/// POST /api/backtests
async fn api_create_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> ApiResult<Value> {
    let job = enqueue_backtest(&state.db, request).await?;
    Ok(Json(json!({ "job_id": job.id, "status": job.status })))
}

/// GET /api/backtests/:id
async fn api_get_backtest(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Value> {
    let job = state.db.get(id).await?;
    Ok(Json(json!(job)))
}

/// GET /api/workers/status
async fn api_workers_status(State(state): State<AppState>) -> Json<Value> {
    let workers: Vec<_> = state
        .workers
        .iter()
        .map(|(name, progress)| progress.snapshot(name))
        .collect();
    Json(json!({ "workers": workers }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use persistence::JobStatus;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<Database>) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let progress = Arc::new(WorkerProgress::new());
        let state = AppState::new(db.clone()).with_workers(vec![("worker-1".into(), progress)]);
        (build_router(state), db)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create_strategy(app: &Router, name: &str) -> i64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/strategies",
            Some(json!({ "name": name, "graph": { "nodes": [] } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_job_counts() {
        let (app, _db) = app().await;
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["jobs"]["queued"], 0);
    }

    #[tokio::test]
    async fn test_strategy_registry() {
        let (app, _db) = app().await;
        let first = create_strategy(&app, "cross").await;
        let second = create_strategy(&app, "cross-tight").await;

        let (status, list) = send(&app, "GET", "/api/strategies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            list,
            json!([{ "id": second, "name": "cross-tight" }, { "id": first, "name": "cross" }])
        );

        let (status, one) = send(&app, "GET", &format!("/api/strategies/{first}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(one["graph"], json!({ "nodes": [] }));

        let (status, _) = send(&app, "GET", "/api/strategies/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_submit_and_fetch_backtest() {
        let (app, db) = app().await;
        let strategy_id = create_strategy(&app, "cross").await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/backtests",
            Some(json!({
                "strategy_id": strategy_id,
                "symbol": "BTCUSD",
                "start": "2024-01-01",
                "end": "2024-01-31",
                "params": { "fast": "5", "slow": 20 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "queued");
        let job_id = body["job_id"].as_i64().unwrap();

        let stored = db.get(job_id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert_eq!(stored.payload["params"]["fast"], 5);
        assert_eq!(stored.payload["timeframe"], "1m");
        assert_eq!(stored.payload["strategy_id"], strategy_id);

        let (status, job) = send(&app, "GET", &format!("/api/backtests/{job_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["id"], job_id);
        assert_eq!(job["status"], "queued");
        assert_eq!(job["result"], Value::Null);
        assert_eq!(job["error"], Value::Null);
        assert_eq!(job["payload"]["symbol"], "BTCUSD");
    }

    #[tokio::test]
    async fn test_backtest_for_unknown_strategy_is_404() {
        let (app, db) = app().await;
        let (status, body) = send(
            &app,
            "POST",
            "/api/backtests",
            Some(json!({ "strategy_id": 42, "symbol": "BTCUSD" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Strategy not found");
        assert!(db.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_params_are_422_and_not_queued() {
        let (app, db) = app().await;
        let strategy_id = create_strategy(&app, "cross").await;

        for params in [json!({ "fast": 0 }), json!({ "slow": "wide" })] {
            let (status, body) = send(
                &app,
                "POST",
                "/api/backtests",
                Some(json!({ "strategy_id": strategy_id, "symbol": "BTCUSD", "params": params })),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert!(body["detail"].as_str().unwrap().starts_with("Invalid parameters"));
        }
        assert!(db.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (app, _db) = app().await;
        let (status, body) = send(&app, "GET", "/api/backtests/7", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Job not found");
    }

    #[tokio::test]
    async fn test_workers_status_lists_embedded_workers() {
        let (app, _db) = app().await;
        let (status, body) = send(&app, "GET", "/api/workers/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workers"][0]["name"], "worker-1");
        assert_eq!(body["workers"][0]["status"], "Idle");
        assert_eq!(body["workers"][0]["jobs_finished"], 0);
    }
}
