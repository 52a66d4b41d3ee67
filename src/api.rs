use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::ingest::types::JobPosting;
use crate::orchestrator::{Orchestrator, StatusMap};
use crate::reputation::{ListKind, PromoteError, ReputationStore};
use crate::store::JobStore;

const DEFAULT_LOG_LINES: usize = 200;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: Arc<dyn JobStore>,
    pub reputation: Arc<dyn ReputationStore>,
    pub log_path: PathBuf,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/scrape/now", post(scrape_now))
        .route("/scrape/status", get(scrape_status))
        .route("/jobs", get(get_jobs).delete(purge_jobs))
        .route("/review-list", get(review_list).post(promote_review))
        .route("/logs", get(logs))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn scrape_now(State(state): State<AppState>) -> impl IntoResponse {
    match state.orchestrator.try_trigger_now() {
        Ok(()) => {
            tracing::info!("manual harvest triggered");
            (StatusCode::ACCEPTED, Json(json!({ "started": true })))
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(json!({ "started": false, "error": e.to_string() })),
        ),
    }
}

async fn scrape_status(State(state): State<AppState>) -> Json<StatusMap> {
    Json(state.orchestrator.check_all().await)
}

#[derive(serde::Deserialize)]
struct JobsQuery {
    #[serde(default)]
    all: bool,
}

async fn get_jobs(
    State(state): State<AppState>,
    Query(q): Query<JobsQuery>,
) -> Result<Json<Vec<JobPosting>>, ApiError> {
    Ok(Json(state.jobs.claim_unread(q.all).await?))
}

async fn purge_jobs(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.jobs.purge().await?;
    tracing::warn!("job store purged");
    Ok(Json(json!({ "purged": true })))
}

async fn review_list(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.reputation.pending_review().await?))
}

#[derive(serde::Deserialize)]
struct PromoteReq {
    identifier: String,
    action: String,
}

async fn promote_review(
    State(state): State<AppState>,
    Json(body): Json<PromoteReq>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let identifier = body.identifier.trim();
    if identifier.is_empty() {
        return Err(ApiError::BadRequest("identifier is required".into()));
    }
    let Some(kind) = ListKind::parse(&body.action) else {
        return Err(ApiError::BadRequest(format!(
            "unknown action `{}` (expected blacklist or whitelist)",
            body.action
        )));
    };

    match state.reputation.promote(identifier, kind).await {
        Ok(()) => Ok(Json(json!({ "identifier": identifier, "list": kind }))),
        Err(PromoteError::NotPending(id)) => Err(ApiError::NotFound(format!("{id} is not pending review"))),
        Err(PromoteError::Storage(e)) => Err(ApiError::Internal(e)),
    }
}

#[derive(serde::Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

async fn logs(
    State(state): State<AppState>,
    Query(q): Query<LogsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let n = q.lines.unwrap_or(DEFAULT_LOG_LINES);
    let body = crate::logging::tail_lines(&state.log_path, n).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body))
}
