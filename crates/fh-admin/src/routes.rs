use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fh_core::{Job, NewJob, RunnerError, SystemHealth};
use fh_scheduler::{CancelOutcome, QueueSnapshot, Scheduler};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AdminState {
    scheduler: Scheduler,
    token: Option<Arc<str>>,
}

impl AdminState {
    /// Without a token every mutating endpoint answers 403.
    pub fn new(scheduler: Scheduler, token: Option<String>) -> Self {
        Self {
            scheduler,
            token: token.map(Arc::from),
        }
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub health: SystemHealth,
    pub queue: QueueSnapshot,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pause", post(pause))
        .route("/resume", post(resume))
        .route("/jobs", post(submit))
        .route("/jobs/{id}", get(job))
        .route("/jobs/{id}/cancel", post(cancel))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<RunnerError> for ApiError {
    fn from(err: RunnerError) -> Self {
        let status = match &err {
            RunnerError::JobNotFound(_) => StatusCode::NOT_FOUND,
            RunnerError::DuplicateJob(_) | RunnerError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            RunnerError::Io(_) | RunnerError::Corrupt(_) | RunnerError::Poisoned => {
                warn!(error = %err, "admin request hit a store failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Compare digests so the check does not short-circuit on the first byte.
fn same_token(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn authorize(state: &AdminState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.token.as_deref() else {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "admin token not configured; mutating endpoints are disabled",
        ));
    };
    match bearer(headers) {
        Some(presented) if same_token(presented, expected) => Ok(()),
        _ => Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer token",
        )),
    }
}

async fn health(State(state): State<AdminState>) -> Json<HealthReport> {
    Json(HealthReport {
        health: state.scheduler.health(),
        queue: state.scheduler.queue_snapshot(),
    })
}

async fn pause(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<Json<SystemHealth>, ApiError> {
    authorize(&state, &headers)?;
    state.scheduler.pause();
    Ok(Json(state.scheduler.health()))
}

async fn resume(
    State(state): State<AdminState>,
    headers: HeaderMap,
) -> Result<Json<SystemHealth>, ApiError> {
    authorize(&state, &headers)?;
    state.scheduler.resume();
    Ok(Json(state.scheduler.health()))
}

async fn submit(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Json(request): Json<NewJob>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    authorize(&state, &headers)?;
    if request.providers.iter().any(|p| p.trim().is_empty()) {
        return Err(ApiError::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "provider names must not be empty",
        ));
    }
    let job = state.scheduler.submit(request).await?;
    info!(job = %job.id, "job submitted over admin API");
    Ok((StatusCode::CREATED, Json(job)))
}

async fn job(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    Ok(Json(state.scheduler.store().get(&id).await?))
}

async fn cancel(
    State(state): State<AdminState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<CancelOutcome>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(state.scheduler.cancel(&id).await?))
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
