//! Job lifecycle routes — admission, listing, cancellation, log streaming.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;

use tuneforge_core::{JobStatus, TrainingMethod};
use tuneforge_engine::JobRequest;

use crate::routes::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/logs", get(job_logs))
}

#[derive(Deserialize)]
struct CreateJobRequest {
    model: String,
    dataset: String,
    method: TrainingMethod,
    hardware: String,
    config: Option<serde_json::Value>,
    expected_duration_hours: Option<f64>,
    request_token: Option<String>,
}

/// POST /api/jobs — validate, price, reserve and submit a training job.
async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let request = JobRequest {
        model: req.model,
        dataset: req.dataset,
        method: req.method,
        hardware: req.hardware,
        config: req.config.unwrap_or_else(|| serde_json::json!({})),
        expected_duration_hours: req.expected_duration_hours,
        request_token: req.request_token,
    };

    match state.registry.create(request).await {
        Ok(outcome) => {
            if let Some(reason) = outcome.submission_error {
                // Admitted with its reservation held, but the backend never
                // took it. Retrying with the same token resubmits.
                return (
                    StatusCode::BAD_GATEWAY,
                    Json(serde_json::json!({
                        "error": reason,
                        "job": outcome.job,
                        "retryable": true,
                    })),
                )
                    .into_response();
            }
            let code = if outcome.created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (
                code,
                Json(serde_json::json!({
                    "job": outcome.job,
                    "created": outcome.created,
                })),
            )
                .into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

/// GET /api/jobs — newest first, optionally filtered by status.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let filter = match query.status.as_deref() {
        None | Some("all") => None,
        Some(raw) => match JobStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": format!("unknown status filter: {raw}"),
                    })),
                )
                    .into_response();
            }
        },
    };

    match state.registry.list(filter, query.limit) {
        Ok(jobs) => {
            let count = jobs.len();
            Json(serde_json::json!({
                "jobs": jobs,
                "count": count,
                "filter": query.status.unwrap_or_else(|| "all".to_string()),
                "limit": query.limit,
            }))
            .into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}

/// GET /api/jobs/{id} — full record including live cost and progress.
async fn get_job(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.get(&id) {
        Ok(job) => Json(job).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// POST /api/jobs/{id}/cancel — cooperative cancellation.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.cancel(&id).await {
        Ok(job) => Json(serde_json::json!({
            "job": job,
            "message": "Job cancelled successfully",
        }))
        .into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// GET /api/jobs/{id}/logs — stream backend log lines as plain text.
async fn job_logs(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.logs(&id).await {
        Ok(lines) => {
            let body = Body::from_stream(
                lines.map(|line| line.map(|l| format!("{l}\n")).map_err(axum::BoxError::from)),
            );
            (
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                body,
            )
                .into_response()
        }
        Err(err) => error_response(err).into_response(),
    }
}
