//! Cost estimation and budget reporting routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::routes::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/costs", get(cost_summary))
        .route("/costs/estimate", post(estimate_cost))
}

#[derive(Deserialize)]
struct EstimateRequest {
    model: String,
    dataset: String,
    hardware: String,
    epochs: Option<u32>,
    batch_size: Option<u32>,
    /// Skips the heuristic when supplied; the estimate is then rate * hours.
    expected_duration_hours: Option<f64>,
}

/// POST /api/costs/estimate — price a prospective job without admitting it.
async fn estimate_cost(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EstimateRequest>,
) -> impl IntoResponse {
    let estimator = state.registry.estimator();

    if let Some(hours) = req.expected_duration_hours.filter(|h| *h > 0.0) {
        let priced = estimator
            .rate(&req.hardware)
            .and_then(|rate| estimator.estimate(&req.hardware, hours).map(|cost| (rate, cost)));
        return match priced {
            Ok((rate, cost)) => Json(serde_json::json!({
                "hardware": req.hardware,
                "expected_duration_hours": hours,
                "hourly_rate_usd": rate,
                "estimated_cost_usd": cost,
            }))
            .into_response(),
            Err(err) => error_response(err).into_response(),
        };
    }

    // Zero epochs or batch size fall back to the training defaults.
    match estimator.plan(
        &req.model,
        &req.dataset,
        &req.hardware,
        req.epochs.unwrap_or(0),
        req.batch_size.unwrap_or(0),
    ) {
        Ok(plan) => Json(plan).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}

/// GET /api/costs — month-to-date spend against the budget.
async fn cost_summary(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.registry.governor().summary() {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}
