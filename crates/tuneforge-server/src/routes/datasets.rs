//! Dataset compatibility routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use tuneforge_core::TrainingMethod;

use crate::routes::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/datasets/validate", post(validate_dataset))
}

#[derive(Deserialize)]
struct ValidateRequest {
    dataset: String,
    method: TrainingMethod,
}

/// POST /api/datasets/validate — column compatibility check.
///
/// An incompatible or unreadable dataset is a 200 with `valid: false`;
/// the verdict is the payload, not an error.
async fn validate_dataset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ValidateRequest>,
) -> impl IntoResponse {
    match state.validator.validate(&req.dataset, req.method).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => error_response(err).into_response(),
    }
}
