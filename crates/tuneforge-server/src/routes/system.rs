//! Health, model catalog and system stats routes.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::routes::error_response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/models", get(list_models))
        .route("/system/stats", get(system_stats))
}

/// GET /health — liveness probe, mounted outside /api.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "hf_token_configured": state.config.hf_token.is_some(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /api/models — base model catalog with hardware guidance.
async fn list_models() -> Json<serde_json::Value> {
    let models = vec![
        serde_json::json!({
            "id": "Qwen/Qwen2.5-0.5B",
            "name": "Qwen 2.5 0.5B",
            "size": "0.5B",
            "recommended_hardware": ["t4-small", "t4-medium"],
            "strengths": ["Fast training", "Low cost", "Good for testing"],
        }),
        serde_json::json!({
            "id": "Qwen/Qwen2.5-1.5B",
            "name": "Qwen 2.5 1.5B",
            "size": "1.5B",
            "recommended_hardware": ["t4-medium", "a10g-small"],
            "strengths": ["Balanced performance", "Moderate cost"],
        }),
        serde_json::json!({
            "id": "Qwen/Qwen2.5-3B",
            "name": "Qwen 2.5 3B",
            "size": "3B",
            "recommended_hardware": ["a10g-small", "a10g-large"],
            "strengths": ["Strong performance", "Requires LoRA for efficiency"],
        }),
        serde_json::json!({
            "id": "Qwen/Qwen2.5-7B",
            "name": "Qwen 2.5 7B",
            "size": "7B",
            "recommended_hardware": ["a10g-large", "a100-large"],
            "strengths": ["Best quality", "Requires LoRA", "Higher cost"],
        }),
    ];

    let count = models.len();
    Json(serde_json::json!({ "models": models, "count": count }))
}

/// GET /api/system/stats — job counts, lifetime spend, uptime, hand-off state.
async fn system_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let counts = match state.registry.status_counts() {
        Ok(counts) => counts,
        Err(err) => return error_response(err).into_response(),
    };
    let total_cost = match state.registry.total_actual_cost() {
        Ok(total) => total,
        Err(err) => return error_response(err).into_response(),
    };

    let uptime = state.scheduler.uptime();
    let uptime_hours = (uptime.as_secs_f64() / 3600.0 * 100.0).round() / 100.0;

    Json(serde_json::json!({
        "jobs": {
            "total": counts.total(),
            "active": counts.active(),
            "pending": counts.pending,
            "running": counts.running,
            "completed": counts.completed,
            "failed": counts.failed,
            "cancelled": counts.cancelled,
        },
        "total_cost_usd": total_cost,
        "uptime_hours": uptime_hours,
        "keep_alive": {
            "phase": state.scheduler.phase(),
            "uptime_minutes": uptime.as_secs() / 60,
            "handoff_threshold_minutes": state.scheduler.handoff_threshold().as_secs() / 60,
        },
        "db_size_bytes": state.store.db_size_bytes(),
    }))
    .into_response()
}
