//! HTTP route handlers — matches the dashboard API surface.

pub mod costs;
pub mod datasets;
pub mod jobs;
pub mod system;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use tuneforge_core::Error;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/api", api_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(jobs::routes())
        .merge(costs::routes())
        .merge(datasets::routes())
        .merge(system::routes())
}

/// Map a domain error to its HTTP status and JSON body. Budget refusals
/// carry their numbers so clients can render what was refused and why.
pub(crate) fn error_response(err: Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        Error::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::UnknownHardwareClass(_) => StatusCode::BAD_REQUEST,
        Error::BudgetExceeded { .. } => StatusCode::PAYMENT_REQUIRED,
        Error::InvalidTransition { .. } | Error::DuplicateToken(_) => StatusCode::CONFLICT,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::SubmissionFailed(_) | Error::Backend(_) | Error::PollExhausted => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &err {
        Error::BudgetExceeded {
            spent,
            limit,
            requested,
        } => serde_json::json!({
            "error": err.to_string(),
            "spent_usd": spent,
            "limit_usd": limit,
            "requested_usd": requested,
        }),
        _ => serde_json::json!({ "error": err.to_string() }),
    };

    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuneforge_core::JobStatus;

    fn status_for(err: Error) -> StatusCode {
        error_response(err).0
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_for(Error::ValidationFailed("missing columns".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(Error::UnknownHardwareClass("h100-mega".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(Error::BudgetExceeded {
                spent: 9.75,
                limit: 10.0,
                requested: 0.75
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_for(Error::InvalidTransition {
                from: JobStatus::Completed,
                to: JobStatus::Cancelled
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(Error::DuplicateToken("tok-1".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(Error::NotFound("job abc".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(Error::SubmissionFailed("backend unavailable".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(Error::Backend("boom".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(Error::PollExhausted), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_budget_refusal_body_carries_numbers() {
        let (status, Json(body)) = error_response(Error::BudgetExceeded {
            spent: 9.75,
            limit: 10.0,
            requested: 0.75,
        });
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["spent_usd"], 9.75);
        assert_eq!(body["limit_usd"], 10.0);
        assert_eq!(body["requested_usd"], 0.75);
    }

    #[test]
    fn test_plain_errors_carry_only_a_message() {
        let (_, Json(body)) = error_response(Error::NotFound("job abc".into()));
        assert_eq!(body["error"], "Not found: job abc");
        assert!(body.get("spent_usd").is_none());
    }
}
