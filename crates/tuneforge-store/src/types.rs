//! Persisted record types for jobs and the budget ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tuneforge_core::{JobStatus, TrainingMethod};

/// A job row from the registry. Serialized as-is in API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// Caller-supplied idempotency key, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_token: Option<String>,
    pub model: String,
    pub dataset: String,
    pub method: TrainingMethod,
    pub hardware: String,
    /// Method-specific training parameters, stored verbatim.
    pub config: serde_json::Value,
    pub status: JobStatus,
    /// Identifier assigned by the external backend once submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor_url: Option<String>,
    /// Backend-reported training progress in [0, 1], when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub cost_estimate_usd: f64,
    /// Recomputed on every poll while non-terminal; frozen once terminal.
    pub cost_actual_usd: f64,
    pub expected_duration_hours: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Inputs for inserting a new job row. Status always starts at `pending`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: String,
    pub request_token: Option<String>,
    pub model: String,
    pub dataset: String,
    pub method: TrainingMethod,
    pub hardware: String,
    pub config: serde_json::Value,
    pub cost_estimate_usd: f64,
    pub expected_duration_hours: f64,
    pub created_at: DateTime<Utc>,
}

/// One budget ledger entry: a reserved estimate, or the settled actual
/// cost once the job terminated.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub job_id: String,
    /// Calendar month the amount counts against, as `YYYY-MM` (UTC).
    pub month: String,
    pub amount_usd: f64,
    pub settled: bool,
}

/// Job counts per status.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

impl StatusCounts {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    pub fn active(&self) -> i64 {
        self.pending + self.running
    }
}
