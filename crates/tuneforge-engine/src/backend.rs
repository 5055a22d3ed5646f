//! Collaborator traits at the boundary to the external execution platform.
//!
//! The engine never runs training itself. Everything it knows about a job's
//! remote life arrives through these traits, which keeps the registry and
//! poller testable against scripted in-memory backends.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use tuneforge_core::{JobStatus, Result, TrainingMethod};
use tuneforge_store::JobRecord;

/// Handle returned by a successful submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Identifier the backend uses for this execution.
    pub external_id: String,
    /// Human-facing page for watching the run, when the backend has one.
    pub monitor_url: Option<String>,
}

/// One observation of a job's remote state, already mapped into the local
/// status vocabulary.
#[derive(Debug, Clone)]
pub struct StatusObservation {
    pub status: JobStatus,
    /// Fraction complete in `[0, 1]`, when the backend reports it.
    pub progress: Option<f64>,
    /// Accrued cost reported by the backend. Preferred over the local
    /// clock-based figure when present.
    pub cost_usd: Option<f64>,
    /// Failure reason reported by the backend, if any.
    pub message: Option<String>,
}

/// Outcome of a dataset compatibility check.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub dataset: String,
    pub method: TrainingMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Where fine-tuning actually happens. The engine submits, observes and
/// cancels; it never executes.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    /// Hands the job to the backend. At most one successful call per job.
    async fn submit(&self, job: &JobRecord) -> Result<Submission>;

    /// Queries the current remote state of an execution.
    async fn status(&self, external_id: &str) -> Result<StatusObservation>;

    /// Asks the backend to stop an execution. Must succeed before the local
    /// record moves to cancelled.
    async fn cancel(&self, external_id: &str) -> Result<()>;

    /// Streams log lines for an execution.
    async fn logs(&self, external_id: &str) -> Result<BoxStream<'static, Result<String>>>;
}

/// Pre-admission dataset format check.
#[async_trait]
pub trait DatasetValidator: Send + Sync {
    async fn validate(&self, dataset: &str, method: TrainingMethod) -> Result<ValidationReport>;
}

/// Launches a successor orchestrator instance during hand-off.
#[async_trait]
pub trait RestartHook: Send + Sync {
    async fn dispatch_successor(&self) -> Result<()>;
}
