//! Error types for TuneForge.

use thiserror::Error;

use crate::types::JobStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dataset validation failed: {0}")]
    ValidationFailed(String),

    #[error("Unknown hardware class: {0}")]
    UnknownHardwareClass(String),

    #[error("Budget exceeded: spent ${spent:.2} of ${limit:.2} this month, requested ${requested:.2}")]
    BudgetExceeded {
        spent: f64,
        limit: f64,
        requested: f64,
    },

    #[error("Job submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("status query exhausted retries")]
    PollExhausted,

    #[error("Duplicate request token: {0}")]
    DuplicateToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
