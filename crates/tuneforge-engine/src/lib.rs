//! TuneForge Engine: job registry, budget governor, cost estimation, status
//! polling and the keep-alive scheduler.
//!
//! The engine owns all orchestration state and decision-making. It talks to
//! the execution platform only through the traits in [`backend`], which is
//! what keeps its semantics testable without network access.

pub mod backend;
pub mod budget;
pub mod cost;
pub mod keepalive;
pub mod poller;
pub mod registry;

pub use backend::{
    DatasetValidator, RestartHook, StatusObservation, Submission, TrainingBackend,
    ValidationReport,
};
pub use budget::{current_month, BudgetGovernor, CostSummary};
pub use cost::{CostEstimator, TrainingPlan};
pub use keepalive::{KeepAliveScheduler, SchedulerPhase};
pub use poller::StatusPoller;
pub use registry::{CreateOutcome, JobRegistry, JobRequest};
