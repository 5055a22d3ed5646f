//! TuneForge Hub: production adapters for the engine's collaborator traits.
//!
//! Jobs run on Hugging Face Jobs, datasets are checked against the HF
//! datasets-server, and keep-alive restarts go through GitHub Actions
//! `workflow_dispatch`.

pub mod actions;
pub mod jobs;
pub mod validate;

pub use actions::WorkflowDispatcher;
pub use jobs::HfJobsBackend;
pub use validate::HubDatasetValidator;
