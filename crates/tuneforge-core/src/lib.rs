//! TuneForge Core: shared job domain types, configuration, error taxonomy.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DataPaths, GithubConfig, TuneForgeConfig};
pub use error::{Error, Result};
pub use types::{JobStatus, TrainingMethod};
