//! Shared application state.

use std::sync::Arc;

use tuneforge_core::TuneForgeConfig;
use tuneforge_engine::{DatasetValidator, JobRegistry, KeepAliveScheduler};
use tuneforge_store::JobStore;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: TuneForgeConfig,
    pub store: Arc<JobStore>,
    pub registry: Arc<JobRegistry>,
    /// Held directly so /api/datasets/validate can check a dataset without
    /// going through job admission.
    pub validator: Arc<dyn DatasetValidator>,
    pub scheduler: Arc<KeepAliveScheduler>,
}

impl AppState {
    pub fn new(
        config: TuneForgeConfig,
        store: Arc<JobStore>,
        registry: Arc<JobRegistry>,
        validator: Arc<dyn DatasetValidator>,
        scheduler: Arc<KeepAliveScheduler>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            validator,
            scheduler,
        }
    }
}
