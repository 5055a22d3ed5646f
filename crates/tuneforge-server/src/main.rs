//! TuneForge — fine-tuning job orchestration and cost governance server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

mod routes;
mod state;

use state::AppState;

fn resolve_data_dir() -> PathBuf {
    std::env::var("TUNEFORGE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());

    let config = tuneforge_core::TuneForgeConfig::from_env(&data_dir)?;
    let port = config.port;

    let store = Arc::new(
        tuneforge_store::JobStore::open(&config.data_paths.registry)
            .map_err(|e| anyhow::anyhow!("Failed to open job store: {}", e))?,
    );

    // Fails fast when HF_TOKEN or HF_NAMESPACE is missing; the server is
    // useless without a backend to hand jobs to.
    let backend = Arc::new(tuneforge_hub::HfJobsBackend::from_config(&config)?);
    let validator = Arc::new(tuneforge_hub::HubDatasetValidator::new(
        config.hf_token.clone(),
    ));

    let estimator = tuneforge_engine::CostEstimator::new(config.hardware_rates.clone());
    let governor = tuneforge_engine::BudgetGovernor::new(store.clone(), config.budget_limit_usd);
    let backend_timeout = Duration::from_secs(config.backend_timeout_secs);

    let registry = Arc::new(tuneforge_engine::JobRegistry::new(
        store.clone(),
        backend.clone(),
        validator.clone(),
        estimator,
        governor,
        backend_timeout,
    ));

    // Follow externally-executed jobs to their terminal state.
    let poller = Arc::new(tuneforge_engine::StatusPoller::new(
        registry.clone(),
        backend,
        Duration::from_secs(config.poll_interval_secs),
        backend_timeout,
        config.poll_failure_threshold,
    ));
    tokio::spawn(poller.run());

    // Dispatch a successor workflow before the host recycles this process.
    let hook = config.github.clone().map(|gh| {
        Arc::new(tuneforge_hub::WorkflowDispatcher::new(
            gh,
            config.run_ceiling_hours,
        )) as Arc<dyn tuneforge_engine::RestartHook>
    });
    let scheduler = Arc::new(tuneforge_engine::KeepAliveScheduler::new(
        config.run_ceiling_hours,
        config.handoff_fraction,
        hook,
    ));
    tokio::spawn(scheduler.clone().run());

    let state = Arc::new(AppState::new(config, store, registry, validator, scheduler));

    let app = routes::build_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("TuneForge server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
