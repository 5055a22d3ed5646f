//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Paths to the orchestrator's on-disk state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Job registry database directory (`data/registry/`).
    pub registry: PathBuf,
    /// Optional hardware rate table override (`data/rates.json`).
    pub rates_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            registry: root.join("registry"),
            rates_file: root.join("rates.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.registry)?;
        Ok(())
    }
}

/// GitHub workflow dispatch settings for the keep-alive hand-off.
#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub token: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub workflow: String,
}

/// Top-level TuneForge configuration.
#[derive(Debug, Clone)]
pub struct TuneForgeConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Monthly spend ceiling in USD.
    pub budget_limit_usd: f64,
    /// Hardware class name to hourly USD rate. Read-only after load.
    pub hardware_rates: HashMap<String, f64>,
    /// Seconds between status poller cycles.
    pub poll_interval_secs: u64,
    /// Consecutive per-job query failures before the poller gives up.
    pub poll_failure_threshold: u32,
    /// Host-imposed wall-clock ceiling for this process, in hours.
    pub run_ceiling_hours: f64,
    /// Fraction of the ceiling at which the hand-off fires.
    pub handoff_fraction: f64,
    /// Timeout applied to every external backend call, in seconds.
    pub backend_timeout_secs: u64,
    /// Hugging Face API token, if configured.
    pub hf_token: Option<String>,
    /// Namespace (user or org) that owns submitted HF jobs.
    pub hf_namespace: Option<String>,
    /// Base URL of the HF API, overridable for tests.
    pub hf_jobs_base_url: String,
    /// GitHub dispatch settings; `None` disables the restart hook.
    pub github: Option<GithubConfig>,
}

impl TuneForgeConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_paths = DataPaths::new(data_dir)?;
        let hardware_rates = load_rates(&data_paths.rates_file)?;

        let handoff_fraction: f64 = env_parse("HANDOFF_FRACTION", 0.9);
        let handoff_fraction = if (0.05..=1.0).contains(&handoff_fraction) {
            handoff_fraction
        } else {
            tracing::warn!(
                value = handoff_fraction,
                "HANDOFF_FRACTION outside (0.05, 1.0], using 0.9"
            );
            0.9
        };

        Ok(Self {
            port: env_parse("PORT", 8000),
            data_paths,
            budget_limit_usd: env_parse("BUDGET_LIMIT_USD", 1000.0),
            hardware_rates,
            poll_interval_secs: env_parse("POLL_INTERVAL_SECS", 30),
            poll_failure_threshold: env_parse("POLL_FAILURE_THRESHOLD", 5),
            run_ceiling_hours: env_parse("RUN_CEILING_HOURS", 6.0),
            handoff_fraction,
            backend_timeout_secs: env_parse("BACKEND_TIMEOUT_SECS", 10),
            hf_token: std::env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
            hf_namespace: std::env::var("HF_NAMESPACE").ok().filter(|n| !n.is_empty()),
            hf_jobs_base_url: std::env::var("HF_JOBS_BASE_URL")
                .unwrap_or_else(|_| "https://huggingface.co/api".to_string()),
            github: github_from_env(),
        })
    }

    /// Built-in hourly rates, used when no override file is present.
    pub fn default_rates() -> HashMap<String, f64> {
        HashMap::from([
            ("t4-small".to_string(), 0.75),
            ("t4-medium".to_string(), 1.00),
            ("a10g-small".to_string(), 1.50),
            ("a10g-large".to_string(), 2.50),
            ("a100-large".to_string(), 5.00),
        ])
    }
}

fn github_from_env() -> Option<GithubConfig> {
    let token = std::env::var("GH_TOKEN").ok().filter(|t| !t.is_empty())?;
    let repo_owner = std::env::var("GITHUB_REPOSITORY_OWNER").ok()?;
    let repo_name = std::env::var("GITHUB_REPOSITORY_NAME").ok()?;
    Some(GithubConfig {
        token,
        repo_owner,
        repo_name,
        workflow: std::env::var("GITHUB_WORKFLOW").unwrap_or_else(|_| "train.yml".to_string()),
    })
}

/// Load the rate table. An override file replaces the built-in table
/// entirely; a malformed or negative entry aborts startup.
fn load_rates(path: &Path) -> Result<HashMap<String, f64>> {
    if !path.exists() {
        return Ok(TuneForgeConfig::default_rates());
    }
    let raw = std::fs::read_to_string(path)?;
    let rates: HashMap<String, f64> = serde_json::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid rate table {}: {}", path.display(), e)))?;
    for (class, rate) in &rates {
        if *rate < 0.0 || !rate.is_finite() {
            return Err(Error::Config(format!(
                "rate for hardware class '{}' must be a non-negative number, got {}",
                class, rate
            )));
        }
    }
    if rates.is_empty() {
        return Err(Error::Config(format!(
            "rate table {} is empty",
            path.display()
        )));
    }
    Ok(rates)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates_cover_known_classes() {
        let rates = TuneForgeConfig::default_rates();
        assert_eq!(rates.get("t4-small"), Some(&0.75));
        assert_eq!(rates.get("a100-large"), Some(&5.00));
        assert_eq!(rates.len(), 5);
        assert!(rates.values().all(|r| *r >= 0.0));
    }
}
