//! Cost estimation.
//!
//! Two layers: exact rate arithmetic (`estimate`, `live_cost`) used for
//! admission and the ledger, and the training-time heuristic (`plan`) used
//! when the caller does not supply an expected duration.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tuneforge_core::{Error, Result};
use tuneforge_store::JobRecord;

/// Hardware throughput in optimizer steps per second, before model-size
/// scaling.
const STEPS_PER_SEC: &[(&str, f64)] = &[
    ("t4-small", 2.0),
    ("t4-medium", 2.5),
    ("a10g-small", 3.0),
    ("a10g-large", 4.0),
    ("a100-large", 6.0),
];

const DEFAULT_STEPS_PER_SEC: f64 = 2.0;

/// Row counts for datasets whose size is known ahead of time. Anything else
/// is assumed to be ten thousand rows.
const KNOWN_DATASET_ROWS: &[(&str, u64)] = &[
    ("open-r1/codeforces-cots", 5_000),
    ("openai/gsm8k", 7_500),
    ("Anthropic/hh-rlhf", 160_000),
];

const DEFAULT_DATASET_ROWS: u64 = 10_000;

const DEFAULT_EPOCHS: u32 = 3;
const DEFAULT_BATCH_SIZE: u32 = 8;

/// Full breakdown behind a duration/cost estimate.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingPlan {
    pub hardware: String,
    pub model_size: String,
    pub dataset_rows: u64,
    pub epochs: u32,
    pub batch_size: u32,
    pub total_steps: u64,
    pub steps_per_second: f64,
    pub estimated_hours: f64,
    pub estimated_minutes: u64,
    pub minutes_per_epoch: u64,
    pub hourly_rate_usd: f64,
    pub estimated_cost_usd: f64,
}

/// Prices jobs against the hardware rate table.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    rates: HashMap<String, f64>,
}

impl CostEstimator {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self { rates }
    }

    /// Hourly rate for a hardware class. Unknown classes are rejected, never
    /// guessed at.
    pub fn rate(&self, hardware: &str) -> Result<f64> {
        self.rates
            .get(hardware)
            .copied()
            .ok_or_else(|| Error::UnknownHardwareClass(hardware.to_string()))
    }

    /// `rate * hours`, rounded to whole cents.
    pub fn estimate(&self, hardware: &str, duration_hours: f64) -> Result<f64> {
        let rate = self.rate(hardware)?;
        Ok(round_cents(rate * duration_hours.max(0.0)))
    }

    /// Cost accrued between two instants on the given hardware.
    pub fn cost_between(
        &self,
        hardware: &str,
        started: DateTime<Utc>,
        ended: DateTime<Utc>,
    ) -> Result<f64> {
        let hours = (ended - started).num_milliseconds().max(0) as f64 / 3_600_000.0;
        self.estimate(hardware, hours)
    }

    /// Current accrued cost of a job: elapsed runtime for running jobs, the
    /// frozen final figure for terminal ones, zero before execution starts.
    pub fn live_cost(&self, job: &JobRecord) -> Result<f64> {
        if job.status.is_terminal() {
            return Ok(job.cost_actual_usd);
        }
        match job.started_at {
            Some(started) => self.cost_between(&job.hardware, started, Utc::now()),
            None => Ok(0.0),
        }
    }

    /// Training-time heuristic: dataset rows and epochs over batch size give
    /// total optimizer steps, throughput gives wall time, the rate table
    /// gives cost.
    pub fn plan(
        &self,
        model: &str,
        dataset: &str,
        hardware: &str,
        epochs: u32,
        batch_size: u32,
    ) -> Result<TrainingPlan> {
        let rate = self.rate(hardware)?;
        let rows = dataset_rows(dataset);
        let epochs = if epochs == 0 { DEFAULT_EPOCHS } else { epochs };
        let batch_size = if batch_size == 0 { DEFAULT_BATCH_SIZE } else { batch_size };

        let steps_per_second = steps_per_sec(hardware) * model_scale(model);
        let total_steps = rows as f64 * epochs as f64 / batch_size as f64;
        let seconds = total_steps / steps_per_second;
        let hours = seconds / 3600.0;

        Ok(TrainingPlan {
            hardware: hardware.to_string(),
            model_size: model_size_label(model),
            dataset_rows: rows,
            epochs,
            batch_size,
            total_steps: total_steps as u64,
            steps_per_second: round2(steps_per_second),
            estimated_hours: round2(hours),
            estimated_minutes: (seconds / 60.0).round() as u64,
            minutes_per_epoch: (seconds / 60.0 / epochs as f64).round() as u64,
            hourly_rate_usd: rate,
            estimated_cost_usd: round_cents(rate * hours),
        })
    }
}

/// Larger models step slower. Checked from largest to smallest so that
/// `13b` never falls into the `3b` bucket by substring accident.
fn model_scale(model: &str) -> f64 {
    let m = model.to_lowercase();
    if m.contains("13b") || m.contains("7b") {
        0.3
    } else if m.contains("3b") {
        0.5
    } else if m.contains("1.5b") {
        0.7
    } else {
        1.0
    }
}

fn model_size_label(model: &str) -> String {
    let m = model.to_lowercase();
    let label = if m.contains("0.5b") || m.contains("500m") {
        "0.5B"
    } else if m.contains("1.5b") || m.contains("1.7b") {
        "1.5B"
    } else if m.contains("13b") {
        "13B"
    } else if m.contains("7b") {
        "7B"
    } else if m.contains("3b") {
        "3B"
    } else {
        "unknown"
    };
    label.to_string()
}

fn steps_per_sec(hardware: &str) -> f64 {
    STEPS_PER_SEC
        .iter()
        .find(|(h, _)| *h == hardware)
        .map(|(_, s)| *s)
        .unwrap_or(DEFAULT_STEPS_PER_SEC)
}

fn dataset_rows(dataset: &str) -> u64 {
    KNOWN_DATASET_ROWS
        .iter()
        .find(|(d, _)| *d == dataset)
        .map(|(_, r)| *r)
        .unwrap_or(DEFAULT_DATASET_ROWS)
}

fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Training epochs from a job config, falling back to the default.
pub fn epochs_from(config: &serde_json::Value) -> u32 {
    config
        .get("epochs")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_EPOCHS)
}

/// Batch size from a job config, falling back to the default.
pub fn batch_size_from(config: &serde_json::Value) -> u32 {
    config
        .get("batch_size")
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuneforge_core::TuneForgeConfig;

    fn estimator() -> CostEstimator {
        CostEstimator::new(TuneForgeConfig::default_rates())
    }

    #[test]
    fn test_estimate_is_rate_times_hours() {
        let est = estimator();
        assert_eq!(est.estimate("t4-small", 1.0).unwrap(), 0.75);
        assert_eq!(est.estimate("t4-small", 2.0).unwrap(), 1.5);
        assert_eq!(est.estimate("a100-large", 0.5).unwrap(), 2.5);
        // 0.75 * 1.5 = 1.125 rounds up to 1.13.
        assert_eq!(est.estimate("t4-small", 1.5).unwrap(), 1.13);
    }

    #[test]
    fn test_estimate_zero_duration_is_free() {
        let est = estimator();
        assert_eq!(est.estimate("a10g-large", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_estimate_monotonic_in_duration() {
        let est = estimator();
        let mut prev = 0.0;
        for i in 0..=40 {
            let hours = i as f64 * 0.25;
            let cost = est.estimate("t4-medium", hours).unwrap();
            assert!(cost >= prev, "cost decreased at {hours}h: {cost} < {prev}");
            prev = cost;
        }
    }

    #[test]
    fn test_unknown_hardware_rejected() {
        let est = estimator();
        match est.estimate("h100-mega", 1.0) {
            Err(Error::UnknownHardwareClass(class)) => assert_eq!(class, "h100-mega"),
            other => panic!("expected UnknownHardwareClass, got {other:?}"),
        }
        assert!(est.plan("Qwen/Qwen2.5-7B", "openai/gsm8k", "h100-mega", 3, 8).is_err());
    }

    #[test]
    fn test_plan_known_dataset() {
        let est = estimator();
        let plan = est
            .plan("Qwen/Qwen2.5-0.5B", "open-r1/codeforces-cots", "t4-small", 3, 8)
            .unwrap();
        // 5000 rows * 3 epochs / batch 8 = 1875 steps at 2.0 steps/sec.
        assert_eq!(plan.total_steps, 1875);
        assert_eq!(plan.steps_per_second, 2.0);
        assert_eq!(plan.model_size, "0.5B");
        assert_eq!(plan.dataset_rows, 5_000);
        assert_eq!(plan.estimated_hours, 0.26);
        assert_eq!(plan.estimated_minutes, 16);
        // 15.625 total minutes across 3 epochs.
        assert_eq!(plan.minutes_per_epoch, 5);
        assert_eq!(plan.hourly_rate_usd, 0.75);
        assert_eq!(plan.estimated_cost_usd, 0.2);
    }

    #[test]
    fn test_plan_scales_down_for_large_models() {
        let est = estimator();
        let small = est
            .plan("Qwen/Qwen2.5-0.5B", "openai/gsm8k", "a10g-small", 3, 8)
            .unwrap();
        let large = est
            .plan("Qwen/Qwen2.5-7B", "openai/gsm8k", "a10g-small", 3, 8)
            .unwrap();
        assert_eq!(small.steps_per_second, 3.0);
        assert_eq!(large.steps_per_second, 0.9);
        assert!(large.estimated_hours > small.estimated_hours);
        assert!(large.estimated_cost_usd > small.estimated_cost_usd);
    }

    #[test]
    fn test_plan_13b_takes_large_model_scale() {
        let est = estimator();
        let plan = est
            .plan("meta-llama/Llama-2-13b-hf", "openai/gsm8k", "a100-large", 3, 8)
            .unwrap();
        assert_eq!(plan.model_size, "13B");
        // 6.0 * 0.3, not the 3b bucket's 0.5.
        assert_eq!(plan.steps_per_second, 1.8);
    }

    #[test]
    fn test_plan_unknown_dataset_uses_fallback_rows() {
        let est = estimator();
        let plan = est
            .plan("Qwen/Qwen2.5-1.5B", "somebody/obscure-set", "t4-medium", 2, 4)
            .unwrap();
        assert_eq!(plan.dataset_rows, 10_000);
        assert_eq!(plan.total_steps, 5_000);
        assert_eq!(plan.model_size, "1.5B");
    }

    #[test]
    fn test_plan_zero_epochs_and_batch_fall_back_to_defaults() {
        let est = estimator();
        let plan = est
            .plan("Qwen/Qwen2.5-0.5B", "openai/gsm8k", "t4-small", 0, 0)
            .unwrap();
        assert_eq!(plan.epochs, 3);
        assert_eq!(plan.batch_size, 8);
    }

    #[test]
    fn test_config_extraction_defaults() {
        let explicit = serde_json::json!({ "epochs": 5, "batch_size": 16 });
        assert_eq!(epochs_from(&explicit), 5);
        assert_eq!(batch_size_from(&explicit), 16);

        let empty = serde_json::json!({});
        assert_eq!(epochs_from(&empty), 3);
        assert_eq!(batch_size_from(&empty), 8);
    }
}
