//! Budget governor: monthly admission control over the job ledger.
//!
//! Every admitted job books a reservation row for its estimate; terminal
//! jobs get trued up to actual cost. Admission compares the calendar month's
//! booked total against the configured limit, so money reserved by jobs that
//! are still running counts against new submissions.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use tuneforge_core::{Error, Result};
use tuneforge_store::{JobRecord, JobStore};

/// Calendar month key (UTC) that ledger entries are booked under, e.g.
/// `2026-08`.
pub fn current_month() -> String {
    Utc::now().format("%Y-%m").to_string()
}

/// Month-to-date spending picture for the costs endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub month: String,
    /// Everything booked this month: settled actuals plus open reservations.
    pub spent_usd: f64,
    /// Portion still held by non-terminal jobs.
    pub reserved_usd: f64,
    /// Portion already trued up to actual cost.
    pub settled_usd: f64,
    pub budget_limit_usd: f64,
    pub budget_remaining_usd: f64,
    pub budget_used_percent: f64,
}

pub struct BudgetGovernor {
    store: Arc<JobStore>,
    limit_usd: f64,
}

impl BudgetGovernor {
    pub fn new(store: Arc<JobStore>, limit_usd: f64) -> Self {
        Self { store, limit_usd }
    }

    pub fn limit_usd(&self) -> f64 {
        self.limit_usd
    }

    /// Admission check: rejects exactly when the month's booked total plus
    /// the new estimate would exceed the limit. Landing on the limit passes.
    pub fn approve(&self, requested: f64) -> Result<()> {
        let month = current_month();
        let spent = self.store.month_spend(&month)?;
        if spent + requested > self.limit_usd {
            return Err(Error::BudgetExceeded {
                spent,
                limit: self.limit_usd,
                requested,
            });
        }
        Ok(())
    }

    /// Replaces a terminal job's reservation with its actual cost. The entry
    /// keeps its original booking month even across a month boundary.
    pub fn true_up(&self, job: &JobRecord) -> Result<()> {
        if self.store.settle_reservation(&job.id, job.cost_actual_usd)? {
            info!(
                job_id = %job.id,
                estimate = job.cost_estimate_usd,
                actual = job.cost_actual_usd,
                "ledger entry trued up"
            );
        } else {
            debug!(job_id = %job.id, "no ledger entry to true up");
        }
        Ok(())
    }

    pub fn summary(&self) -> Result<CostSummary> {
        let month = current_month();
        let spent = self.store.month_spend(&month)?;
        let reserved = self.store.month_reserved(&month)?;
        let remaining = (self.limit_usd - spent).max(0.0);
        let used_percent = if self.limit_usd > 0.0 {
            (spent / self.limit_usd * 100.0).min(100.0)
        } else {
            100.0
        };
        Ok(CostSummary {
            month,
            spent_usd: spent,
            reserved_usd: reserved,
            settled_usd: spent - reserved,
            budget_limit_usd: self.limit_usd,
            budget_remaining_usd: remaining,
            budget_used_percent: used_percent,
        })
    }
}
