//! The job registry: owns every job record and serializes every mutation.
//!
//! All writes (admission, submission bookkeeping, cancellation, poll-driven
//! transitions) run under one async lock, so the admission sequence of
//! validate, price, approve, reserve can never interleave with another
//! create and overrun the budget.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::BoxStream;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use tuneforge_core::{Error, JobStatus, Result, TrainingMethod};
use tuneforge_store::{JobRecord, JobStore, NewJob, StatusCounts};

use crate::backend::{DatasetValidator, StatusObservation, TrainingBackend};
use crate::budget::{current_month, BudgetGovernor};
use crate::cost::{batch_size_from, epochs_from, CostEstimator};

/// Parameters for [`JobRegistry::create`].
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub model: String,
    pub dataset: String,
    pub method: TrainingMethod,
    pub hardware: String,
    pub config: serde_json::Value,
    /// Overrides the duration heuristic when supplied.
    pub expected_duration_hours: Option<f64>,
    /// Caller-supplied idempotency key. Reusing one returns the original
    /// record instead of admitting a second job.
    pub request_token: Option<String>,
}

/// What a create call produced.
#[derive(Debug, Clone)]
pub struct CreateOutcome {
    pub job: JobRecord,
    /// False when an existing record was returned for a reused token.
    pub created: bool,
    /// Set when the external submission failed. The job stays pending with
    /// its reservation held; a retry with the same token resubmits it.
    pub submission_error: Option<String>,
}

pub struct JobRegistry {
    store: Arc<JobStore>,
    backend: Arc<dyn TrainingBackend>,
    validator: Arc<dyn DatasetValidator>,
    estimator: CostEstimator,
    governor: BudgetGovernor,
    backend_timeout: Duration,
    write_lock: Mutex<()>,
}

impl JobRegistry {
    pub fn new(
        store: Arc<JobStore>,
        backend: Arc<dyn TrainingBackend>,
        validator: Arc<dyn DatasetValidator>,
        estimator: CostEstimator,
        governor: BudgetGovernor,
        backend_timeout: Duration,
    ) -> Self {
        Self {
            store,
            backend,
            validator,
            estimator,
            governor,
            backend_timeout,
            write_lock: Mutex::new(()),
        }
    }

    pub fn estimator(&self) -> &CostEstimator {
        &self.estimator
    }

    pub fn governor(&self) -> &BudgetGovernor {
        &self.governor
    }

    /// Admits, prices, reserves and submits a new job.
    ///
    /// The dataset check runs before the write lock is taken; it reads
    /// external state and touches nothing local.
    pub async fn create(&self, req: JobRequest) -> Result<CreateOutcome> {
        let report = self
            .bounded(self.validator.validate(&req.dataset, req.method))
            .await?;
        if !report.valid {
            let reason = report.error.unwrap_or_else(|| {
                format!(
                    "dataset {} is not compatible with {} training",
                    req.dataset, req.method
                )
            });
            return Err(Error::ValidationFailed(reason));
        }

        let _guard = self.write_lock.lock().await;

        // Idempotent replay: a reused token never admits a second job.
        if let Some(token) = &req.request_token {
            if let Some(existing) = self.store.find_job_by_token(token)? {
                return self.replay(existing).await;
            }
        }

        let expected_hours = match req.expected_duration_hours {
            Some(hours) if hours > 0.0 => hours,
            _ => {
                self.estimator
                    .plan(
                        &req.model,
                        &req.dataset,
                        &req.hardware,
                        epochs_from(&req.config),
                        batch_size_from(&req.config),
                    )?
                    .estimated_hours
            }
        };
        let estimate = self.estimator.estimate(&req.hardware, expected_hours)?;
        self.governor.approve(estimate)?;

        let job_id = Uuid::new_v4().to_string();
        let new_job = NewJob {
            id: job_id.clone(),
            request_token: req.request_token.clone(),
            model: req.model,
            dataset: req.dataset,
            method: req.method,
            hardware: req.hardware,
            config: req.config,
            cost_estimate_usd: estimate,
            expected_duration_hours: expected_hours,
            created_at: Utc::now(),
        };

        match self
            .store
            .insert_job_with_reservation(&new_job, &current_month())
        {
            Ok(()) => {}
            Err(Error::DuplicateToken(token)) => {
                // Another process (a predecessor during hand-off overlap)
                // admitted this token between our lookup and insert. Its
                // record is authoritative.
                warn!(token = %token, "request token raced across processes");
                if let Some(existing) = self.store.find_job_by_token(&token)? {
                    return self.replay(existing).await;
                }
                return Err(Error::DuplicateToken(token));
            }
            Err(e) => return Err(e),
        }

        info!(
            job_id = %job_id,
            hardware = %new_job.hardware,
            estimate_usd = estimate,
            expected_hours,
            "job admitted"
        );
        self.submit_pending(&job_id, true).await
    }

    /// Decides what a reused token gets back: the existing record as-is, or
    /// a fresh submission attempt if the first one never reached the
    /// backend.
    async fn replay(&self, existing: JobRecord) -> Result<CreateOutcome> {
        if existing.status == JobStatus::Pending && existing.external_id.is_none() {
            info!(job_id = %existing.id, "retrying submission for admitted job");
            return self.submit_pending(&existing.id, false).await;
        }
        Ok(CreateOutcome {
            job: existing,
            created: false,
            submission_error: None,
        })
    }

    /// Submission attempt for an admitted record without an external id.
    /// Failure leaves the job pending and its reservation in place.
    async fn submit_pending(&self, job_id: &str, created: bool) -> Result<CreateOutcome> {
        let job = self.require_job(job_id)?;
        match self.bounded(self.backend.submit(&job)).await {
            Ok(submission) => {
                self.store.record_submission(
                    job_id,
                    &submission.external_id,
                    submission.monitor_url.as_deref(),
                )?;
                info!(
                    job_id = %job_id,
                    external_id = %submission.external_id,
                    "job submitted to backend"
                );
                Ok(CreateOutcome {
                    job: self.require_job(job_id)?,
                    created,
                    submission_error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.store.record_submission_error(job_id, &message)?;
                warn!(job_id = %job_id, error = %message, "submission failed; job stays pending");
                Ok(CreateOutcome {
                    job: self.require_job(job_id)?,
                    created,
                    submission_error: Some(message),
                })
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<JobRecord> {
        self.require_job(id)
    }

    pub fn list(&self, status: Option<JobStatus>, limit: Option<usize>) -> Result<Vec<JobRecord>> {
        self.store.list_jobs(status, limit)
    }

    /// Jobs the poller should look at: pending or running.
    pub fn active_jobs(&self) -> Result<Vec<JobRecord>> {
        self.store.active_jobs()
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        self.store.status_counts()
    }

    pub fn total_actual_cost(&self) -> Result<f64> {
        self.store.total_actual_cost()
    }

    /// Cooperative cancellation. The backend must confirm before the local
    /// record moves; a backend error leaves the job untouched so the caller
    /// can retry.
    pub async fn cancel(&self, id: &str) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let job = self.require_job(id)?;

        if job.status.is_terminal() {
            return Err(Error::InvalidTransition {
                from: job.status,
                to: JobStatus::Cancelled,
            });
        }
        if let Some(external_id) = &job.external_id {
            self.bounded(self.backend.cancel(external_id)).await?;
        }

        let ended = Utc::now();
        let final_cost = match job.started_at {
            Some(started) => self.estimator.cost_between(&job.hardware, started, ended)?,
            None => 0.0,
        };
        self.store
            .mark_terminal(id, JobStatus::Cancelled, ended, final_cost, None)?;
        let updated = self.require_job(id)?;
        self.governor.true_up(&updated)?;
        info!(job_id = %id, cost_usd = final_cost, "job cancelled");
        Ok(updated)
    }

    /// Applies one status observation from the poller. Transitions outside
    /// the status table are rejected and leave the record unchanged.
    pub async fn mark_from_poll(&self, id: &str, observed: StatusObservation) -> Result<JobRecord> {
        let _guard = self.write_lock.lock().await;
        let job = self.require_job(id)?;

        if job.status.is_terminal() {
            if observed.status == job.status {
                return Ok(job);
            }
            warn!(
                job_id = %id,
                local = %job.status,
                reported = %observed.status,
                "poll update for terminal job rejected"
            );
            return Err(Error::InvalidTransition {
                from: job.status,
                to: observed.status,
            });
        }

        match (job.status, observed.status) {
            (JobStatus::Pending, JobStatus::Pending) => Ok(job),
            (JobStatus::Running, JobStatus::Running) => {
                let live = match observed.cost_usd {
                    Some(cost) => cost,
                    None => self.estimator.live_cost(&job)?,
                };
                self.store.update_live_cost(id, live, observed.progress)?;
                self.require_job(id)
            }
            (JobStatus::Pending, JobStatus::Running) => {
                self.store.mark_running(id, Utc::now())?;
                info!(job_id = %id, "job started running");
                self.require_job(id)
            }
            (from, target) if target.is_terminal() => {
                let mut job = job;
                // A job can start and finish between two polls. Pass through
                // running so started_at is stamped and the status table
                // still holds for every step taken.
                if from == JobStatus::Pending && !from.can_transition_to(target) {
                    self.store.mark_running(id, Utc::now())?;
                    job = self.require_job(id)?;
                }
                self.finish(&job, target, observed.cost_usd, observed.message.as_deref())
            }
            (from, to) => {
                warn!(job_id = %id, from = %from, to = %to, "backend reported an illegal transition");
                Err(Error::InvalidTransition { from, to })
            }
        }
    }

    /// Fails a job whose status could not be queried `threshold` times in a
    /// row. Caller is the poller after its bounded retries ran out.
    pub async fn mark_poll_exhausted(&self, id: &str) -> Result<JobRecord> {
        self.mark_from_poll(
            id,
            StatusObservation {
                status: JobStatus::Failed,
                progress: None,
                cost_usd: None,
                message: Some(Error::PollExhausted.to_string()),
            },
        )
        .await
    }

    /// Log stream for a submitted job.
    pub async fn logs(&self, id: &str) -> Result<BoxStream<'static, Result<String>>> {
        let job = self.require_job(id)?;
        let external_id = job
            .external_id
            .ok_or_else(|| Error::NotFound(format!("job {id} has no external execution")))?;
        self.backend.logs(&external_id).await
    }

    /// Terminal transition: freeze the final cost, persist, true up the
    /// ledger. A backend-reported cost wins over the local clock-based
    /// figure. Must be called with the write lock held.
    fn finish(
        &self,
        job: &JobRecord,
        target: JobStatus,
        reported_cost: Option<f64>,
        message: Option<&str>,
    ) -> Result<JobRecord> {
        if !job.status.can_transition_to(target) {
            return Err(Error::InvalidTransition {
                from: job.status,
                to: target,
            });
        }
        let ended = Utc::now();
        let final_cost = match reported_cost {
            Some(cost) => cost,
            None => match job.started_at {
                Some(started) => self.estimator.cost_between(&job.hardware, started, ended)?,
                None => 0.0,
            },
        };
        let last_error = match target {
            JobStatus::Failed => {
                Some(message.map(str::to_string).unwrap_or_else(|| "backend reported failure".to_string()))
            }
            _ => None,
        };
        self.store
            .mark_terminal(&job.id, target, ended, final_cost, last_error.as_deref())?;
        let updated = self.require_job(&job.id)?;
        self.governor.true_up(&updated)?;
        info!(
            job_id = %job.id,
            status = %target,
            cost_usd = final_cost,
            "job reached terminal state"
        );
        Ok(updated)
    }

    fn require_job(&self, id: &str) -> Result<JobRecord> {
        self.store
            .get_job(id)?
            .ok_or_else(|| Error::NotFound(format!("job {id}")))
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.backend_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend(format!(
                "backend call timed out after {}s",
                self.backend_timeout.as_secs()
            ))),
        }
    }
}
