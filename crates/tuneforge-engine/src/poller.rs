//! Periodic status refresh for active jobs.
//!
//! Each cycle queries the backend once per pending or running job. Query
//! failures are counted per job; a job whose status cannot be read for
//! `failure_threshold` consecutive cycles is failed locally rather than
//! polled forever. One flaky job never blocks the rest of the cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use tuneforge_core::{Error, Result};

use crate::backend::{StatusObservation, TrainingBackend};
use crate::registry::JobRegistry;

pub struct StatusPoller {
    registry: Arc<JobRegistry>,
    backend: Arc<dyn TrainingBackend>,
    interval: Duration,
    backend_timeout: Duration,
    failure_threshold: u32,
    /// Consecutive query failures per job id.
    failures: Mutex<HashMap<String, u32>>,
}

impl StatusPoller {
    pub fn new(
        registry: Arc<JobRegistry>,
        backend: Arc<dyn TrainingBackend>,
        interval: Duration,
        backend_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        Self {
            registry,
            backend,
            interval,
            backend_timeout,
            failure_threshold: failure_threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.interval);
        loop {
            tick.tick().await;
            self.poll_cycle().await;
        }
    }

    /// One pass over the active set.
    pub async fn poll_cycle(&self) {
        let jobs = match self.registry.active_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("poll cycle could not list active jobs: {e}");
                return;
            }
        };

        // Drop counters for jobs that left the active set some other way,
        // e.g. a cancel between cycles.
        {
            let active: HashSet<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
            self.failures.lock().retain(|id, _| active.contains(id.as_str()));
        }

        for job in jobs {
            let Some(external_id) = job.external_id.clone() else {
                // Admitted but never submitted; nothing to query yet.
                continue;
            };
            match self.query(&external_id).await {
                Ok(observed) => {
                    self.failures.lock().remove(&job.id);
                    self.apply(&job.id, observed).await;
                }
                Err(e) => self.note_failure(&job.id, &e).await,
            }
        }
    }

    /// Consecutive failure count for a job, zero once it recovers.
    pub fn failure_count(&self, job_id: &str) -> u32 {
        self.failures.lock().get(job_id).copied().unwrap_or(0)
    }

    async fn query(&self, external_id: &str) -> Result<StatusObservation> {
        match tokio::time::timeout(self.backend_timeout, self.backend.status(external_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Backend(format!(
                "status query timed out after {}s",
                self.backend_timeout.as_secs()
            ))),
        }
    }

    async fn apply(&self, job_id: &str, observed: StatusObservation) {
        match self.registry.mark_from_poll(job_id, observed).await {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, to }) => {
                // Stale or contradictory backend state; the record wins.
                warn!(job_id = %job_id, %from, %to, "ignoring illegal reported transition");
            }
            Err(e) => warn!(job_id = %job_id, "poll update failed: {e}"),
        }
    }

    async fn note_failure(&self, job_id: &str, error: &Error) {
        let count = {
            let mut failures = self.failures.lock();
            let entry = failures.entry(job_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        if count < self.failure_threshold {
            debug!(
                job_id = %job_id,
                attempt = count,
                threshold = self.failure_threshold,
                "status query failed: {error}"
            );
            return;
        }
        warn!(
            job_id = %job_id,
            attempts = count,
            "status query exhausted retries; failing job"
        );
        self.failures.lock().remove(job_id);
        if let Err(e) = self.registry.mark_poll_exhausted(job_id).await {
            // Job may have been cancelled between observation and now.
            warn!(job_id = %job_id, "could not fail exhausted job: {e}");
        }
    }
}
