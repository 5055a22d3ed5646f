//! SQLite-backed job registry and budget ledger.
//!
//! One writer at a time; every mutation goes through the connection mutex.
//! The registry database survives keep-alive hand-offs, so a successor
//! process picks up exactly where the previous instance stopped.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::schema::SCHEMA_SQL;
use crate::types::*;
use tuneforge_core::{Error, JobStatus, Result, TrainingMethod};

/// Durable store for job records and ledger entries.
pub struct JobStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl JobStore {
    /// Open or create the registry database.
    ///
    /// `db_dir` is the directory (e.g., `data/registry/`). The file will be
    /// `db_dir/tuneforge.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("tuneforge.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };

        let counts = store.status_counts()?;
        info!(
            "JobStore initialized: {} jobs ({} active), path={}",
            counts.total(),
            counts.active(),
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Job CRUD
    // ---------------------------------------------------------------

    /// Insert a new pending job together with its ledger reservation in a
    /// single transaction, so admission never leaves a half-written state.
    pub fn insert_job_with_reservation(&self, job: &NewJob, month: &str) -> Result<()> {
        let config_json = serde_json::to_string(&job.config).unwrap();

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO jobs (id, request_token, model, dataset, method, hardware, \
             config_json, status, cost_estimate_usd, expected_duration_hours, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10)",
            params![
                job.id,
                job.request_token,
                job.model,
                job.dataset,
                job.method.as_str(),
                job.hardware,
                config_json,
                job.cost_estimate_usd,
                job.expected_duration_hours,
                job.created_at.timestamp_millis(),
            ],
        )
        .map_err(|e| {
            if e.to_string()
                .contains("UNIQUE constraint failed: jobs.request_token")
            {
                Error::DuplicateToken(job.request_token.clone().unwrap_or_default())
            } else {
                Error::Database(e.to_string())
            }
        })?;
        tx.execute(
            "INSERT INTO ledger_entries (job_id, month, amount_usd, settled) \
             VALUES (?1, ?2, ?3, 0)",
            params![job.id, month, job.cost_estimate_usd],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM jobs WHERE id = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![id], |row| Ok(Self::row_to_job(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// Find a job by its caller-supplied idempotency token.
    pub fn find_job_by_token(&self, token: &str) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM jobs WHERE request_token = ?1")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![token], |row| Ok(Self::row_to_job(row)))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    /// List jobs, newest first, optionally filtered by status.
    pub fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<JobRecord>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.conn.lock();
        let rows = match status {
            Some(s) => {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT * FROM jobs WHERE status = ?1 \
                         ORDER BY created_at DESC, id LIMIT ?2",
                    )
                    .map_err(|e| Error::Database(e.to_string()))?;
                let rows = stmt
                    .query_map(params![s.as_str(), limit], |row| Ok(Self::row_to_job(row)))
                    .map_err(|e| Error::Database(e.to_string()))?;
                rows.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = conn
                    .prepare_cached("SELECT * FROM jobs ORDER BY created_at DESC, id LIMIT ?1")
                    .map_err(|e| Error::Database(e.to_string()))?;
                let rows = stmt
                    .query_map(params![limit], |row| Ok(Self::row_to_job(row)))
                    .map_err(|e| Error::Database(e.to_string()))?;
                rows.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    /// All pending and running jobs, oldest first. The poller walks this.
    pub fn active_jobs(&self) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM jobs WHERE status IN ('pending', 'running') \
                 ORDER BY created_at ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| Ok(Self::row_to_job(row)))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Lifecycle writes
    // ---------------------------------------------------------------

    /// Record a successful external submission. Clears any previous
    /// submission error.
    pub fn record_submission(
        &self,
        id: &str,
        external_id: &str,
        monitor_url: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET external_id = ?1, monitor_url = ?2, last_error = NULL \
                 WHERE id = ?3",
                params![external_id, monitor_url, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Record a failed external submission; the job stays pending.
    pub fn record_submission_error(&self, id: &str, error: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET last_error = ?1 WHERE id = ?2",
                params![error, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Move a job to `running` and stamp `started_at`.
    pub fn mark_running(&self, id: &str, started_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET status = 'running', started_at = ?1 WHERE id = ?2",
                params![started_at.timestamp_millis(), id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Refresh the live cost and progress of a non-terminal job.
    pub fn update_live_cost(&self, id: &str, cost: f64, progress: Option<f64>) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET cost_actual_usd = ?1, progress = COALESCE(?2, progress) \
                 WHERE id = ?3",
                params![cost, progress, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Move a job to a terminal status, freezing its final cost.
    ///
    /// `last_error` is written as given: a message on `failed`, NULL on
    /// `completed` and `cancelled` (clearing stale submission errors).
    pub fn mark_terminal(
        &self,
        id: &str,
        status: JobStatus,
        ended_at: DateTime<Utc>,
        cost_actual: f64,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE jobs SET status = ?1, ended_at = ?2, cost_actual_usd = ?3, \
                 last_error = ?4 WHERE id = ?5",
                params![
                    status.as_str(),
                    ended_at.timestamp_millis(),
                    cost_actual,
                    last_error,
                    id
                ],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    // ---------------------------------------------------------------
    // Budget ledger
    // ---------------------------------------------------------------

    /// Total ledger amount booked against one `YYYY-MM` month: outstanding
    /// reservations plus settled actuals.
    pub fn month_spend(&self, month: &str) -> Result<f64> {
        let conn = self.conn.lock();
        let total: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount_usd), 0.0) FROM ledger_entries WHERE month = ?1",
                params![month],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(total)
    }

    /// Outstanding (unsettled) reservation total for one month.
    pub fn month_reserved(&self, month: &str) -> Result<f64> {
        let conn = self.conn.lock();
        let total: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(amount_usd), 0.0) FROM ledger_entries \
                 WHERE month = ?1 AND settled = 0",
                params![month],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(total)
    }

    /// Replace a job's reserved estimate with its final actual cost. The
    /// entry keeps the month it was booked in.
    pub fn settle_reservation(&self, job_id: &str, amount: f64) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE ledger_entries SET amount_usd = ?1, settled = 1 WHERE job_id = ?2",
                params![amount, job_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Get the ledger entry for a job.
    pub fn ledger_entry(&self, job_id: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached(
                "SELECT job_id, month, amount_usd, settled FROM ledger_entries \
                 WHERE job_id = ?1",
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![job_id], |row| {
                Ok(LedgerEntry {
                    job_id: row.get(0)?,
                    month: row.get(1)?,
                    amount_usd: row.get(2)?,
                    settled: row.get::<_, i64>(3)? != 0,
                })
            })
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(row)
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    /// Job counts grouped by status.
    pub fn status_counts(&self) -> Result<StatusCounts> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached("SELECT status, COUNT(*) FROM jobs GROUP BY status")
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut counts = StatusCounts::default();
        for (status, n) in rows.flatten() {
            match status.as_str() {
                "pending" => counts.pending = n,
                "running" => counts.running = n,
                "completed" => counts.completed = n,
                "failed" => counts.failed = n,
                "cancelled" => counts.cancelled = n,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Sum of actual costs across every job ever recorded.
    pub fn total_actual_cost(&self) -> Result<f64> {
        let conn = self.conn.lock();
        let total: f64 = conn
            .query_row(
                "SELECT COALESCE(SUM(cost_actual_usd), 0.0) FROM jobs",
                [],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(total)
    }

    /// Size of the database file in bytes.
    pub fn db_size_bytes(&self) -> u64 {
        std::fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_job(row: &rusqlite::Row<'_>) -> JobRecord {
        JobRecord {
            id: row.get("id").unwrap_or_default(),
            request_token: row.get("request_token").ok().flatten(),
            model: row.get("model").unwrap_or_default(),
            dataset: row.get("dataset").unwrap_or_default(),
            method: row
                .get::<_, String>("method")
                .ok()
                .and_then(|s| TrainingMethod::parse(&s))
                .unwrap_or(TrainingMethod::Sft),
            hardware: row.get("hardware").unwrap_or_default(),
            config: row
                .get::<_, String>("config_json")
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
            // Corrupt status text is mapped to failed so the row is
            // never polled or transitioned again.
            status: row
                .get::<_, String>("status")
                .ok()
                .and_then(|s| JobStatus::parse(&s))
                .unwrap_or(JobStatus::Failed),
            external_id: row.get("external_id").ok().flatten(),
            monitor_url: row.get("monitor_url").ok().flatten(),
            progress: row.get("progress").ok().flatten(),
            cost_estimate_usd: row.get("cost_estimate_usd").unwrap_or(0.0),
            cost_actual_usd: row.get("cost_actual_usd").unwrap_or(0.0),
            expected_duration_hours: row.get("expected_duration_hours").unwrap_or(0.0),
            last_error: row.get("last_error").ok().flatten(),
            created_at: from_millis(row.get("created_at").unwrap_or(0)),
            started_at: row
                .get::<_, Option<i64>>("started_at")
                .ok()
                .flatten()
                .map(from_millis),
            ended_at: row
                .get::<_, Option<i64>>("ended_at")
                .ok()
                .flatten()
                .map(from_millis),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}
