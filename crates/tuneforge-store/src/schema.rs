//! Job registry schema SQL.

/// Core tables: jobs plus the per-job budget ledger.
///
/// Timestamps are unix millis. `request_token` carries the caller-supplied
/// idempotency key; the UNIQUE constraint is the last line of defense when
/// two process instances overlap during a keep-alive hand-off.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    request_token TEXT UNIQUE,
    model TEXT NOT NULL,
    dataset TEXT NOT NULL,
    method TEXT NOT NULL,
    hardware TEXT NOT NULL,
    config_json TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    external_id TEXT,
    monitor_url TEXT,
    progress REAL,
    cost_estimate_usd REAL NOT NULL,
    cost_actual_usd REAL NOT NULL DEFAULT 0,
    expected_duration_hours REAL NOT NULL,
    last_error TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    ended_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);

CREATE TABLE IF NOT EXISTS ledger_entries (
    job_id TEXT PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
    month TEXT NOT NULL,
    amount_usd REAL NOT NULL,
    settled INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_ledger_month ON ledger_entries(month);
"#;
