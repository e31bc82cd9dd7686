//! Ledger schema: tasks, job attempts, and the provider account snapshot.
//!
//! Applied idempotently every time the ledger is opened.

use rusqlite::Connection;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  resource_type TEXT NOT NULL,
  zk_type TEXT NOT NULL,
  contract TEXT NOT NULL,
  input_param TEXT NOT NULL,
  fingerprint TEXT NOT NULL,
  status TEXT NOT NULL,
  failure_reason TEXT,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL,
  tx_hash TEXT,
  reward_status TEXT,
  reward TEXT,
  reward_tx TEXT,
  challenge_tx TEXT,
  slash_tx TEXT,
  CHECK (status <> 'success' OR tx_hash IS NOT NULL)
);

CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
  attempt INTEGER NOT NULL,
  started_at INTEGER NOT NULL,
  ended_at INTEGER,
  outcome TEXT NOT NULL,
  reason TEXT,
  diagnostic TEXT,
  engine TEXT,
  artifact_json TEXT,
  rejections INTEGER NOT NULL DEFAULT 0,
  UNIQUE(task_id, attempt)
);

CREATE TABLE IF NOT EXISTS provider_account (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  node_id TEXT NOT NULL,
  owner_address TEXT NOT NULL,
  beneficiary_address TEXT NOT NULL,
  balance TEXT NOT NULL,
  collateral TEXT NOT NULL,
  synced_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, id);
CREATE INDEX IF NOT EXISTS idx_tasks_tx_hash ON tasks(tx_hash);
CREATE INDEX IF NOT EXISTS idx_tasks_fingerprint ON tasks(fingerprint);
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_one_active
  ON jobs(task_id) WHERE outcome IN ('running', 'proved', 'submitting');
"#;

/// Job outcome column values.
pub(crate) mod outcome {
    pub const RUNNING: &str = "running";
    pub const PROVED: &str = "proved";
    pub const SUBMITTING: &str = "submitting";
    pub const SUBMITTED: &str = "submitted";
    pub const FAILED: &str = "failed";
}

pub(crate) fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)
}
