//! Task Ledger: durable record of every task, its job attempts, and the
//! provider account snapshot.
//!
//! The ledger is the single source of truth: anything the orchestrator
//! keeps in memory can be rebuilt from it after a restart. Every write is
//! atomic for one task and conditional on the state the caller expects,
//! so concurrent writers race safely and exactly one of them wins.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

use cp_core::{
    now_secs, FailureReason, Job, JobOutcome, ProofArtifact, ProviderAccount, RewardStatus, Task,
    TaskId, TaskSpec, TaskStatus,
};

use crate::error::{LedgerError, LedgerResult};
use crate::schema::{self, outcome};

const TASK_COLUMNS: &str = "id, name, resource_type, zk_type, contract, input_param, status, \
     failure_reason, created_at, updated_at, tx_hash, reward_status, reward, reward_tx, \
     challenge_tx, slash_tx";

const JOB_COLUMNS: &str =
    "id, task_id, attempt, started_at, ended_at, outcome, reason, diagnostic, engine";

/// Settlement facts to merge into a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    /// Proof transaction the facts belong to.
    pub tx_hash: String,
    pub reward_status: RewardStatus,
    pub reward: Option<String>,
    pub reward_tx: Option<String>,
    pub challenge_tx: Option<String>,
    pub slash_tx: Option<String>,
    /// When set, the current reward status must be one of these.
    pub accepted_from: Option<Vec<RewardStatus>>,
}

impl SettlementRecord {
    pub fn new(tx_hash: impl Into<String>, reward_status: RewardStatus) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            reward_status,
            reward: None,
            reward_tx: None,
            challenge_tx: None,
            slash_tx: None,
            accepted_from: None,
        }
    }

    /// Narrow the reward statuses this record may be applied on top of.
    pub fn only_from(mut self, statuses: &[RewardStatus]) -> Self {
        self.accepted_from = Some(statuses.to_vec());
        self
    }

    pub fn with_reward(mut self, amount: Option<String>, reward_tx: Option<String>) -> Self {
        self.reward = amount;
        self.reward_tx = reward_tx;
        self
    }

    pub fn with_challenge_tx(mut self, tx: Option<String>) -> Self {
        self.challenge_tx = tx;
        self
    }

    pub fn with_slash_tx(mut self, tx: Option<String>) -> Self {
        self.slash_tx = tx;
        self
    }
}

/// Handle to the provider database. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Open (or create) the ledger file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> LedgerResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> LedgerResult<Self> {
        schema::init(&conn)?;
        // A claim outlives its submitter only if the process stopped
        // mid-submission; hand the proof back to the retry path.
        let released = conn.execute(
            "UPDATE jobs SET outcome = ?2 WHERE outcome = ?1",
            params![outcome::SUBMITTING, outcome::PROVED],
        )?;
        if released > 0 {
            tracing::warn!(released, "released proof claims left by a previous run");
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    // ── Tasks ────────────────────────────────────────────────────────────────

    /// Record a new task in RECEIVED.
    ///
    /// Fails with `DuplicateTask` if the id is taken or an equivalent task
    /// (same fingerprint) is recorded and has not failed. Failed work may
    /// be resubmitted under a new id.
    pub fn create_task(&self, spec: &TaskSpec) -> LedgerResult<TaskId> {
        let fingerprint = spec.fingerprint();
        let now = now_secs();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<TaskId> = tx
            .query_row(
                "SELECT id FROM tasks
                 WHERE id = ?1 OR (fingerprint = ?2 AND status <> ?3)
                 ORDER BY id = ?1 DESC
                 LIMIT 1",
                params![spec.id, fingerprint, TaskStatus::Failed.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = existing {
            return Err(LedgerError::DuplicateTask(existing));
        }

        tx.execute(
            "INSERT INTO tasks (id, name, resource_type, zk_type, contract, input_param,
                                fingerprint, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                spec.id,
                spec.name,
                spec.resource_type.as_str(),
                spec.zk_type,
                spec.contract,
                spec.input_param,
                fingerprint,
                TaskStatus::Received.as_str(),
                now,
            ],
        )?;
        tx.commit()?;
        Ok(spec.id)
    }

    pub fn get_task(&self, id: TaskId) -> LedgerResult<Task> {
        let conn = self.lock()?;
        load_task(&conn, id)
    }

    /// Tasks ordered by id ascending, optionally restricted to one status.
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> LedgerResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![status.map(|s| s.as_str())], TaskRow::read)?;
        let tasks = rows
            .map(|r| r.map_err(LedgerError::from).and_then(TaskRow::decode))
            .collect();
        tasks
    }

    pub fn task_by_tx_hash(&self, tx_hash: &str) -> LedgerResult<Task> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE tx_hash = ?1"),
                params![tx_hash],
                TaskRow::read,
            )
            .optional()?;
        row.ok_or_else(|| LedgerError::UnknownTx(tx_hash.to_string()))?
            .decode()
    }

    /// SUCCESS tasks whose proof is on chain but not yet PAID or SLASHED.
    pub fn unsettled_tasks(&self) -> LedgerResult<Vec<Task>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks
             WHERE status = ?1 AND tx_hash IS NOT NULL
               AND (reward_status IS NULL OR reward_status NOT IN (?2, ?3))
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(
            params![
                TaskStatus::Success.as_str(),
                RewardStatus::Paid.as_str(),
                RewardStatus::Slashed.as_str()
            ],
            TaskRow::read,
        )?;
        let tasks = rows
            .map(|r| r.map_err(LedgerError::from).and_then(TaskRow::decode))
            .collect();
        tasks
    }

    /// Conditional status write: succeeds only if the task is currently
    /// `from`. SUCCESS is not reachable here because it must carry a proof
    /// hash; use [`Ledger::mark_success`].
    pub fn update_status(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        reason: Option<FailureReason>,
    ) -> LedgerResult<()> {
        if to == TaskStatus::Success || !from.can_transition_to(to) {
            return Err(LedgerError::invalid_status(id, from, to));
        }
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE tasks SET status = ?3, failure_reason = ?4, updated_at = ?5
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                from.as_str(),
                to.as_str(),
                reason.map(|r| r.as_str()),
                now_secs()
            ],
        )?;
        if changed == 0 {
            return Err(conflict(&conn, id, from));
        }
        Ok(())
    }

    /// RECEIVED → RUNNING together with a new active job row.
    pub fn start_run(&self, id: TaskId) -> LedgerResult<Job> {
        let now = now_secs();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE tasks SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![
                id,
                TaskStatus::Received.as_str(),
                TaskStatus::Running.as_str(),
                now
            ],
        )?;
        if changed == 0 {
            return Err(conflict(&tx, id, TaskStatus::Received));
        }

        let attempt: u32 = tx.query_row(
            "SELECT COALESCE(MAX(attempt), 0) + 1 FROM jobs WHERE task_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO jobs (task_id, attempt, started_at, outcome) VALUES (?1, ?2, ?3, ?4)",
            params![id, attempt, now, outcome::RUNNING],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                LedgerError::ActiveJob(id)
            }
            other => other.into(),
        })?;
        let job_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Job {
            id: job_id,
            task_id: id,
            attempt,
            started_at: now,
            ended_at: None,
            outcome: JobOutcome::Running,
            diagnostic: None,
            engine: None,
        })
    }

    /// Retain a verified artifact on its running job. Returns false if the
    /// job is no longer running (cancelled or expired meanwhile).
    pub fn record_proof(&self, job_id: i64, artifact: &ProofArtifact) -> LedgerResult<bool> {
        let json =
            serde_json::to_string(artifact).map_err(|e| LedgerError::Decode(e.to_string()))?;
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET outcome = ?3, engine = ?4, artifact_json = ?5, ended_at = ?6
             WHERE id = ?1 AND outcome = ?2",
            params![
                job_id,
                outcome::RUNNING,
                outcome::PROVED,
                artifact.engine,
                json,
                now_secs()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Take exclusive ownership of a retained proof for one submission.
    ///
    /// Returns false when another submitter holds it, or when the task has
    /// left RUNNING. The holder must finish with [`Ledger::mark_success`],
    /// [`Ledger::release_proof`] or [`Ledger::retire_proof`].
    pub fn claim_proof(&self, job_id: i64) -> LedgerResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET outcome = ?3
             WHERE id = ?1 AND outcome = ?2
               AND task_id IN (SELECT id FROM tasks WHERE status = ?4)",
            params![
                job_id,
                outcome::PROVED,
                outcome::SUBMITTING,
                TaskStatus::Running.as_str()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Return a claimed proof after a failed submission, keeping the
    /// error as the job diagnostic. A refusal by the settlement layer
    /// bumps the job's rejection count, which is returned.
    pub fn release_proof(&self, job_id: i64, rejected: bool, diagnostic: &str) -> LedgerResult<u32> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET outcome = ?3, diagnostic = ?4, rejections = rejections + ?5
             WHERE id = ?1 AND outcome = ?2",
            params![
                job_id,
                outcome::SUBMITTING,
                outcome::PROVED,
                diagnostic,
                u32::from(rejected)
            ],
        )?;
        let rejections = conn
            .query_row(
                "SELECT rejections FROM jobs WHERE id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rejections.unwrap_or(0))
    }

    /// RUNNING → SUCCESS, atomically with the proof tx hash. The reward
    /// status starts at PENDING and the proved job is marked submitted.
    pub fn mark_success(&self, id: TaskId, tx_hash: &str) -> LedgerResult<()> {
        if tx_hash.trim().is_empty() {
            return Err(LedgerError::invalid_status(
                id,
                TaskStatus::Running,
                TaskStatus::Success,
            ));
        }
        let now = now_secs();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE tasks
             SET status = ?3, tx_hash = ?4, reward_status = ?5, failure_reason = NULL,
                 updated_at = ?6
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                TaskStatus::Running.as_str(),
                TaskStatus::Success.as_str(),
                tx_hash,
                RewardStatus::Pending.as_str(),
                now
            ],
        )?;
        if changed == 0 {
            return Err(conflict(&tx, id, TaskStatus::Running));
        }
        tx.execute(
            "UPDATE jobs SET outcome = ?4 WHERE task_id = ?1 AND outcome IN (?2, ?3)",
            params![id, outcome::PROVED, outcome::SUBMITTING, outcome::SUBMITTED],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// RUNNING → FAILED, closing the running job with the same reason.
    ///
    /// Refused with `ProofRetained` once the job has produced a proof: only
    /// the settlement path may end such a task.
    pub fn fail_run(
        &self,
        id: TaskId,
        reason: FailureReason,
        diagnostic: Option<&str>,
    ) -> LedgerResult<()> {
        self.close_run(id, reason, diagnostic, false)
    }

    /// RUNNING → FAILED for a task whose retained proof the settlement
    /// layer keeps refusing. The proof is dropped with the job.
    pub fn retire_proof(&self, id: TaskId, diagnostic: &str) -> LedgerResult<()> {
        self.close_run(id, FailureReason::Rejected, Some(diagnostic), true)
    }

    fn close_run(
        &self,
        id: TaskId,
        reason: FailureReason,
        diagnostic: Option<&str>,
        drop_proof: bool,
    ) -> LedgerResult<()> {
        let now = now_secs();
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE tasks SET status = ?3, failure_reason = ?4, updated_at = ?5
             WHERE id = ?1 AND status = ?2",
            params![
                id,
                TaskStatus::Running.as_str(),
                TaskStatus::Failed.as_str(),
                reason.as_str(),
                now
            ],
        )?;
        if changed == 0 {
            return Err(conflict(&tx, id, TaskStatus::Running));
        }

        let retained: i64 = tx.query_row(
            "SELECT COUNT(*) FROM jobs WHERE task_id = ?1 AND outcome IN (?2, ?3)",
            params![id, outcome::PROVED, outcome::SUBMITTING],
            |row| row.get(0),
        )?;
        if retained > 0 && !drop_proof {
            // Dropping the transaction rolls the task update back.
            return Err(LedgerError::ProofRetained(id));
        }

        tx.execute(
            "UPDATE jobs SET outcome = ?5, reason = ?6, diagnostic = ?7,
                             ended_at = COALESCE(ended_at, ?8)
             WHERE task_id = ?1 AND outcome IN (?2, ?3, ?4)",
            params![
                id,
                outcome::RUNNING,
                outcome::PROVED,
                outcome::SUBMITTING,
                outcome::FAILED,
                reason.as_str(),
                diagnostic,
                now
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Append-only merge of settlement facts.
    ///
    /// Returns `Ok(false)` when the record changes nothing (a replay).
    /// Hash and amount fields keep their first written value.
    pub fn record_settlement(&self, id: TaskId, rec: &SettlementRecord) -> LedgerResult<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let task = load_task(&tx, id)?;
        let to = rec.reward_status;

        if task.status != TaskStatus::Success {
            return Err(LedgerError::InvalidTransition {
                id,
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }
        if task.tx_hash.as_deref() != Some(rec.tx_hash.as_str()) {
            return Err(LedgerError::ProofMismatch {
                id,
                given: rec.tx_hash.clone(),
                recorded: task.tx_hash,
            });
        }
        let accepted = match (&rec.accepted_from, task.reward_status) {
            (None, _) => true,
            (Some(from), Some(current)) => from.contains(&current),
            (Some(_), None) => false,
        };
        if !accepted
            || !RewardStatus::reachable(task.reward_status, to)
            || (rec.reward_tx.is_some() && to != RewardStatus::Paid)
            || (rec.challenge_tx.is_some() && to != RewardStatus::Challenged)
            || (rec.slash_tx.is_some() && to != RewardStatus::Slashed)
        {
            return Err(LedgerError::invalid_reward(id, task.reward_status, to));
        }

        let reward = task.reward.clone().or_else(|| rec.reward.clone());
        let reward_tx = task.reward_tx.clone().or_else(|| rec.reward_tx.clone());
        let challenge_tx = task.challenge_tx.clone().or_else(|| rec.challenge_tx.clone());
        let slash_tx = task.slash_tx.clone().or_else(|| rec.slash_tx.clone());

        let unchanged = task.reward_status == Some(to)
            && reward == task.reward
            && reward_tx == task.reward_tx
            && challenge_tx == task.challenge_tx
            && slash_tx == task.slash_tx;
        if unchanged {
            return Ok(false);
        }

        tx.execute(
            "UPDATE tasks
             SET reward_status = ?2, reward = ?3, reward_tx = ?4, challenge_tx = ?5,
                 slash_tx = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                id,
                to.as_str(),
                reward,
                reward_tx,
                challenge_tx,
                slash_tx,
                now_secs()
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    // ── Jobs ─────────────────────────────────────────────────────────────────

    /// Every attempt for a task, oldest first.
    pub fn jobs(&self, task_id: TaskId) -> LedgerResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE task_id = ?1 ORDER BY attempt ASC"
        ))?;
        let rows = stmt.query_map(params![task_id], JobRow::read)?;
        let jobs = rows
            .map(|r| r.map_err(LedgerError::from).and_then(JobRow::decode))
            .collect();
        jobs
    }

    pub fn active_job(&self, task_id: TaskId) -> LedgerResult<Option<Job>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE task_id = ?1 AND outcome IN (?2, ?3, ?4)"
                ),
                params![task_id, outcome::RUNNING, outcome::PROVED, outcome::SUBMITTING],
                JobRow::read,
            )
            .optional()?;
        row.map(JobRow::decode).transpose()
    }

    /// Jobs still executing, across all tasks.
    pub fn running_jobs(&self) -> LedgerResult<Vec<Job>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE outcome = ?1 ORDER BY task_id ASC"
        ))?;
        let rows = stmt.query_map(params![outcome::RUNNING], JobRow::read)?;
        let jobs = rows
            .map(|r| r.map_err(LedgerError::from).and_then(JobRow::decode))
            .collect();
        jobs
    }

    /// Tasks holding a proof that is not on chain yet, whether it waits
    /// for a submitter or is being submitted right now.
    pub fn retained_proofs(&self) -> LedgerResult<Vec<TaskId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT task_id FROM jobs WHERE outcome IN (?1, ?2) ORDER BY task_id ASC",
        )?;
        let rows = stmt.query_map(params![outcome::PROVED, outcome::SUBMITTING], |row| {
            row.get(0)
        })?;
        let ids = rows.collect::<rusqlite::Result<Vec<TaskId>>>()?;
        Ok(ids)
    }

    /// Proved jobs whose artifact has not reached the settlement layer yet.
    /// Proofs claimed by a submitter are left out.
    pub fn unsubmitted_proofs(&self) -> LedgerResult<Vec<(Job, ProofArtifact)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT j.id, j.task_id, j.attempt, j.started_at, j.ended_at, j.outcome, j.reason,
                    j.diagnostic, j.engine, j.artifact_json
             FROM jobs j JOIN tasks t ON t.id = j.task_id
             WHERE j.outcome = ?1 AND t.status = ?2
             ORDER BY j.task_id ASC",
        )?;
        let rows = stmt.query_map(
            params![outcome::PROVED, TaskStatus::Running.as_str()],
            |row| Ok((JobRow::read(row)?, row.get::<_, Option<String>>(9)?)),
        )?;
        let mut out = Vec::new();
        for row in rows {
            let (job, artifact_json) = row?;
            let job = job.decode()?;
            let artifact_json = artifact_json
                .ok_or_else(|| LedgerError::Decode(format!("job {} proved without artifact", job.id)))?;
            let artifact: ProofArtifact = serde_json::from_str(&artifact_json)
                .map_err(|e| LedgerError::Decode(e.to_string()))?;
            out.push((job, artifact));
        }
        Ok(out)
    }

    // ── Provider account ─────────────────────────────────────────────────────

    /// Replace the account snapshot as a whole.
    pub fn save_account(&self, account: &ProviderAccount) -> LedgerResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO provider_account
                 (id, node_id, owner_address, beneficiary_address, balance, collateral, synced_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                account.node_id,
                account.owner_address,
                account.beneficiary_address,
                account.balance,
                account.collateral,
                account.synced_at
            ],
        )?;
        Ok(())
    }

    pub fn account(&self) -> LedgerResult<Option<ProviderAccount>> {
        let conn = self.lock()?;
        let account = conn
            .query_row(
                "SELECT node_id, owner_address, beneficiary_address, balance, collateral, synced_at
                 FROM provider_account WHERE id = 1",
                [],
                |row| {
                    Ok(ProviderAccount {
                        node_id: row.get(0)?,
                        owner_address: row.get(1)?,
                        beneficiary_address: row.get(2)?,
                        balance: row.get(3)?,
                        collateral: row.get(4)?,
                        synced_at: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(account)
    }
}

// ── Row helpers ───────────────────────────────────────────────────────────────

fn load_task(conn: &Connection, id: TaskId) -> LedgerResult<Task> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id],
            TaskRow::read,
        )
        .optional()?;
    row.ok_or(LedgerError::NotFound(id))?.decode()
}

/// Explain why a conditional write touched no rows.
fn conflict(conn: &Connection, id: TaskId, expected: TaskStatus) -> LedgerError {
    let current: rusqlite::Result<Option<String>> = conn
        .query_row(
            "SELECT status FROM tasks WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional();
    match current {
        Ok(Some(raw)) => match parse::<TaskStatus>(&raw) {
            Ok(actual) => LedgerError::Conflict {
                id,
                expected,
                actual,
            },
            Err(e) => e,
        },
        Ok(None) => LedgerError::NotFound(id),
        Err(e) => e.into(),
    }
}

fn parse<T>(raw: &str) -> LedgerResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse().map_err(|e: T::Err| LedgerError::Decode(e.to_string()))
}

fn parse_opt<T>(raw: Option<String>) -> LedgerResult<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    raw.as_deref().map(parse).transpose()
}

struct TaskRow {
    id: TaskId,
    name: String,
    resource_type: String,
    zk_type: String,
    contract: String,
    input_param: String,
    status: String,
    failure_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
    tx_hash: Option<String>,
    reward_status: Option<String>,
    reward: Option<String>,
    reward_tx: Option<String>,
    challenge_tx: Option<String>,
    slash_tx: Option<String>,
}

impl TaskRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            resource_type: row.get(2)?,
            zk_type: row.get(3)?,
            contract: row.get(4)?,
            input_param: row.get(5)?,
            status: row.get(6)?,
            failure_reason: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            tx_hash: row.get(10)?,
            reward_status: row.get(11)?,
            reward: row.get(12)?,
            reward_tx: row.get(13)?,
            challenge_tx: row.get(14)?,
            slash_tx: row.get(15)?,
        })
    }

    fn decode(self) -> LedgerResult<Task> {
        Ok(Task {
            id: self.id,
            name: self.name,
            resource_type: parse(&self.resource_type)?,
            zk_type: self.zk_type,
            contract: self.contract,
            input_param: self.input_param,
            status: parse(&self.status)?,
            failure_reason: parse_opt(self.failure_reason)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            tx_hash: self.tx_hash,
            reward_status: parse_opt(self.reward_status)?,
            reward: self.reward,
            reward_tx: self.reward_tx,
            challenge_tx: self.challenge_tx,
            slash_tx: self.slash_tx,
        })
    }
}

struct JobRow {
    id: i64,
    task_id: TaskId,
    attempt: u32,
    started_at: i64,
    ended_at: Option<i64>,
    outcome: String,
    reason: Option<String>,
    diagnostic: Option<String>,
    engine: Option<String>,
}

impl JobRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            task_id: row.get(1)?,
            attempt: row.get(2)?,
            started_at: row.get(3)?,
            ended_at: row.get(4)?,
            outcome: row.get(5)?,
            reason: row.get(6)?,
            diagnostic: row.get(7)?,
            engine: row.get(8)?,
        })
    }

    fn decode(self) -> LedgerResult<Job> {
        let outcome = match self.outcome.as_str() {
            outcome::RUNNING => JobOutcome::Running,
            outcome::PROVED => JobOutcome::Proved,
            outcome::SUBMITTING => JobOutcome::Submitting,
            outcome::SUBMITTED => JobOutcome::Submitted,
            outcome::FAILED => {
                let reason = parse_opt(self.reason)?.ok_or_else(|| {
                    LedgerError::Decode(format!("failed job {} has no reason", self.id))
                })?;
                JobOutcome::Failed(reason)
            }
            other => return Err(LedgerError::Decode(format!("unknown job outcome {other:?}"))),
        };
        Ok(Job {
            id: self.id,
            task_id: self.task_id,
            attempt: self.attempt,
            started_at: self.started_at,
            ended_at: self.ended_at,
            outcome,
            diagnostic: self.diagnostic,
            engine: self.engine,
        })
    }
}
