//! Task orchestrator: drives every task through its lifecycle.
//!
//! receive → (admit, RECEIVED→RUNNING, spawn worker) → proof retained on
//! the job → submitted → RUNNING→SUCCESS with the tx hash → settlement
//! events move the reward status.
//!
//! The orchestrator holds no task state of its own. Every decision is a
//! conditional ledger write, so a lost race surfaces as `Conflict` and
//! means another path already handled the task.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use cp_core::{
    FailureReason, Job, ProofArtifact, ProviderAccount, RewardStatus, Task, TaskId, TaskSpec,
    TaskStatus,
};

use crate::chain::SettlementEvent;
use crate::engine::{ExecutionEngine, JobHandle};
use crate::error::{EngineError, LedgerError, ProviderResult, SubmissionError};
use crate::gateway::SubmissionGateway;
use crate::ledger::{Ledger, SettlementRecord};

/// A task as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    /// Proof computed and retained, waiting for a tx hash.
    pub settlement_pending: bool,
}

/// Job quota usage alongside the account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResources {
    pub account: Option<ProviderAccount>,
    pub job_quota: usize,
    pub active_jobs: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) ledger: Ledger,
    pub(crate) engine: ExecutionEngine,
    pub(crate) gateway: SubmissionGateway,
}

impl Orchestrator {
    pub fn new(ledger: Ledger, engine: ExecutionEngine, gateway: SubmissionGateway) -> Self {
        Self {
            ledger,
            engine,
            gateway,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ── Intake and dispatch ─────────────────────────────────────────────────

    /// Validate and record a task, then try to start it.
    ///
    /// A full job quota is not an error here: the task stays RECEIVED and
    /// the reconciler dispatches it later.
    pub fn receive_task(&self, spec: TaskSpec) -> ProviderResult<TaskId> {
        spec.validate()?;
        let id = self.ledger.create_task(&spec)?;
        tracing::info!(
            task_id = id,
            zk_type = %spec.zk_type,
            resource_type = %spec.resource_type,
            "task received"
        );

        match self.dispatch(id) {
            Ok(_) => {}
            Err(e) if e.is_busy() => {
                tracing::info!(task_id = id, "job quota full, task queued");
            }
            Err(e) if e.is_conflict() => {
                tracing::debug!(task_id = id, error = %e, "task already dispatched");
            }
            Err(e) => {
                tracing::warn!(task_id = id, error = %e, "dispatch failed, task left queued");
            }
        }
        Ok(id)
    }

    /// Start a RECEIVED task: reserve a slot, move it to RUNNING with a new
    /// job, and launch the worker. Returns as soon as the worker is running.
    pub fn dispatch(&self, id: TaskId) -> ProviderResult<Job> {
        let slot = self.engine.admit()?;
        let mut task = self.ledger.get_task(id)?;
        let job = self.ledger.start_run(id)?;
        task.status = TaskStatus::Running;

        let handle = match self.engine.launch(slot, task.clone(), job.attempt) {
            Ok(h) => h,
            Err(e) => {
                self.close_failed(id, FailureReason::ExecutionError, &e.to_string());
                return Err(e.into());
            }
        };
        tracing::info!(task_id = id, attempt = job.attempt, "task running");

        let this = self.clone();
        let job_for_worker = job.clone();
        tokio::spawn(async move { this.finish(task, job_for_worker, handle).await });
        Ok(job)
    }

    async fn finish(&self, task: Task, job: Job, handle: JobHandle) {
        match handle.outcome().await {
            Ok(artifact) => match self.ledger.record_proof(job.id, &artifact) {
                Ok(true) => {
                    tracing::info!(task_id = task.id, engine = %artifact.engine, "proof ready");
                    match self.settle_proof(&task, job.id, &artifact).await {
                        Ok(Some(_)) => {}
                        Ok(None) => {
                            tracing::debug!(task_id = task.id, "proof taken by another submitter");
                        }
                        Err(e) => {
                            tracing::warn!(task_id = task.id, error = %e, "settlement pending");
                        }
                    }
                }
                Ok(false) => {
                    tracing::debug!(task_id = task.id, "proof discarded, job no longer running");
                }
                Err(e) => {
                    tracing::error!(task_id = task.id, error = %e, "failed to retain proof");
                }
            },
            Err(e) => {
                let reason = match e {
                    EngineError::Timeout { .. } => FailureReason::Timeout,
                    EngineError::Cancelled => FailureReason::Cancelled,
                    _ => FailureReason::ExecutionError,
                };
                self.close_failed(task.id, reason, &e.to_string());
            }
        }
    }

    /// Claim a retained proof, hand it to the gateway and record SUCCESS
    /// with the resulting tx hash.
    ///
    /// Returns `None` without submitting when the proof is already claimed
    /// or the task has left RUNNING, so a proof reaches the chain once.
    pub(crate) async fn settle_proof(
        &self,
        task: &Task,
        job_id: i64,
        artifact: &ProofArtifact,
    ) -> ProviderResult<Option<String>> {
        if !self.ledger.claim_proof(job_id)? {
            return Ok(None);
        }
        let tx_hash = match self.gateway.submit_proof(task, artifact).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                if let Err(release) = self.return_proof(task.id, job_id, &e) {
                    tracing::error!(task_id = task.id, error = %release, "failed to release proof claim");
                }
                return Err(e.into());
            }
        };
        self.ledger.mark_success(task.id, &tx_hash)?;
        tracing::info!(task_id = task.id, tx_hash = %tx_hash, "task succeeded");
        Ok(Some(tx_hash))
    }

    /// Give a claimed proof back after a failed submission. A proof the
    /// settlement layer has refused `max_rejections` times fails its task.
    fn return_proof(&self, id: TaskId, job_id: i64, err: &SubmissionError) -> ProviderResult<()> {
        let diagnostic = err.to_string();
        let rejected = err.is_rejection();
        let rejections = self.ledger.release_proof(job_id, rejected, &diagnostic)?;
        if !rejected || rejections < self.gateway.max_rejections() {
            return Ok(());
        }
        match self.ledger.retire_proof(id, &diagnostic) {
            Ok(()) => {
                tracing::warn!(task_id = id, rejections, error = %err, "proof refused, task failed");
                Ok(())
            }
            Err(LedgerError::Conflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn close_failed(&self, id: TaskId, reason: FailureReason, diagnostic: &str) {
        match self.ledger.fail_run(id, reason, Some(diagnostic)) {
            Ok(()) => {
                tracing::warn!(task_id = id, %reason, diagnostic, "task failed");
            }
            Err(LedgerError::Conflict { actual, .. }) => {
                tracing::debug!(task_id = id, %actual, %reason, "task already closed");
            }
            Err(LedgerError::ProofRetained(_)) => {
                tracing::debug!(task_id = id, %reason, "proof retained, task left running");
            }
            Err(e) => {
                tracing::error!(task_id = id, error = %e, "failed to record task failure");
            }
        }
    }

    /// Operator cancellation. Returns false when the task had already
    /// finished or its proof is computed and awaiting settlement.
    pub fn cancel(&self, id: TaskId) -> ProviderResult<bool> {
        let task = self.ledger.get_task(id)?;
        match task.status {
            TaskStatus::Success | TaskStatus::Failed => return Ok(false),
            TaskStatus::Received => {
                return Err(LedgerError::invalid_status(id, task.status, TaskStatus::Failed).into())
            }
            TaskStatus::Running => {}
        }

        match self
            .ledger
            .fail_run(id, FailureReason::Cancelled, Some("cancelled by operator"))
        {
            Ok(()) => {}
            Err(LedgerError::Conflict { .. }) => return Ok(false),
            Err(LedgerError::ProofRetained(_)) => {
                tracing::info!(task_id = id, "proof already computed, cancel refused");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
        let signalled = self.engine.cancel(id);
        tracing::info!(task_id = id, signalled, "task cancelled");
        Ok(true)
    }

    // ── Settlement ──────────────────────────────────────────────────────────

    /// Pushed settlement event for a proof transaction.
    pub fn receive_proof_callback(
        &self,
        tx_hash: &str,
        event: SettlementEvent,
    ) -> ProviderResult<bool> {
        let task = self.ledger.task_by_tx_hash(tx_hash)?;
        self.apply_settlement(&task, event)
    }

    /// Merge a settlement event into the ledger. Returns whether anything
    /// changed; replays of the current state change nothing.
    pub fn apply_settlement(&self, task: &Task, event: SettlementEvent) -> ProviderResult<bool> {
        let Some(tx_hash) = task.tx_hash.as_deref() else {
            return Err(LedgerError::InvalidTransition {
                id: task.id,
                from: task.status.to_string(),
                to: event.name().to_string(),
            }
            .into());
        };

        let name = event.name();
        let record = match event {
            SettlementEvent::Pending => return Ok(false),
            SettlementEvent::Confirmed { reward, reward_tx } => {
                SettlementRecord::new(tx_hash, RewardStatus::Paid)
                    .with_reward(reward, reward_tx)
                    .only_from(&[RewardStatus::Pending, RewardStatus::Paid])
            }
            SettlementEvent::Challenged { challenge_tx } => {
                SettlementRecord::new(tx_hash, RewardStatus::Challenged)
                    .with_challenge_tx(challenge_tx)
            }
            SettlementEvent::Slashed { slash_tx } => {
                SettlementRecord::new(tx_hash, RewardStatus::Slashed).with_slash_tx(slash_tx)
            }
            SettlementEvent::Defended { reward_tx } => {
                SettlementRecord::new(tx_hash, RewardStatus::Paid)
                    .with_reward(None, reward_tx)
                    .only_from(&[RewardStatus::Challenged, RewardStatus::Paid])
            }
        };

        let changed = self.ledger.record_settlement(task.id, &record)?;
        if changed {
            tracing::info!(
                task_id = task.id,
                event = name,
                reward_status = %record.reward_status,
                "settlement applied"
            );
        } else {
            tracing::debug!(task_id = task.id, event = name, "settlement replay ignored");
        }
        Ok(changed)
    }

    /// Refresh the provider account snapshot from the settlement layer.
    pub async fn sync_account(&self) -> ProviderResult<ProviderAccount> {
        let account = self
            .gateway
            .fetch_account()
            .await
            .map_err(SubmissionError::from)?;
        self.ledger.save_account(&account)?;
        tracing::debug!(node_id = %account.node_id, balance = %account.balance, "account synced");
        Ok(account)
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn get_task(&self, id: TaskId) -> ProviderResult<TaskView> {
        let task = self.ledger.get_task(id)?;
        let settlement_pending = task.status == TaskStatus::Running
            && self
                .ledger
                .active_job(id)?
                .is_some_and(|job| job.outcome.holds_proof());
        Ok(TaskView {
            task,
            settlement_pending,
        })
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> ProviderResult<Vec<TaskView>> {
        let pending: HashSet<TaskId> = self.ledger.retained_proofs()?.into_iter().collect();
        let views = self
            .ledger
            .list_tasks(status)?
            .into_iter()
            .map(|task| TaskView {
                settlement_pending: pending.contains(&task.id),
                task,
            })
            .collect();
        Ok(views)
    }

    pub fn jobs(&self, id: TaskId) -> ProviderResult<Vec<Job>> {
        self.ledger.get_task(id)?;
        Ok(self.ledger.jobs(id)?)
    }

    pub fn resources(&self) -> ProviderResult<ProviderResources> {
        Ok(ProviderResources {
            account: self.ledger.account()?,
            job_quota: self.engine.quota(),
            active_jobs: self.engine.active(),
        })
    }
}
