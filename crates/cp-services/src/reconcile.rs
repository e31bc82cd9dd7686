//! Reconciliation scheduler: the periodic sweep that keeps the ledger in
//! step with the settlement layer and picks up work nothing else will.
//!
//! Each cycle, in order: refresh the account snapshot, poll settlement for
//! unsettled proofs, resubmit retained proofs that never got a tx hash,
//! expire stale RUNNING jobs, and dispatch RECEIVED tasks. One task's
//! failure is counted and logged; the cycle carries on.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use cp_core::config::ReconcileSettings;
use cp_core::{now_secs, FailureReason, TaskStatus};

use crate::error::LedgerError;
use crate::orchestrator::Orchestrator;

/// What one cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub account_synced: bool,
    pub polled: usize,
    pub transitioned: usize,
    pub resubmitted: usize,
    pub expired: usize,
    pub dispatched: usize,
    pub errors: usize,
}

pub struct Reconciler {
    orch: Orchestrator,
    interval: Duration,
    stale_after: Duration,
    redispatch_received: bool,
    shutdown: broadcast::Receiver<()>,
}

impl Reconciler {
    pub fn new(
        orch: Orchestrator,
        settings: &ReconcileSettings,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            orch,
            interval: settings.interval(),
            stale_after: settings.stale_after(),
            redispatch_received: settings.redispatch_received,
            shutdown,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.interval.as_secs(), "reconciler started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("reconciler shutting down");
                    return Ok(());
                }

                _ = interval.tick() => {
                    let report = self.cycle().await;
                    if report.errors > 0 {
                        tracing::warn!(?report, "reconcile cycle finished with errors");
                    } else {
                        tracing::info!(?report, "reconcile cycle finished");
                    }
                }
            }
        }
    }

    pub async fn cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        self.sync_account(&mut report).await;
        self.poll_settlements(&mut report).await;
        self.resubmit_proofs(&mut report).await;
        self.expire_stale(&mut report);
        if self.redispatch_received {
            self.dispatch_received(&mut report);
        }
        report
    }

    async fn sync_account(&self, report: &mut CycleReport) {
        match self.orch.sync_account().await {
            Ok(_) => report.account_synced = true,
            Err(e) => {
                report.errors += 1;
                tracing::warn!(error = %e, "account sync failed");
            }
        }
    }

    async fn poll_settlements(&self, report: &mut CycleReport) {
        let tasks = match self.orch.ledger.unsettled_tasks() {
            Ok(t) => t,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cannot list unsettled tasks");
                return;
            }
        };

        for task in tasks {
            let Some(tx_hash) = task.tx_hash.as_deref() else {
                continue;
            };
            report.polled += 1;
            let event = match self.orch.gateway.poll_settlement(tx_hash).await {
                Ok(ev) => ev,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = task.id, tx_hash, error = %e, "settlement poll failed");
                    continue;
                }
            };
            match self.orch.apply_settlement(&task, event) {
                Ok(true) => report.transitioned += 1,
                Ok(false) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = task.id, error = %e, "settlement not applied");
                }
            }
        }
    }

    async fn resubmit_proofs(&self, report: &mut CycleReport) {
        let pending = match self.orch.ledger.unsubmitted_proofs() {
            Ok(p) => p,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cannot list retained proofs");
                return;
            }
        };

        for (job, artifact) in pending {
            let task = match self.orch.ledger.get_task(job.task_id) {
                Ok(t) => t,
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = job.task_id, error = %e, "cannot load task");
                    continue;
                }
            };
            match self.orch.settle_proof(&task, job.id, &artifact).await {
                Ok(Some(_)) => report.resubmitted += 1,
                Ok(None) => {
                    tracing::debug!(task_id = task.id, "proof submission already in flight");
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = task.id, error = %e, "proof resubmission failed");
                }
            }
        }
    }

    /// RUNNING jobs older than the staleness threshold, whether their
    /// worker is alive or was orphaned by a restart. Jobs holding a proof
    /// are never expired: their computation succeeded.
    fn expire_stale(&self, report: &mut CycleReport) {
        let jobs = match self.orch.ledger.running_jobs() {
            Ok(j) => j,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cannot list running jobs");
                return;
            }
        };

        let now = now_secs();
        let limit = self.stale_after.as_secs() as i64;
        for job in jobs {
            let age = now - job.started_at;
            if age < limit {
                continue;
            }
            let alive = self.orch.engine.is_running(job.task_id);
            let diagnostic = if alive {
                format!("no result after {age}s")
            } else {
                format!("no live worker after {age}s")
            };
            match self
                .orch
                .ledger
                .fail_run(job.task_id, FailureReason::Stale, Some(&diagnostic))
            {
                Ok(()) => {
                    if alive {
                        self.orch.engine.cancel(job.task_id);
                    }
                    report.expired += 1;
                    tracing::warn!(task_id = job.task_id, age_secs = age, alive, "stale task expired");
                }
                Err(LedgerError::Conflict { .. } | LedgerError::ProofRetained(_)) => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = job.task_id, error = %e, "cannot expire task");
                }
            }
        }
    }

    fn dispatch_received(&self, report: &mut CycleReport) {
        let queued = match self.orch.ledger.list_tasks(Some(TaskStatus::Received)) {
            Ok(t) => t,
            Err(e) => {
                report.errors += 1;
                tracing::error!(error = %e, "cannot list queued tasks");
                return;
            }
        };

        for task in queued {
            match self.orch.dispatch(task.id) {
                Ok(_) => report.dispatched += 1,
                Err(e) if e.is_busy() => {
                    tracing::debug!("job quota full, dispatch sweep stopped");
                    break;
                }
                Err(e) if e.is_conflict() => {}
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(task_id = task.id, error = %e, "dispatch failed");
                }
            }
        }
    }
}
