use std::sync::atomic::Ordering;
use std::time::Duration;

use cp_core::{FailureReason, JobOutcome, RewardStatus, TaskStatus};
use cp_services::{LedgerError, ProviderError, Reconciler, SettlementEvent};
use tokio::sync::broadcast;

use crate::*;

/// Received → proved → submitted as 0xabc → confirmed on poll → PAID.
#[tokio::test]
async fn test_task_runs_to_paid() {
    let p = provider(ProviderOptions::default());
    p.chain.set_tx_hash(1, "0xabc");

    p.orch.receive_task(spec(1, "groth16")).unwrap();
    let view = wait_for(&p.orch, 1, |v| v.task.status == TaskStatus::Success).await;
    assert_eq!(view.task.tx_hash.as_deref(), Some("0xabc"));
    assert_eq!(view.task.reward_status, Some(RewardStatus::Pending));

    p.chain.set_status(
        "0xabc",
        SettlementEvent::Confirmed {
            reward: Some("3.2".into()),
            reward_tx: Some("0xreward".into()),
        },
    );
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = Reconciler::new(p.orch.clone(), &reconcile_settings(3_600), shutdown_rx);
    let report = reconciler.cycle().await;
    assert_eq!(report.polled, 1);
    assert_eq!(report.transitioned, 1);

    let task = p.orch.get_task(1).unwrap().task;
    assert_eq!(task.reward_status, Some(RewardStatus::Paid));
    assert_eq!(task.reward.as_deref(), Some("3.2"));
    assert_eq!(task.reward_tx.as_deref(), Some("0xreward"));

    let jobs = p.orch.jobs(1).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].outcome, JobOutcome::Submitted);
    assert_eq!(jobs[0].engine.as_deref(), Some("scripted-prover"));
}

/// A worker past its wall-clock limit is killed and the task fails
/// without ever getting a proof transaction.
#[tokio::test(start_paused = true)]
async fn test_timeout_fails_task_without_tx() {
    let p = provider(ProviderOptions {
        quota: 2,
        timeout_secs: 600,
    });
    p.orch.receive_task(spec(2, "slow")).unwrap();
    assert_eq!(p.orch.get_task(2).unwrap().task.status, TaskStatus::Running);

    tokio::time::sleep(Duration::from_secs(601)).await;
    let view = wait_for(&p.orch, 2, |v| v.task.status == TaskStatus::Failed).await;
    assert_eq!(view.task.failure_reason, Some(FailureReason::Timeout));
    assert!(view.task.tx_hash.is_none());
    assert!(view.task.reward_status.is_none());

    let jobs = p.orch.jobs(2).unwrap();
    assert_eq!(jobs[0].outcome, JobOutcome::Failed(FailureReason::Timeout));
    assert_eq!(p.chain.submits.load(Ordering::SeqCst), 0);
    wait_idle(&p.orch).await;
}

#[tokio::test]
async fn test_worker_error_is_recorded() {
    let p = provider(ProviderOptions::default());
    p.orch.receive_task(spec(5, "broken")).unwrap();

    let view = wait_for(&p.orch, 5, |v| v.task.status == TaskStatus::Failed).await;
    assert_eq!(view.task.failure_reason, Some(FailureReason::ExecutionError));
    let jobs = p.orch.jobs(5).unwrap();
    assert!(jobs[0]
        .diagnostic
        .as_deref()
        .unwrap_or_default()
        .contains("out of memory"));
}

#[tokio::test]
async fn test_duplicate_tasks_are_rejected() {
    let p = provider(ProviderOptions::default());
    let first = spec(10, "slow");
    p.orch.receive_task(first.clone()).unwrap();

    let err = p.orch.receive_task(spec(10, "groth16")).unwrap_err();
    assert!(matches!(err, ProviderError::Ledger(LedgerError::DuplicateTask(10))));

    // Same work under a fresh id.
    let mut reannounced = first.clone();
    reannounced.id = 11;
    let err = p.orch.receive_task(reannounced.clone()).unwrap_err();
    assert!(matches!(err, ProviderError::Ledger(LedgerError::DuplicateTask(10))));

    // Once the first attempt has failed the work may be taken again.
    assert!(p.orch.cancel(10).unwrap());
    assert_eq!(p.orch.receive_task(reannounced).unwrap(), 11);
    assert!(p.orch.cancel(11).unwrap());
    wait_idle(&p.orch).await;
}

#[tokio::test]
async fn test_cancel_stops_worker_and_is_final() {
    let p = provider(ProviderOptions::default());
    p.orch.receive_task(spec(20, "slow")).unwrap();

    assert!(p.orch.cancel(20).unwrap());
    wait_idle(&p.orch).await;

    let view = p.orch.get_task(20).unwrap();
    assert_eq!(view.task.status, TaskStatus::Failed);
    assert_eq!(view.task.failure_reason, Some(FailureReason::Cancelled));
    assert!(!p.orch.cancel(20).unwrap());

    // Terminal: the ledger refuses to move it anywhere else.
    let err = p.orch.dispatch(20).unwrap_err();
    assert!(err.is_conflict());
    let err = p
        .orch
        .ledger()
        .mark_success(20, "0xlate")
        .unwrap_err();
    assert!(matches!(err, LedgerError::Conflict { .. }));
}

/// Once the proof exists, cancel is refused, both while it waits for a
/// submitter and while a submission is in flight. The proof still settles.
#[tokio::test]
async fn test_cancel_after_proof_is_refused() {
    let p = provider(ProviderOptions::default());
    p.chain.down.store(true, Ordering::SeqCst);
    p.orch.receive_task(spec(40, "groth16")).unwrap();
    wait_retained(&p.orch, 40).await;

    assert!(!p.orch.cancel(40).unwrap());
    let view = p.orch.get_task(40).unwrap();
    assert_eq!(view.task.status, TaskStatus::Running);
    assert!(view.task.failure_reason.is_none());
    assert!(view.settlement_pending);
    assert_eq!(p.orch.ledger().unsubmitted_proofs().unwrap().len(), 1);

    p.chain.down.store(false, Ordering::SeqCst);
    p.chain.submit_delay_ms.store(100, Ordering::SeqCst);
    let seen = p.chain.submits.load(Ordering::SeqCst);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = Reconciler::new(p.orch.clone(), &reconcile_settings(3_600), shutdown_rx);
    let cycle = tokio::spawn(async move { reconciler.cycle().await });

    wait_submits(&p.chain, seen + 1).await;
    assert!(!p.orch.cancel(40).unwrap());

    let report = cycle.await.unwrap();
    assert_eq!(report.resubmitted, 1);
    let view = p.orch.get_task(40).unwrap();
    assert_eq!(view.task.status, TaskStatus::Success);
    assert_eq!(view.task.tx_hash.as_deref(), Some("0xtx40"));
    assert!(view.task.failure_reason.is_none());
}

#[tokio::test]
async fn test_success_requires_tx_hash() {
    let p = provider(ProviderOptions::default());
    p.orch.receive_task(spec(30, "slow")).unwrap();

    let err = p.orch.ledger().mark_success(30, "").unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    let err = p
        .orch
        .ledger()
        .update_status(30, TaskStatus::Running, TaskStatus::Success, None)
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTransition { .. }));

    assert_eq!(p.orch.get_task(30).unwrap().task.status, TaskStatus::Running);
    p.orch.cancel(30).unwrap();
    wait_idle(&p.orch).await;
}
